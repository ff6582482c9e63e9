//! Blocks waiting for `__debug` on `splinter_debug` to change and prints
//! each update. Runs forever unless `--oneshot` is given.

use clap::Parser;

const DEFAULT_BUS: &str = "splinter_debug";
const DEFAULT_KEY: &str = "__debug";
const DEFAULT_SLOTS: u32 = 128;
const DEFAULT_MAX_VAL: u32 = 1024;
const TIMEOUT_MS: u64 = 100;

#[derive(Parser, Debug)]
#[command(name = "splinter-recv", version, about = "Listen for messages on a splinter bus key")]
struct Args {
    /// Exit after receiving one message.
    #[arg(short, long)]
    oneshot: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.oneshot {
        eprintln!("splinter-recv: will exit after 1 event (--oneshot specified)");
    }

    let store = match splinter_core::Store::open_or_create(DEFAULT_BUS, DEFAULT_SLOTS, DEFAULT_MAX_VAL) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("splinter-recv: failed to open bus {DEFAULT_BUS}: {e}");
            std::process::exit(1);
        }
    };

    println!("splinter-recv: listening to {DEFAULT_KEY} on {DEFAULT_BUS} ...");
    if !args.oneshot {
        eprintln!("splinter-recv: use --oneshot if you ever wish to exit after a single event.");
    }

    loop {
        match store.poll(DEFAULT_KEY, TIMEOUT_MS) {
            Ok(()) => {
                match store.get_owned(DEFAULT_KEY) {
                    Ok(bytes) => {
                        println!("splinter-recv: {}", String::from_utf8_lossy(&bytes));
                    }
                    Err(e) => {
                        eprintln!("splinter-recv: failed to read data from {DEFAULT_BUS} (key {DEFAULT_KEY}): {e}");
                        std::process::exit(2);
                    }
                }
                if args.oneshot {
                    break;
                }
            }
            Err(splinter_core::Error::Timeout) | Err(splinter_core::Error::Again) => continue,
            Err(e) => {
                eprintln!("splinter-recv: poll failed: {e}");
                std::process::exit(1);
            }
        }
    }
}
