//! Taps a bus key forever and writes each update to stdout, one line at a
//! time, so it can be redirected or piped into other tooling.

use clap::Parser;

const DEFAULT_SLOTS: u32 = 128;
const DEFAULT_MAX_VAL: u32 = 1024;
const TIMEOUT_MS: u64 = 100;

#[derive(Parser, Debug)]
#[command(name = "splinter-logtee", version, about = "Tail messages from a splinter bus key")]
struct Args {
    /// Bus name.
    #[arg(default_value = "splinter_debug")]
    bus: String,

    /// Key name.
    #[arg(default_value = "__debug")]
    key: String,
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

    let store = match splinter_core::Store::create_or_open(&args.bus, DEFAULT_SLOTS, DEFAULT_MAX_VAL) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("splinter_logtee: failed to open bus {}: {e}", args.bus);
            std::process::exit(1);
        }
    };

    loop {
        match store.poll(&args.key, TIMEOUT_MS) {
            Ok(()) => match store.get_owned(&args.key) {
                Ok(bytes) => {
                    use std::io::Write;
                    let stdout = std::io::stdout();
                    let mut lock = stdout.lock();
                    let _ = lock.write_all(&bytes);
                    let _ = lock.write_all(b"\n");
                    let _ = lock.flush();
                }
                Err(e) => {
                    eprintln!("splinter_logtee: failed to read from {} (key {}): {e}", args.bus, args.key);
                    std::process::exit(2);
                }
            },
            Err(splinter_core::Error::Timeout) | Err(splinter_core::Error::Again) => continue,
            Err(e) => {
                eprintln!("splinter_logtee: poll failed: {e}");
                std::process::exit(1);
            }
        }
    }
}
