//! Sets one key on a bus and exits. `splinter-send value`,
//! `splinter-send key value`, or `splinter-send bus key value` depending on
//! how many positional arguments are given.

const DEFAULT_BUS: &str = "splinter_debug";
const DEFAULT_KEY: &str = "splinter_response";
const DEFAULT_SLOTS: u32 = 128;
const DEFAULT_MAX_VAL: u32 = 1024;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (bus, key, value) = match args.len() {
        1 => (DEFAULT_BUS.to_string(), DEFAULT_KEY.to_string(), args[0].clone()),
        2 => (DEFAULT_BUS.to_string(), args[0].clone(), args[1].clone()),
        3 => (args[0].clone(), args[1].clone(), args[2].clone()),
        _ => {
            eprintln!("Usage: splinter-send [bus] [key] value");
            std::process::exit(1);
        }
    };

    let store = match splinter_core::Store::open_or_create(&bus, DEFAULT_SLOTS, DEFAULT_MAX_VAL) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("splinter-send: failed to open bus at {bus}: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = store.set(&key, value.as_bytes()) {
        eprintln!("splinter-send: failed to send value to key {key}: {e}");
        std::process::exit(2);
    }
}
