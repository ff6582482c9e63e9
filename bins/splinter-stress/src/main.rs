//! Full-scale multi-reader/single-writer torture test: one writer cycles a
//! version counter into a pool of hot keys while many readers hammer random
//! keys and assert the observed version never regresses or tears.

use clap::Parser;
use rand::Rng;
use splinter_core::{Error, Store};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "splinter-stress", version, about = "MRSW torture test for a splinter store")]
struct Args {
    /// Reader thread count (one additional writer thread always runs).
    #[arg(long, default_value_t = 31)]
    readers: u32,

    /// Test duration in seconds.
    #[arg(long, default_value_t = 10)]
    seconds: u64,

    /// Number of hot keys.
    #[arg(long, default_value_t = 20_000)]
    keys: u32,

    /// Store name.
    #[arg(long, default_value = "mrsw_store")]
    store: String,

    /// Slot count.
    #[arg(long, default_value_t = 50_000)]
    slots: u32,

    /// Max value size in bytes.
    #[arg(long = "max-value", default_value_t = 4096)]
    max_value: u32,

    /// Writer sleep between sets, in microseconds.
    #[arg(long = "writer-us", default_value_t = 0)]
    writer_us: u64,

    /// Suppress the progress dots.
    #[arg(long)]
    quiet: bool,
}

#[derive(Default)]
struct Counters {
    total_gets: AtomicU64,
    total_sets: AtomicU64,
    get_ok: AtomicU64,
    set_ok: AtomicU64,
    get_fail: AtomicU64,
    set_fail: AtomicU64,
    integrity_fail: AtomicU64,
    retries: AtomicU64,
    get_miss: AtomicU64,
    get_oversize: AtomicU64,
    set_full: AtomicU64,
    set_too_big: AtomicU64,
}

fn parse_ver(text: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(text).ok()?;
    let rest = text.strip_prefix("ver:")?;
    let end = rest.find('|')?;
    rest[..end].parse().ok()
}

fn writer_main(store: Arc<Store>, keys: Arc<Vec<String>>, running: Arc<std::sync::atomic::AtomicBool>, ctr: Arc<Counters>, max_value: u32, writer_us: u64) {
    let mut ver: u64 = 1;
    let payload_len = (max_value as usize / 2).max(64);

    while running.load(Ordering::Relaxed) {
        for key in keys.iter() {
            if !running.load(Ordering::Relaxed) {
                break;
            }
            let nonce = Instant::now().elapsed().as_nanos();
            let prefix = format!("ver:{ver}|nonce:{nonce}|data:");
            let max_value = max_value as usize;
            if prefix.len() >= max_value {
                ctr.set_too_big.fetch_add(1, Ordering::Relaxed);
                ctr.set_fail.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let remain = max_value - prefix.len() - 1;
            let fill = payload_len.min(remain);
            let filler = (b'A' + (ver % 26) as u8) as char;
            let payload = format!("{prefix}{}", filler.to_string().repeat(fill));

            ctr.total_sets.fetch_add(1, Ordering::Relaxed);
            match store.set(key, payload.as_bytes()) {
                Ok(()) => {
                    ctr.set_ok.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    ctr.set_fail.fetch_add(1, Ordering::Relaxed);
                    match e {
                        Error::Full(_) => ctr.set_full.fetch_add(1, Ordering::Relaxed),
                        _ => ctr.set_too_big.fetch_add(1, Ordering::Relaxed),
                    };
                }
            }
            if writer_us > 0 {
                std::thread::sleep(Duration::from_micros(writer_us));
            }
        }
        ver += 1;
    }
}

fn reader_main(store: Arc<Store>, keys: Arc<Vec<String>>, running: Arc<std::sync::atomic::AtomicBool>, ctr: Arc<Counters>) {
    let mut observed = vec![0u64; keys.len()];
    let mut rng = rand::thread_rng();

    while running.load(Ordering::Relaxed) {
        for _ in 0..256 {
            if !running.load(Ordering::Relaxed) {
                break;
            }
            let idx = rng.gen_range(0..keys.len());
            loop {
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                ctr.total_gets.fetch_add(1, Ordering::Relaxed);
                match store.get_owned(&keys[idx]) {
                    Ok(bytes) => {
                        ctr.get_ok.fetch_add(1, Ordering::Relaxed);
                        match parse_ver(&bytes) {
                            Some(v) if v < observed[idx] => {
                                ctr.integrity_fail.fetch_add(1, Ordering::Relaxed);
                            }
                            Some(v) => observed[idx] = v,
                            None => {
                                ctr.integrity_fail.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        break;
                    }
                    Err(Error::Again) => {
                        ctr.retries.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    Err(Error::NotFound) => {
                        ctr.get_fail.fetch_add(1, Ordering::Relaxed);
                        ctr.get_miss.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    Err(Error::WouldOverflow { .. }) => {
                        ctr.get_fail.fetch_add(1, Ordering::Relaxed);
                        ctr.get_oversize.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    Err(_) => {
                        ctr.get_fail.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                }
            }
        }
    }
}

fn print_stats(args: &Args, ctr: &Counters, elapsed: Duration) {
    let gets = ctr.total_gets.load(Ordering::Relaxed);
    let sets = ctr.total_sets.load(Ordering::Relaxed);
    let get_ok = ctr.get_ok.load(Ordering::Relaxed);
    let set_ok = ctr.set_ok.load(Ordering::Relaxed);
    let get_fail = ctr.get_fail.load(Ordering::Relaxed);
    let set_fail = ctr.set_fail.load(Ordering::Relaxed);
    let bad = ctr.integrity_fail.load(Ordering::Relaxed);
    let retries = ctr.retries.load(Ordering::Relaxed);
    let get_miss = ctr.get_miss.load(Ordering::Relaxed);
    let get_oversize = ctr.get_oversize.load(Ordering::Relaxed);
    let set_full = ctr.set_full.load(Ordering::Relaxed);
    let set_too_big = ctr.set_too_big.load(Ordering::Relaxed);

    let secs = elapsed.as_secs_f64();
    let ops = (gets + sets) as f64 / secs;

    println!("\n===== MRSW STRESS RESULTS =====");
    println!("Threads            : {} (readers={}, writer=1)", args.readers + 1, args.readers);
    println!("Duration           : {} s", args.seconds);
    println!("Hot keys           : {}", args.keys);
    println!("Total ops          : {} (gets={gets}, sets={sets})", gets + sets);
    println!("Throughput         : {ops:.0} ops/sec");
    println!("Get                : ok={get_ok} fail={get_fail} (miss={get_miss}, oversize={get_oversize})");
    println!("Set                : ok={set_ok} fail={set_fail} (full={set_full}, too_big={set_too_big})");
    println!("Integrity failures : {bad}");
    println!(
        "Retries (EAGAIN)   : {retries} ({:.2}% of gets, {:.2} per successful get)\n",
        if gets > 0 { 100.0 * retries as f64 / gets as f64 } else { 0.0 },
        if get_ok > 0 { retries as f64 / get_ok as f64 } else { 0.0 },
    );
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = Args::parse();
    if args.readers < 1 {
        args.readers = 1;
    }

    let store = match Store::create_or_open(&args.store, args.slots, args.max_value) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("splinter-stress: create_or_open failed: {e}");
            std::process::exit(1);
        }
    };
    store.set_auto_vacuum(false);

    println!("This is going to take a little while (several minutes) ...");
    println!("Please be patient ...");

    let keys: Arc<Vec<String>> = Arc::new((0..args.keys).map(|i| format!("k{i:08}")).collect());
    for k in keys.iter() {
        let _ = store.set(k, b"ver:1|nonce:0|data:SEED");
    }

    let ctr = Arc::new(Counters::default());
    let running = Arc::new(std::sync::atomic::AtomicBool::new(true));

    let writer = {
        let store = Arc::clone(&store);
        let keys = Arc::clone(&keys);
        let running = Arc::clone(&running);
        let ctr = Arc::clone(&ctr);
        let max_value = args.max_value;
        let writer_us = args.writer_us;
        std::thread::spawn(move || writer_main(store, keys, running, ctr, max_value, writer_us))
    };

    let readers: Vec<_> = (0..args.readers)
        .map(|_| {
            let store = Arc::clone(&store);
            let keys = Arc::clone(&keys);
            let running = Arc::clone(&running);
            let ctr = Arc::clone(&ctr);
            std::thread::spawn(move || reader_main(store, keys, running, ctr))
        })
        .collect();

    println!();
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(args.seconds) {
        std::thread::sleep(Duration::from_millis(10));
        if !args.quiet {
            use std::io::Write;
            print!(".");
            let _ = std::io::stdout().flush();
        }
    }
    running.store(false, Ordering::Relaxed);
    println!();

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    let elapsed = start.elapsed();

    print_stats(&args, &ctr, elapsed);

    if ctr.integrity_fail.load(Ordering::Relaxed) > 0 {
        std::process::exit(1);
    }
}
