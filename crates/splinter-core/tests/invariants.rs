//! Universal invariant checks, including a scaled-down multi-reader
//! single-writer torture test (spec scenario S6).

use splinter_core::{Error, Store};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

fn unique_name(prefix: &str) -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{prefix}_{}_{ts}", std::process::id())
}

struct Cleanup(String);
impl Drop for Cleanup {
    fn drop(&mut self) {
        let _ = splinter_core::destroy(&self.0);
    }
}

#[test]
fn seqlock_parity_at_rest() {
    let name = unique_name("splinter_parity");
    let _cleanup = Cleanup(name.clone());
    let store = Store::create(&name, 16, 32).unwrap();

    for i in 0..16 {
        store.set(&format!("k{i}"), b"v").unwrap();
    }
    for i in 0..16 {
        let snap = store.get_slot_snapshot(&format!("k{i}")).unwrap();
        assert_eq!(snap.epoch % 2, 0, "slot for k{i} left in odd epoch");
    }
}

#[test]
fn hash_key_correspondence() {
    let name = unique_name("splinter_hk");
    let _cleanup = Cleanup(name.clone());
    let store = Store::create(&name, 16, 32).unwrap();
    store.set("abc", b"v").unwrap();

    let snap = store.get_slot_snapshot("abc").unwrap();
    assert_eq!(snap.hash, splinter_core::fnv1a("abc"));
    assert_eq!(snap.key, "abc");
}

#[test]
fn arena_locality_matches_layout() {
    let name = unique_name("splinter_arena");
    let _cleanup = Cleanup(name.clone());
    let store = Store::create(&name, 8, 64).unwrap();
    store.set("k", b"payload").unwrap();

    let snap = store.get_slot_snapshot("k").unwrap();
    assert!(snap.val_len as u32 <= store.max_val_sz());
    assert_eq!(snap.val_off % store.max_val_sz(), 0);
}

#[test]
fn set_idempotence() {
    let name = unique_name("splinter_idem");
    let _cleanup = Cleanup(name.clone());
    let store = Store::create(&name, 8, 32).unwrap();

    store.set("k", b"same").unwrap();
    let snap1 = store.get_slot_snapshot("k").unwrap();
    store.set("k", b"same").unwrap();
    let snap2 = store.get_slot_snapshot("k").unwrap();

    assert_eq!(snap2.epoch, snap1.epoch + 2);
    assert_eq!(snap1.hash, snap2.hash);
    assert_eq!(store.get_owned("k").unwrap(), b"same");
}

/// Scaled-down MRSW stress test. One writer cycles through a set of hot
/// keys bumping an embedded version counter; many readers parse the
/// version back out and assert it never regresses. Sized down from the
/// full 50000-slot/20000-key/60s profile to something that finishes in a
/// couple of seconds under test, while exercising the same race.
#[test]
fn mrsw_version_never_regresses() {
    const SLOTS: u32 = 512;
    const MAX_VAL: u32 = 256;
    const HOT_KEYS: usize = 64;
    const READERS: usize = 8;
    const RUN: Duration = Duration::from_millis(800);

    let name = unique_name("splinter_mrsw");
    let _cleanup = Cleanup(name.clone());
    let store = Arc::new(Store::create(&name, SLOTS, MAX_VAL).unwrap());

    let keys: Vec<String> = (0..HOT_KEYS).map(|i| format!("hot:{i}")).collect();
    for k in &keys {
        store.set(k, b"ver:1|nonce:0|data:seed").unwrap();
    }

    let integrity_failures = Arc::new(AtomicUsize::new(0));
    let again_retries = Arc::new(AtomicU64::new(0));
    let stop_at = Instant::now() + RUN;

    let writer = {
        let store = Arc::clone(&store);
        let keys = keys.clone();
        std::thread::spawn(move || {
            let mut vers = vec![1u64; keys.len()];
            let mut nonce = 0u64;
            while Instant::now() < stop_at {
                for (i, k) in keys.iter().enumerate() {
                    vers[i] += 1;
                    nonce += 1;
                    let payload = format!("ver:{}|nonce:{}|data:x", vers[i], nonce);
                    store.set(k, payload.as_bytes()).unwrap();
                }
            }
        })
    };

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let store = Arc::clone(&store);
            let keys = keys.clone();
            let integrity_failures = Arc::clone(&integrity_failures);
            let again_retries = Arc::clone(&again_retries);
            std::thread::spawn(move || {
                let mut last_seen = vec![0u64; keys.len()];
                while Instant::now() < stop_at {
                    for (i, k) in keys.iter().enumerate() {
                        match store.get_owned(k) {
                            Ok(bytes) => {
                                let text = String::from_utf8_lossy(&bytes);
                                let ver = parse_ver(&text);
                                match ver {
                                    Some(v) => {
                                        if v < last_seen[i] {
                                            integrity_failures.fetch_add(1, Ordering::Relaxed);
                                        } else {
                                            last_seen[i] = v;
                                        }
                                    }
                                    None => {
                                        integrity_failures.fetch_add(1, Ordering::Relaxed);
                                    }
                                }
                            }
                            Err(Error::Again) => {
                                again_retries.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(Error::NotFound) => {
                                integrity_failures.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => panic!("unexpected get error: {e}"),
                        }
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(
        integrity_failures.load(Ordering::Relaxed),
        0,
        "torn or regressed read observed"
    );
    // Again retries are expected and not a failure; just sanity-check the
    // counter was wired up.
    let _ = again_retries.load(Ordering::Relaxed);
}

fn parse_ver(text: &str) -> Option<u64> {
    let rest = text.strip_prefix("ver:")?;
    let end = rest.find('|')?;
    rest[..end].parse().ok()
}
