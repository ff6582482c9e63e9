//! End-to-end scenario tests against a real mapped store.

use splinter_core::{Error, Store};
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
fn s1_set_get_round_trip() {
    let name = unique_name("splinter_s1");
    let _cleanup = Cleanup(name.clone());
    let store = Store::create(&name, 8, 64).unwrap();

    store.set("hello", b"world").unwrap();
    let got = store.get_owned("hello").unwrap();
    assert_eq!(got, b"world");
}

#[test]
fn s2_update_overwrites_and_vacuums() {
    let name = unique_name("splinter_s2");
    let _cleanup = Cleanup(name.clone());
    let store = Store::create(&name, 8, 64).unwrap();
    assert!(store.get_auto_vacuum());

    store.set("k", b"aaaa").unwrap();
    store.set("k", b"bb").unwrap();

    let got = store.get_owned("k").unwrap();
    assert_eq!(got, b"bb");

    let snap = store.get_slot_snapshot("k").unwrap();
    assert_eq!(snap.val_len, 2);
}

#[test]
fn s3_unset_round_trip() {
    let name = unique_name("splinter_s3");
    let _cleanup = Cleanup(name.clone());
    let store = Store::create(&name, 8, 64).unwrap();

    store.set("x", b"v").unwrap();
    let removed_len = store.unset("x").unwrap();
    assert_eq!(removed_len, 1);

    match store.get("x", None) {
        Err(Error::NotFound) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn s4_poll_fires_on_write() {
    let name = unique_name("splinter_s4");
    let _cleanup = Cleanup(name.clone());
    let store = Arc::new(Store::create(&name, 8, 64).unwrap());
    store.set("k", b"v").unwrap();

    let poller = Arc::clone(&store);
    let handle = std::thread::spawn(move || {
        let start = Instant::now();
        poller.poll("k", 5_000).unwrap();
        start.elapsed()
    });

    std::thread::sleep(Duration::from_millis(100));
    store.set("k", b"w").unwrap();
    let write_done = Instant::now();

    let poll_elapsed = handle.join().unwrap();
    assert!(poll_elapsed >= Duration::from_millis(100));

    // Poll must return within 200ms of the write that woke it, not just
    // within the overall 5s deadline.
    assert!(write_done.elapsed() < Duration::from_millis(200));
}

#[test]
fn s5_too_small_buffer() {
    let name = unique_name("splinter_s5");
    let _cleanup = Cleanup(name.clone());
    let store = Store::create(&name, 8, 64).unwrap();

    store.set("k", b"abcdef").unwrap();
    let mut buf = [0u8; 3];
    match store.get("k", Some(&mut buf)) {
        Err(Error::WouldOverflow { actual }) => assert_eq!(actual, 6),
        other => panic!("expected WouldOverflow, got {other:?}"),
    }
}

#[test]
fn s7_open_or_create_idempotence() {
    let name = unique_name("splinter_s7");
    let _cleanup = Cleanup(name.clone());

    let a = Store::create(&name, 16, 128).unwrap();
    a.set("shared", b"from-a").unwrap();

    let b = Store::open_or_create(&name, 16, 128).unwrap();
    let got = b.get_owned("shared").unwrap();
    assert_eq!(got, b"from-a");
}

#[test]
fn create_or_open_falls_back_when_exists() {
    let name = unique_name("splinter_create_or_open");
    let _cleanup = Cleanup(name.clone());

    let a = Store::create(&name, 4, 32).unwrap();
    a.set("seed", b"present").unwrap();

    let b = Store::create_or_open(&name, 4, 32).unwrap();
    assert_eq!(b.get_owned("seed").unwrap(), b"present");
}

#[test]
fn full_table_reports_full() {
    let name = unique_name("splinter_full");
    let _cleanup = Cleanup(name.clone());
    let store = Store::create(&name, 4, 16).unwrap();

    for i in 0..4 {
        store.set(&format!("key{i}"), b"v").unwrap();
    }
    match store.set("one-too-many", b"v") {
        Err(Error::Full(n)) => assert_eq!(n, 4),
        other => panic!("expected Full, got {other:?}"),
    }
}

#[test]
fn auto_vacuum_toggle_leaves_residual_bytes_when_off() {
    let name = unique_name("splinter_vacuum_off");
    let _cleanup = Cleanup(name.clone());
    let store = Store::create(&name, 4, 64).unwrap();

    store.set_auto_vacuum(false);
    assert!(!store.get_auto_vacuum());

    store.set("k", b"0123456789").unwrap();
    store.set("k", b"ab").unwrap();

    let snap = store.get_slot_snapshot("k").unwrap();
    assert_eq!(snap.val_len, 2);
    // With auto-vacuum off the tail of the arena is left untouched; the
    // store itself makes no claim about what's there, only that val_len
    // correctly bounds what `get` returns.
    assert_eq!(store.get_owned("k").unwrap(), b"ab");
}

#[test]
fn list_skips_empty_and_unset_slots() {
    let name = unique_name("splinter_list");
    let _cleanup = Cleanup(name.clone());
    let store = Store::create(&name, 8, 32).unwrap();

    store.set("a", b"1").unwrap();
    store.set("b", b"2").unwrap();
    store.unset("a").unwrap();

    let mut keys = store.list();
    keys.sort();
    assert_eq!(keys, vec!["b".to_string()]);
}

#[test]
fn rejects_empty_and_oversized_keys() {
    let name = unique_name("splinter_badkey");
    let _cleanup = Cleanup(name.clone());
    let store = Store::create(&name, 4, 16).unwrap();

    assert!(matches!(
        store.set("", b"x"),
        Err(Error::InvalidArgument(_))
    ));
    let long_key = "k".repeat(64);
    assert!(matches!(
        store.set(&long_key, b"x"),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn rejects_zero_length_and_oversized_values() {
    let name = unique_name("splinter_badval");
    let _cleanup = Cleanup(name.clone());
    let store = Store::create(&name, 4, 16).unwrap();

    assert!(matches!(
        store.set("k", b""),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        store.set("k", &[0u8; 17]),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn open_rejects_bad_magic_on_foreign_object() {
    // A store opened before any create exists should fail cleanly rather
    // than mapping garbage.
    let name = unique_name("splinter_missing");
    match Store::open(&name) {
        Err(Error::Io(_)) => {}
        other => panic!("expected Io error for missing object, got {other:?}"),
    }
}
