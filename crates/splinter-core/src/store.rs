//! The boundary: mapper (create/open) plus the seqlock-protected slot engine,
//! watcher, and observer.
//!
//! `Store` is a handle, not a process-global singleton: the original's
//! single-process "current mapping" global was a convenience that has no
//! place in a library binding used from multiple threads or processes at
//! once. Every boundary operation takes `&self`; synchronization across
//! concurrent callers (threads sharing one `Store`, or independent
//! processes each holding their own mapping of the same backing object) is
//! provided entirely by the per-slot seqlock protocol, not by Rust's borrow
//! checker. `Store` is therefore `Send + Sync` by an explicit unsafe
//! assertion: every mutation of shared bytes goes through an atomic field
//! or is bracketed by the seqlock.

#[cfg(feature = "persistent")]
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use splinter_mmap::MmapFileMut;

use crate::error::{Error, Result};
use crate::hash;
use crate::key;
use crate::layout::{self, Header, KEY_MAX, MAGIC, Slot, VERSION};

/// Sleep quantum between `poll` retries.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Point-in-time copy of the header, taken with acquire loads of its atomic
/// fields but without any seqlock validation. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderSnapshot {
    pub magic: u32,
    pub version: u32,
    pub slots: u32,
    pub max_val_sz: u32,
    pub epoch: u64,
    pub auto_vacuum: u32,
    pub parse_failures: u64,
    pub last_failure_epoch: u64,
}

/// Point-in-time copy of a slot, taken with acquire loads but without
/// seqlock validation. Diagnostic only — never used by the core itself to
/// decide correctness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub hash: u64,
    pub epoch: u64,
    pub val_off: u32,
    pub val_len: u32,
    pub key: String,
}

/// A handle to a mapped splinter store. Cheap to hold, expensive to create
/// (one `create`/`open` per handle); clone the handle's name and reopen in
/// each thread/process rather than trying to share file descriptors.
pub struct Store {
    _mapping: MmapFileMut,
    base: *mut u8,
    slots_base: *mut Slot,
    values_base: *mut u8,
    n_slots: u32,
    max_val_sz: u32,
}

// SAFETY: all mutable access to shared bytes goes through an atomic field
// (hash, epoch, val_len, header.epoch, header.auto_vacuum) or is bracketed
// by the per-slot seqlock (arena bytes, key buffer). The raw pointers here
// never alias a safe `&mut` with concurrent unsynchronized access.
unsafe impl Send for Store {}
unsafe impl Sync for Store {}

impl Store {
    fn from_mapping(mut mapping: MmapFileMut, n_slots: u32, max_val_sz: u32) -> Self {
        let base = mapping.as_mut_ptr();
        // SAFETY: the mapping is sized to hold Header + n_slots*Slot + arena
        // (by construction in `create`, or validated in `open`).
        let slots_base = unsafe { base.add(layout::slots_offset()) as *mut Slot };
        let values_base = unsafe { base.add(layout::values_offset(n_slots)) };
        Self {
            _mapping: mapping,
            base,
            slots_base,
            values_base,
            n_slots,
            max_val_sz,
        }
    }

    fn init_header(&mut self, slots: u32, max_val_sz: u32) {
        // SAFETY: sole owner immediately after a fresh create-exclusive
        // mapping; the backing pages are zero-filled by the OS but we write
        // every field explicitly rather than relying on that.
        unsafe {
            std::ptr::write(
                self.base as *mut Header,
                Header {
                    magic: MAGIC,
                    version: VERSION,
                    slots,
                    max_val_sz,
                    epoch: AtomicU64::new(1),
                    auto_vacuum: AtomicU32::new(1),
                    _pad0: 0,
                    parse_failures: AtomicU64::new(0),
                    last_failure_epoch: AtomicU64::new(0),
                },
            );
            for i in 0..slots as usize {
                std::ptr::write(
                    self.slots_base.add(i),
                    Slot {
                        hash: AtomicU64::new(0),
                        epoch: AtomicU64::new(0),
                        val_off: (i as u32) * max_val_sz,
                        val_len: AtomicU32::new(0),
                        key: [0u8; KEY_MAX],
                    },
                );
            }
        }
    }

    /// Creates a new store with create-exclusive semantics: fails if the
    /// backing object already exists.
    pub fn create(name: &str, slots: u32, max_val_sz: u32) -> Result<Self> {
        if slots == 0 {
            return Err(Error::InvalidArgument("slots must be nonzero"));
        }
        if max_val_sz == 0 {
            return Err(Error::InvalidArgument("max_val_sz must be nonzero"));
        }
        let total = layout::total_size(slots, max_val_sz);

        #[cfg(not(feature = "persistent"))]
        let mapping = MmapFileMut::create_shm_exclusive(name, total)?;
        #[cfg(feature = "persistent")]
        let mapping = MmapFileMut::create_file_rw(name, total)?;

        let mut store = Self::from_mapping(mapping, slots, max_val_sz);
        store.init_header(slots, max_val_sz);
        tracing::debug!(name, slots, max_val_sz, "created splinter store");
        Ok(store)
    }

    /// Opens an existing store. Validates `magic`/`version`; never rewrites
    /// the header.
    pub fn open(name: &str) -> Result<Self> {
        #[cfg(not(feature = "persistent"))]
        let mapping = MmapFileMut::open_shm_rw(name)?;
        #[cfg(feature = "persistent")]
        let mapping = MmapFileMut::open_file_rw(name)?;

        if mapping.len() < Header::SIZE {
            return Err(Error::Corrupt);
        }
        // SAFETY: reading the fixed header fields before we know `slots` to
        // compute the rest of the layout; these fields are set once at
        // creation and never change, so reading them before validating
        // magic/version is safe — if the object isn't actually a splinter
        // store, the check below rejects it.
        let (magic, version, slots, max_val_sz) = unsafe {
            let h = &*(mapping.as_ptr() as *const Header);
            (h.magic, h.version, h.slots, h.max_val_sz)
        };
        if magic != MAGIC || version != VERSION {
            tracing::warn!(name, magic, version, "splinter store header mismatch");
            return Err(Error::Corrupt);
        }
        let expected = layout::total_size(slots, max_val_sz);
        if (mapping.len() as u64) < expected {
            return Err(Error::Corrupt);
        }
        tracing::debug!(name, slots, max_val_sz, "opened splinter store");
        Ok(Self::from_mapping(mapping, slots, max_val_sz))
    }

    /// Tries `create` first; on any failure, falls back to `open`.
    pub fn create_or_open(name: &str, slots: u32, max_val_sz: u32) -> Result<Self> {
        match Self::create(name, slots, max_val_sz) {
            Ok(store) => Ok(store),
            Err(_) => Self::open(name),
        }
    }

    /// Tries `open` first; on any failure, falls back to `create`.
    pub fn open_or_create(name: &str, slots: u32, max_val_sz: u32) -> Result<Self> {
        match Self::open(name) {
            Ok(store) => Ok(store),
            Err(_) => Self::create(name, slots, max_val_sz),
        }
    }

    /// Unmaps the store. Equivalent to dropping the handle; provided as an
    /// explicit counterpart to `create`/`open`.
    pub fn close(self) {
        drop(self);
    }

    #[inline]
    fn header(&self) -> &Header {
        // SAFETY: base always points at a valid Header for the lifetime of
        // the mapping.
        unsafe { &*(self.base as *const Header) }
    }

    #[inline]
    fn slot_ptr(&self, i: usize) -> *mut Slot {
        // SAFETY: i is always reduced modulo n_slots by callers.
        unsafe { self.slots_base.add(i) }
    }

    #[inline]
    fn hash_ref(&self, i: usize) -> &AtomicU64 {
        unsafe { &(*self.slot_ptr(i)).hash }
    }

    #[inline]
    fn epoch_ref(&self, i: usize) -> &AtomicU64 {
        unsafe { &(*self.slot_ptr(i)).epoch }
    }

    #[inline]
    fn val_len_ref(&self, i: usize) -> &AtomicU32 {
        unsafe { &(*self.slot_ptr(i)).val_len }
    }

    /// `val_off` is assigned once at creation and never changes; reading it
    /// plainly is safe at any time.
    #[inline]
    fn val_off(&self, i: usize) -> u32 {
        unsafe { (*self.slot_ptr(i)).val_off }
    }

    #[inline]
    fn key_ptr_mut(&self, i: usize) -> *mut u8 {
        unsafe { (&raw mut (*self.slot_ptr(i)).key) as *mut u8 }
    }

    #[inline]
    fn key_ptr_const(&self, i: usize) -> *const u8 {
        unsafe { (&raw const (*self.slot_ptr(i)).key) as *const u8 }
    }

    /// Reads the current key buffer bytes for matching. This is a plain,
    /// unsynchronized read that may race a concurrent writer republishing
    /// the same slot — exactly as the original's `strncmp(slot->key, ...)`
    /// does; the key compare happens before the seqlock's start/end
    /// bracket, not inside it.
    #[inline]
    fn read_key_bytes(&self, i: usize) -> [u8; KEY_MAX] {
        unsafe { std::ptr::read(self.key_ptr_const(i) as *const [u8; KEY_MAX]) }
    }

    #[inline]
    fn base_index(&self, h: u64) -> usize {
        (h % self.n_slots as u64) as usize
    }

    #[inline]
    fn auto_vacuum_enabled(&self) -> bool {
        self.header().auto_vacuum.load(Ordering::Acquire) != 0
    }

    /// Sets `key` to `val`, publishing it atomically via the per-slot
    /// seqlock.
    pub fn set(&self, key_str: &str, val: &[u8]) -> Result<()> {
        let key_bytes = key::validate_key(key_str)?;
        let len = val.len();
        if len == 0 {
            return Err(Error::InvalidArgument("value length must be nonzero"));
        }
        if len > self.max_val_sz as usize {
            return Err(Error::InvalidArgument("value exceeds max_val_sz"));
        }

        let h = hash::fnv1a(key_str);
        let base = self.base_index(h);
        let n = self.n_slots as usize;
        let arena_bytes = n as u64 * self.max_val_sz as u64;

        for p in 0..n {
            let idx = (base + p) % n;

            // Step 1: target selection.
            let slot_hash = self.hash_ref(idx).load(Ordering::Acquire);
            let eligible = slot_hash == 0
                || (slot_hash == h && key::key_matches(&self.read_key_bytes(idx), key_str));
            if !eligible {
                continue;
            }

            // Step 2: enter seqlock.
            let e = self.epoch_ref(idx).load(Ordering::Relaxed);
            if e % 2 == 1 {
                // Writer active on this slot; don't spin here, try another.
                continue;
            }
            if self
                .epoch_ref(idx)
                .compare_exchange(e, e + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            // We are now the sole writer for this slot.
            let val_off = self.val_off(idx) as u64;
            if val_off >= arena_bytes || val_off + len as u64 > arena_bytes {
                // Step 3: corrupt layout, abort the critical section.
                self.epoch_ref(idx).fetch_add(1, Ordering::Release);
                return Err(Error::InvalidArgument(
                    "slot value offset out of range (corrupt store)",
                ));
            }

            let auto_vacuum = self.auto_vacuum_enabled();

            // Step 4: write body.
            unsafe {
                let arena = self.values_base.add(val_off as usize);
                if auto_vacuum {
                    std::ptr::write_bytes(arena, 0, self.max_val_sz as usize);
                }
                std::ptr::copy_nonoverlapping(val.as_ptr(), arena, len);
            }
            self.val_len_ref(idx).store(len as u32, Ordering::Release);

            unsafe {
                let key_ptr = self.key_ptr_mut(idx);
                if auto_vacuum {
                    std::ptr::write_bytes(key_ptr, 0, KEY_MAX);
                } else {
                    *key_ptr = 0;
                }
                std::ptr::copy_nonoverlapping(key_bytes.as_ptr(), key_ptr, key_bytes.len());
                *key_ptr.add(key_bytes.len()) = 0;
            }

            std::sync::atomic::fence(Ordering::Release);
            self.hash_ref(idx).store(h, Ordering::Release);

            // Step 5: leave seqlock.
            self.epoch_ref(idx).fetch_add(1, Ordering::Release);
            self.header().epoch.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        Err(Error::Full(self.n_slots))
    }

    /// Gets the value of `key` into `buf` (if provided). Returns the
    /// value's length on success.
    pub fn get(&self, key_str: &str, buf: Option<&mut [u8]>) -> Result<usize> {
        key::validate_key(key_str)?;
        let h = hash::fnv1a(key_str);
        let base = self.base_index(h);
        let n = self.n_slots as usize;

        for p in 0..n {
            let idx = (base + p) % n;

            let slot_hash = self.hash_ref(idx).load(Ordering::Acquire);
            if slot_hash != h {
                continue;
            }
            if !key::key_matches(&self.read_key_bytes(idx), key_str) {
                continue;
            }

            let start = self.epoch_ref(idx).load(Ordering::Acquire);
            if start % 2 == 1 {
                return Err(Error::Again);
            }

            let len = self.val_len_ref(idx).load(Ordering::Acquire) as usize;

            if let Some(buf) = buf {
                if buf.len() < len {
                    return Err(Error::WouldOverflow { actual: len });
                }
                unsafe {
                    let arena = self.values_base.add(self.val_off(idx) as usize);
                    std::ptr::copy_nonoverlapping(arena, buf.as_mut_ptr(), len);
                }
            }

            let end = self.epoch_ref(idx).load(Ordering::Acquire);
            if start == end && end % 2 == 0 {
                return Ok(len);
            }
            return Err(Error::Again);
        }

        Err(Error::NotFound)
    }

    /// Removes `key`, returning the length of the value that was removed.
    pub fn unset(&self, key_str: &str) -> Result<usize> {
        key::validate_key(key_str)?;
        let h = hash::fnv1a(key_str);
        let base = self.base_index(h);
        let n = self.n_slots as usize;

        for p in 0..n {
            let idx = (base + p) % n;

            let slot_hash = self.hash_ref(idx).load(Ordering::Acquire);
            if slot_hash != h {
                continue;
            }
            if !key::key_matches(&self.read_key_bytes(idx), key_str) {
                continue;
            }

            let epoch = self.epoch_ref(idx).load(Ordering::Acquire);
            if epoch % 2 == 1 {
                return Err(Error::Again);
            }

            let len = self.val_len_ref(idx).load(Ordering::Acquire) as usize;
            self.hash_ref(idx).store(0, Ordering::Release);

            let auto_vacuum = self.auto_vacuum_enabled();
            unsafe {
                if auto_vacuum {
                    std::ptr::write_bytes(self.key_ptr_mut(idx), 0, KEY_MAX);
                    let arena = self.values_base.add(self.val_off(idx) as usize);
                    std::ptr::write_bytes(arena, 0, self.max_val_sz as usize);
                } else {
                    *self.key_ptr_mut(idx) = 0;
                }
            }
            self.val_len_ref(idx).store(0, Ordering::Release);
            self.epoch_ref(idx).fetch_add(2, Ordering::Release);
            self.header().epoch.fetch_add(1, Ordering::Relaxed);

            return Ok(len);
        }

        Err(Error::NotFound)
    }

    /// Lists non-empty keys in slot order. Not atomic as a whole: may
    /// include keys concurrently being unset, or omit keys concurrently
    /// being set.
    pub fn list(&self) -> Vec<String> {
        let n = self.n_slots as usize;
        let mut out = Vec::new();
        for i in 0..n {
            let h = self.hash_ref(i).load(Ordering::Acquire);
            if h == 0 {
                continue;
            }
            if self.val_len_ref(i).load(Ordering::Acquire) == 0 {
                continue;
            }
            out.push(key::key_to_string(&self.read_key_bytes(i)));
        }
        out
    }

    /// Blocks, by polling rather than a condition variable (no waiter list
    /// lives in shared memory), until `key`'s sequence counter advances or
    /// `timeout_ms` elapses.
    pub fn poll(&self, key_str: &str, timeout_ms: u64) -> Result<()> {
        key::validate_key(key_str)?;
        let h = hash::fnv1a(key_str);
        let base = self.base_index(h);
        let n = self.n_slots as usize;

        let mut found = None;
        for p in 0..n {
            let idx = (base + p) % n;
            let slot_hash = self.hash_ref(idx).load(Ordering::Acquire);
            if slot_hash != h {
                continue;
            }
            if key::key_matches(&self.read_key_bytes(idx), key_str) {
                found = Some(idx);
                break;
            }
        }
        let idx = found.ok_or(Error::NotFound)?;

        let start = self.epoch_ref(idx).load(Ordering::Acquire);
        if start % 2 == 1 {
            return Err(Error::Again);
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let cur = self.epoch_ref(idx).load(Ordering::Acquire);
            if cur % 2 == 1 {
                return Err(Error::Again);
            }
            if cur != start {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Copies header fields with acquire loads of the atomic ones.
    /// Diagnostic only, not seqlock-validated.
    pub fn get_header_snapshot(&self) -> HeaderSnapshot {
        let h = self.header();
        HeaderSnapshot {
            magic: h.magic,
            version: h.version,
            slots: h.slots,
            max_val_sz: h.max_val_sz,
            epoch: h.epoch.load(Ordering::Acquire),
            auto_vacuum: h.auto_vacuum.load(Ordering::Acquire),
            parse_failures: h.parse_failures.load(Ordering::Acquire),
            last_failure_epoch: h.last_failure_epoch.load(Ordering::Acquire),
        }
    }

    /// Copies a slot's `hash`, `epoch`, `val_off`, `val_len`, and `key` with
    /// acquire loads. Diagnostic only, not seqlock-validated.
    pub fn get_slot_snapshot(&self, key_str: &str) -> Result<SlotSnapshot> {
        key::validate_key(key_str)?;
        let h = hash::fnv1a(key_str);
        let base = self.base_index(h);
        let n = self.n_slots as usize;

        for p in 0..n {
            let idx = (base + p) % n;
            let slot_hash = self.hash_ref(idx).load(Ordering::Acquire);
            if slot_hash != h {
                continue;
            }
            let stored_key = self.read_key_bytes(idx);
            if !key::key_matches(&stored_key, key_str) {
                continue;
            }
            return Ok(SlotSnapshot {
                hash: slot_hash,
                epoch: self.epoch_ref(idx).load(Ordering::Acquire),
                val_off: self.val_off(idx),
                val_len: self.val_len_ref(idx).load(Ordering::Acquire),
                key: key::key_to_string(&stored_key),
            });
        }
        Err(Error::InvalidArgument("key not found for slot snapshot"))
    }

    pub fn set_auto_vacuum(&self, enabled: bool) {
        self.header()
            .auto_vacuum
            .store(if enabled { 1 } else { 0 }, Ordering::Release);
    }

    pub fn get_auto_vacuum(&self) -> bool {
        self.auto_vacuum_enabled()
    }

    pub fn slots(&self) -> u32 {
        self.n_slots
    }

    pub fn max_val_sz(&self) -> u32 {
        self.max_val_sz
    }

    /// Reads the full value of `key` into a freshly allocated `Vec<u8>`.
    /// Convenience wrapper over `get` for callers that don't want to manage
    /// a reusable buffer.
    pub fn get_owned(&self, key_str: &str) -> Result<Vec<u8>> {
        let len = self.get(key_str, None)?;
        let mut buf = vec![0u8; len];
        // The value may have shrunk between the two calls; trust the second
        // call's own returned length, not the first call's `len`.
        let len = self.get(key_str, Some(&mut buf))?;
        buf.truncate(len);
        Ok(buf)
    }
}

/// Removes the backing object by name. Destruction is always external to
/// the running store (there is no "delete" boundary operation); exposed
/// for administrative tooling and tests that choose to reclaim a bus.
pub fn destroy(name: &str) -> Result<()> {
    #[cfg(not(feature = "persistent"))]
    {
        splinter_mmap::shm_unlink(name)?;
    }
    #[cfg(feature = "persistent")]
    {
        std::fs::remove_file(Path::new(name))?;
    }
    Ok(())
}
