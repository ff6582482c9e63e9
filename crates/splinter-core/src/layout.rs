//! On-shm binary layout: Header, then Slot[0..N), then a contiguous N*V-byte
//! value arena. Host-endian, versioned, naturally aligned; `#[repr(C)]` to
//! pin field order.

use std::sync::atomic::{AtomicU32, AtomicU64};

/// Fixed 32-bit constant identifying the format. ASCII hex of "SLNT" folded
/// into a u32, matching the original's `SPLINTER_MAGIC`.
pub const MAGIC: u32 = 0x534C_4E54;

/// Current on-shm layout version. Bump on any incompatible layout change.
pub const VERSION: u32 = 1;

/// Per-slot key buffer size in bytes, matching the original's `KEY_MAX`.
pub const KEY_MAX: usize = 64;

/// `magic`, `version`, `slots`, and `max_val_sz` are set once at creation
/// and never change again, so they are plain fields rather than atomics.
#[repr(C)]
pub struct Header {
    pub magic: u32,
    pub version: u32,
    pub slots: u32,
    pub max_val_sz: u32,
    /// Monotonic global activity counter. Relaxed fetch-add on every
    /// successful write/unset; readers never depend on it for correctness.
    pub epoch: AtomicU64,
    /// 0 or 1. When 1, writers/unset zero the slot's value region and key
    /// buffer before publishing.
    pub auto_vacuum: AtomicU32,
    _pad0: u32,
    /// Reserved diagnostic counters. The core never writes these; left for
    /// boundary-layer callers that detect malformed payloads.
    pub parse_failures: AtomicU64,
    pub last_failure_epoch: AtomicU64,
}

impl Header {
    pub const SIZE: usize = std::mem::size_of::<Header>();
}

/// A single fixed-capacity key-value entry.
///
/// Invariant: on a slot whose `epoch` is even, either `hash == 0` or the
/// `key` buffer is a nul-terminated string whose fnv1a hash matches `hash`,
/// `val_len <= max_val_sz`, and the first `val_len` bytes of the slot's
/// arena region hold the value.
#[repr(C)]
pub struct Slot {
    /// `0` means empty. Any other value is the fnv1a hash of the current key.
    pub hash: AtomicU64,
    /// Seqlock sequence counter: even = stable, odd = writer active.
    pub epoch: AtomicU64,
    /// Byte offset within the value arena. Assigned once at creation to
    /// `i * max_val_sz`; never changes afterward.
    pub val_off: u32,
    /// Current value length in bytes, `0 <= val_len <= max_val_sz`.
    pub val_len: AtomicU32,
    /// Nul-terminated key buffer. Only meaningful while `hash != 0`.
    pub key: [u8; KEY_MAX],
}

impl Slot {
    pub const SIZE: usize = std::mem::size_of::<Slot>();
}

/// Computes the total number of bytes the backing object must be sized to
/// hold a store with `slots` entries of `max_val_sz` bytes each.
pub fn total_size(slots: u32, max_val_sz: u32) -> u64 {
    Header::SIZE as u64
        + (slots as u64) * (Slot::SIZE as u64)
        + (slots as u64) * (max_val_sz as u64)
}

/// Byte offset of `Slot[0]` within the mapping.
pub fn slots_offset() -> usize {
    Header::SIZE
}

/// Byte offset of the value arena's first byte within the mapping.
pub fn values_offset(slots: u32) -> usize {
    Header::SIZE + (slots as usize) * Slot::SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_is_8_byte_multiple() {
        assert_eq!(Header::SIZE % 8, 0);
    }

    #[test]
    fn slot_size_is_8_byte_multiple() {
        assert_eq!(Slot::SIZE % 8, 0);
    }

    #[test]
    fn total_size_matches_manual_sum() {
        let slots = 8u32;
        let max_val_sz = 64u32;
        let expected =
            Header::SIZE as u64 + slots as u64 * Slot::SIZE as u64 + slots as u64 * max_val_sz as u64;
        assert_eq!(total_size(slots, max_val_sz), expected);
    }

    #[test]
    fn values_offset_follows_slot_array() {
        let slots = 8u32;
        assert_eq!(
            values_offset(slots),
            slots_offset() + slots as usize * Slot::SIZE
        );
    }
}
