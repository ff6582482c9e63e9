//! Boundary error taxonomy.
//!
//! The original C API conveys errors through a return code plus a
//! thread-local errno-like channel (`EAGAIN`/`EMSGSIZE`/`ETIMEDOUT`). The
//! idiomatic Rust replacement collapses both into one `Result<T, Error>`;
//! callers match on the variant instead of reading a side channel.

/// Every way a boundary operation can fail.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration errors: no store open, null/oversized key, `len == 0`
    /// or `len > max_val_sz` on `set`.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Every slot in the probe chain was occupied by a different key.
    #[error("store is full: all {0} slots probed without a vacancy")]
    Full(u32),

    /// Key absent from the store.
    #[error("key not found")]
    NotFound,

    /// Caller's buffer is smaller than the stored value. Carries the actual
    /// length so the caller can resize and retry.
    #[error("buffer too small: value is {actual} bytes")]
    WouldOverflow { actual: usize },

    /// A writer was observed in progress, or the reader's before/after
    /// sequence-counter snapshot was inconsistent. Transient; retry with
    /// back-off.
    #[error("writer active or torn read observed, retry")]
    Again,

    /// `poll` exceeded its deadline without observing a sequence change.
    #[error("poll timed out")]
    Timeout,

    /// Header magic/version mismatch at `open`. Reported once and aborts
    /// the open.
    #[error("store header is corrupt or incompatible (bad magic/version)")]
    Corrupt,

    /// Mapping-layer failure (file/shm creation, sizing, mmap).
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
