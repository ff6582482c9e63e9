//! Key-buffer encoding/matching helpers shared by the slot engine.

use crate::error::{Error, Result};
use crate::layout::KEY_MAX;

/// Validates `key` fits in the fixed key buffer (leaving room for the nul
/// terminator) and returns its raw bytes.
pub fn validate_key(key: &str) -> Result<&[u8]> {
    let bytes = key.as_bytes();
    if bytes.is_empty() {
        return Err(Error::InvalidArgument("key must not be empty"));
    }
    if bytes.len() > KEY_MAX - 1 {
        return Err(Error::InvalidArgument("key exceeds maximum length"));
    }
    Ok(bytes)
}

/// True if `stored` (a nul-terminated key buffer) holds exactly `key`.
pub fn key_matches(stored: &[u8; KEY_MAX], key: &str) -> bool {
    let bytes = key.as_bytes();
    if bytes.len() >= KEY_MAX {
        return false;
    }
    &stored[..bytes.len()] == bytes && stored[bytes.len()] == 0
}

/// Reads the nul-terminated string out of a key buffer.
pub fn key_to_string(stored: &[u8; KEY_MAX]) -> String {
    let end = stored.iter().position(|&b| b == 0).unwrap_or(KEY_MAX);
    String::from_utf8_lossy(&stored[..end]).into_owned()
}
