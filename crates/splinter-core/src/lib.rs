//! Concurrent shared-memory key-value bus: the seqlock-protected store core.
//!
//! One process calls [`Store::create`] (or [`Store::create_or_open`] /
//! [`Store::open_or_create`]); any number of other processes or threads
//! independently [`Store::open`] the same backing object and call
//! [`Store::set`]/[`Store::get`]/[`Store::unset`]/[`Store::list`]/
//! [`Store::poll`] concurrently without any locking beyond the per-slot
//! seqlock embedded in the layout itself.

mod error;
mod hash;
mod key;
mod layout;
mod store;

pub use error::{Error, Result};
pub use hash::fnv1a;
pub use layout::{KEY_MAX, MAGIC, VERSION};
pub use store::{HeaderSnapshot, SlotSnapshot, Store, destroy};
