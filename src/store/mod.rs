//! Store collaborator — the backing key-value store the engine runs
//! against.
//!
//! # Modules
//!
//! - [`traits`] — [`RangeStore`] contract and [`RangeListener`] callbacks.
//! - [`memory`] — [`MemoryStore`], an ordered in-memory backend with a
//!   cooperative delivery queue.

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::{RangeListener, RangeStore, SubscriptionId};
