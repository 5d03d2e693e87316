//! Reference backing stores.
//!
//! The production storage engine lives outside this crate; these implement
//! [`BackingStore`](super::BackingStore) for tests and standalone use.

mod local;
mod memory;

pub use local::LocalBackend;
pub use memory::MemoryBackend;
