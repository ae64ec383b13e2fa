//! Concrete [`BackingStore`](surge_core::BackingStore) implementations.

pub mod memory;

pub use memory::MemoryStore;
