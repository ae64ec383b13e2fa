//! Storage access for the pipeline.
//!
//! - [`TicketPool`]: fixed-capacity permits for concurrent store operations
//! - [`StoreAdapter`]: ticket-gated, timeout-bounded reads and batched writes
//! - [`datastores`]: concrete backing stores (simulated in-memory node)

pub mod adapter;
pub mod datastores;
pub mod tickets;

pub use adapter::{AdapterConfig, StoreAdapter};
pub use datastores::MemoryStore;
pub use tickets::{BusyPolicy, Ticket, TicketPool};
