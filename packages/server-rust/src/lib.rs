//! `Surge` Server: decouples request latency from a capacity-limited store.
//!
//! Writes are absorbed by a bounded [`queue::WriteQueue`] and flushed in
//! batches by a worker pool; reads go through a TTL [`cache::ReadCache`];
//! every store operation holds a ticket from the [`storage::StoreAdapter`].
//! An accepted write is queued, not yet durable.

pub mod cache;
pub mod cli;
pub mod network;
pub mod queue;
pub mod service;
pub mod storage;

pub use cache::ReadCache;
pub use queue::{QueueError, WriteQueue};
pub use service::{Pipeline, PipelineConfig};
