use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{BatchWriteResult, Document, WriteRecord};

/// The constrained persistent store, seen only through its capacity contract.
///
/// These are the only two operations the pipeline issues against persistence.
/// Implementations do not enforce concurrency limits themselves; the store
/// adapter gates every call behind a ticket.
///
/// Used as `Arc<dyn BackingStore>`.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Read a single document by key. `Ok(None)` means not found.
    async fn read(&self, key: &str) -> Result<Option<Document>, StoreError>;

    /// Apply a batch of records in one operation.
    ///
    /// A partial failure is reported through [`BatchWriteResult::failed`];
    /// an `Err` means the whole batch failed.
    async fn write_batch(&self, records: &[WriteRecord]) -> Result<BatchWriteResult, StoreError>;
}
