//! In-memory [`BackingStore`] that simulates the constrained node.
//!
//! [`MemoryStore`] keeps documents in a [`DashMap`], sleeps for a configurable
//! latency on every operation, and can be switched into an outage where every
//! call fails with [`StoreError::Unavailable`]. Flushed records become
//! readable under [`RecordId::store_key`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use surge_core::{BackingStore, BatchWriteResult, Document, RecordId, StoreError, WriteRecord};

/// Simulated store backed by [`DashMap`].
pub struct MemoryStore {
    documents: DashMap<String, Document>,
    latency: Duration,
    available: AtomicBool,
    reads: AtomicU64,
    batches: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store with no artificial latency.
    #[must_use]
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Creates an empty store that delays every operation by `latency`.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            documents: DashMap::new(),
            latency,
            available: AtomicBool::new(true),
            reads: AtomicU64::new(0),
            batches: AtomicU64::new(0),
        }
    }

    /// Inserts a document directly, bypassing the write path.
    pub fn seed(&self, key: impl Into<String>, value: Document) {
        self.documents.insert(key.into(), value);
    }

    /// Toggles the simulated outage.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Whether the record with `id` has been flushed.
    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.documents.contains_key(&id.store_key())
    }

    /// Total read calls served (including failed ones).
    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Total batch calls served (including failed ones).
    #[must_use]
    pub fn batch_count(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    async fn simulate(&self) -> Result<(), StoreError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::unavailable("simulated outage"))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Document>, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.simulate().await?;
        Ok(self.documents.get(key).map(|doc| doc.value().clone()))
    }

    async fn write_batch(&self, records: &[WriteRecord]) -> Result<BatchWriteResult, StoreError> {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.simulate().await?;
        for record in records {
            self.documents
                .insert(record.id().store_key(), record.payload().clone());
        }
        Ok(BatchWriteResult::all_succeeded(records))
    }
}
