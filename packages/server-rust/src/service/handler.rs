//! Per-request orchestration: cache-first reads, then queued writes.
//!
//! A unit of work resolves its reads (cache, then store on miss), enqueues its
//! writes, and responds without waiting for any write to reach the store.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::distr::Alphanumeric;
use rand::Rng;
use serde_json::json;
use surge_core::{Document, RecordId};
use tower::Service;
use tracing::{debug, trace};

use super::config::{HandlerConfig, OverflowPolicy};
use super::unit::{ReadOutcome, RequestError, UnitOfWork, UnitResult, UnitState};
use crate::cache::ReadCache;
use crate::queue::{QueueError, WriteQueue};
use crate::storage::StoreAdapter;

/// Shared-handle request handler. Cheap to clone.
#[derive(Clone)]
pub struct RequestHandler {
    cache: Arc<ReadCache>,
    queue: Arc<WriteQueue>,
    store: Arc<StoreAdapter>,
    config: HandlerConfig,
}

impl RequestHandler {
    #[must_use]
    pub fn new(
        cache: Arc<ReadCache>,
        queue: Arc<WriteQueue>,
        store: Arc<StoreAdapter>,
        config: HandlerConfig,
    ) -> Self {
        Self {
            cache,
            queue,
            store,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Runs one unit of work through `Received → ReadsResolved →
    /// WritesQueued → Responded`.
    ///
    /// Writes accepted before a failure stay queued; they are never retracted.
    ///
    /// # Errors
    ///
    /// [`RequestError::Store`] if a read missed the cache and the store read
    /// failed; no writes are queued in that case. [`RequestError::Backpressure`]
    /// if the queue filled up under [`OverflowPolicy::RejectRequest`].
    /// [`RequestError::ShuttingDown`] once the queue is closed.
    pub async fn handle(&self, unit: UnitOfWork) -> Result<UnitResult, RequestError> {
        let mut state = UnitState::Received;

        let reads = self.resolve_reads().await?;
        state = state.advance();
        trace!(unit = %unit.id, ?state);

        let (writes_accepted, writes_rejected) = self.queue_writes(&unit)?;
        state = state.advance();
        trace!(unit = %unit.id, ?state);

        state = state.advance();
        debug!(
            unit = %unit.id,
            ?state,
            cached = reads.iter().filter(|r| r.cached).count(),
            writes_accepted,
            writes_rejected,
            "unit of work responded"
        );

        Ok(UnitResult {
            unit_id: unit.id,
            reads,
            writes_accepted,
            writes_rejected,
        })
    }

    async fn resolve_reads(&self) -> Result<Vec<ReadOutcome>, RequestError> {
        let mut reads = Vec::with_capacity(self.config.reads_per_unit);
        for index in 0..self.config.reads_per_unit as u64 {
            let key = RecordId(index).store_key();

            if let Some(value) = self.cache.get(&key) {
                reads.push(ReadOutcome {
                    key,
                    value: Some(value),
                    cached: true,
                });
                continue;
            }

            let value = match self.store.read(&key).await {
                Ok(value) => value,
                Err(source) => return Err(RequestError::Store { key, source }),
            };
            // Not-found is not cached.
            if let Some(found) = &value {
                self.cache.put(key.clone(), found.clone());
            }
            reads.push(ReadOutcome {
                key,
                value,
                cached: false,
            });
        }
        Ok(reads)
    }

    fn queue_writes(&self, unit: &UnitOfWork) -> Result<(usize, usize), RequestError> {
        let mut accepted = 0;
        let mut rejected = 0;
        for index in 0..self.config.writes_per_unit {
            match self.queue.enqueue(self.write_document(unit, index)) {
                Ok(_) => accepted += 1,
                Err(QueueError::Full { .. }) => match self.config.overflow_policy {
                    OverflowPolicy::RejectRequest => {
                        return Err(RequestError::Backpressure { accepted });
                    }
                    OverflowPolicy::DropWrite => rejected += 1,
                },
                Err(QueueError::Closed) => return Err(RequestError::ShuttingDown { accepted }),
            }
        }
        Ok((accepted, rejected))
    }

    fn write_document(&self, unit: &UnitOfWork, index: usize) -> Document {
        let payload: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(self.config.payload_size)
            .map(char::from)
            .collect();
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        json!({
            "type": "write",
            "unit": unit.id,
            "index": index,
            "payload": payload,
            "timestampMs": timestamp_ms,
        })
    }
}

impl Service<UnitOfWork> for RequestHandler {
    type Response = UnitResult;
    type Error = RequestError;
    type Future = Pin<Box<dyn Future<Output = Result<UnitResult, RequestError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, unit: UnitOfWork) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { handler.handle(unit).await })
    }
}
