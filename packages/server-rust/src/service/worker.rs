//! Batch write worker pool.
//!
//! A fixed number of [`BatchWriter`] tasks pull batches from the shared
//! [`WriteQueue`] and flush each one to the store as a single batched write.
//! Records the store reports as failed are retried as a subset with exponential
//! backoff, then handed to the dead-letter sink. Nothing is ever re-enqueued.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use surge_core::{RecordId, StoreError, WriteRecord};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::BatchConfig;
use super::dead_letter::{DeadLetterSink, DropReason};
use super::stats::FlushCounters;
use crate::queue::WriteQueue;
use crate::storage::StoreAdapter;

/// Records a writer has taken off the queue and not yet resolved as flushed
/// or dropped. Empty while the writer waits on the queue.
type InFlight = Mutex<Vec<WriteRecord>>;

/// Shared handles every writer needs.
#[derive(Clone)]
pub struct FlushContext {
    pub queue: Arc<WriteQueue>,
    pub store: Arc<StoreAdapter>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub counters: Arc<FlushCounters>,
    pub batch: BatchConfig,
}

/// How the pool ended when asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JoinOutcome {
    /// Writers that exited on their own after the queue drained.
    pub completed: usize,
    /// Writers still running at the deadline, aborted.
    pub aborted: usize,
    /// Records held by aborted or panicked writers, dead-lettered.
    pub stranded: usize,
}

/// Handle to the running writers.
pub struct BatchWritePool {
    ctx: Arc<FlushContext>,
    writers: Vec<(JoinHandle<()>, Arc<InFlight>)>,
}

impl BatchWritePool {
    /// Spawns `ctx.batch.worker_count` writers on the current runtime.
    #[must_use]
    pub fn start(ctx: FlushContext) -> Self {
        let ctx = Arc::new(ctx);
        let writers = (0..ctx.batch.worker_count)
            .map(|worker_id| {
                let in_flight = Arc::new(InFlight::default());
                let writer = BatchWriter {
                    worker_id,
                    ctx: Arc::clone(&ctx),
                    in_flight: Arc::clone(&in_flight),
                };
                (tokio::spawn(writer.run()), in_flight)
            })
            .collect();
        Self { ctx, writers }
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.writers.len()
    }

    /// Waits for every writer to exit, up to `timeout` in total.
    ///
    /// Writers exit once the queue is closed and drained, so the caller must
    /// close the queue first. Writers still running at the deadline are
    /// aborted. Whatever they were holding goes to the dead-letter sink as
    /// [`DropReason::AbortedInFlight`]; the store may or may not have applied
    /// it.
    pub async fn join(self, timeout: Duration) -> JoinOutcome {
        let Self { ctx, writers } = self;
        let deadline = tokio::time::Instant::now() + timeout;
        let mut outcome = JoinOutcome::default();
        for (mut handle, in_flight) in writers {
            let joined = tokio::time::timeout_at(deadline, &mut handle).await;
            match joined {
                Ok(Ok(())) => outcome.completed += 1,
                Ok(Err(err)) => {
                    warn!(error = %err, "batch writer ended abnormally");
                    outcome.completed += 1;
                }
                Err(_elapsed) => {
                    handle.abort();
                    // Wait for cancellation so the slot is no longer touched.
                    let _ = handle.await;
                    outcome.aborted += 1;
                }
            }
            outcome.stranded += dead_letter_in_flight(&ctx, &in_flight);
        }
        outcome
    }
}

fn dead_letter_in_flight(ctx: &FlushContext, in_flight: &InFlight) -> usize {
    let stranded = std::mem::take(&mut *in_flight.lock());
    let count = stranded.len();
    if count > 0 {
        let reason = DropReason::AbortedInFlight;
        warn!(records = count, "dead-lettering records held by a stopped writer");
        ctx.counters.record_drop(count, reason.label());
        ctx.dead_letters.on_dropped(stranded, &reason);
    }
    count
}

/// One worker of the pool.
pub struct BatchWriter {
    worker_id: usize,
    ctx: Arc<FlushContext>,
    in_flight: Arc<InFlight>,
}

impl BatchWriter {
    async fn run(self) {
        debug!(worker_id = self.worker_id, "batch writer started");
        let BatchConfig {
            batch_size,
            batch_timeout,
            ..
        } = self.ctx.batch;

        loop {
            let batch = self.ctx.queue.dequeue_batch(batch_size, batch_timeout).await;
            if batch.is_empty() {
                if self.ctx.queue.is_closed() {
                    break;
                }
                continue;
            }
            flush_tracked(&self.ctx, batch, Some(&self.in_flight)).await;
        }
        debug!(worker_id = self.worker_id, "batch writer stopped");
    }
}

/// Flushes `batch` and retries whatever fails, until it all lands or the
/// retry budget runs out.
///
/// Each attempt is exactly one batched write covering the records still
/// pending. Returns the number of records dropped.
pub async fn flush_with_retry(ctx: &FlushContext, batch: Vec<WriteRecord>) -> usize {
    flush_tracked(ctx, batch, None).await
}

/// Replaces the contents of `slot` with `records`.
fn publish(slot: Option<&InFlight>, records: &[WriteRecord]) {
    if let Some(slot) = slot {
        let mut held = slot.lock();
        held.clear();
        held.extend_from_slice(records);
    }
}

/// [`flush_with_retry`], keeping `slot` equal to the records not yet
/// resolved at every await point.
async fn flush_tracked(
    ctx: &FlushContext,
    batch: Vec<WriteRecord>,
    slot: Option<&InFlight>,
) -> usize {
    let retry = ctx.batch.retry;
    let mut pending = batch;
    let mut attempt: u32 = 0;
    publish(slot, &pending);

    loop {
        let (failed, last_error): (HashSet<RecordId>, Option<StoreError>) =
            match ctx.store.write_batch(&pending).await {
                Ok(result) => {
                    ctx.counters.record_flush(result.success_count());
                    if result.is_complete() {
                        publish(slot, &[]);
                        return 0;
                    }
                    (result.failed_set(), None)
                }
                Err(err) => {
                    ctx.counters.record_flush(0);
                    warn!(
                        attempt,
                        records = pending.len(),
                        error = %err,
                        kind = err.kind(),
                        "batched write failed"
                    );
                    (pending.iter().map(WriteRecord::id).collect(), Some(err))
                }
            };

        pending.retain(|record| failed.contains(&record.id()));
        if pending.is_empty() {
            publish(slot, &[]);
            return 0;
        }

        if attempt >= retry.max_retries {
            let dropped = pending.len();
            let reason = DropReason::retries_exhausted(attempt + 1, last_error.as_ref());
            publish(slot, &[]);
            ctx.counters.record_drop(dropped, reason.label());
            ctx.dead_letters.on_dropped(pending, &reason);
            return dropped;
        }

        let delay = retry.delay_for(attempt);
        attempt += 1;
        ctx.counters.record_retry(pending.len());
        publish(slot, &pending);
        info!(
            attempt,
            records = pending.len(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "retrying failed subset"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use surge_core::{BackingStore, BatchWriteResult, Document};

    use super::*;
    use crate::service::config::RetryPolicy;
    use crate::service::dead_letter::MemoryDeadLetters;
    use crate::storage::AdapterConfig;

    /// Fails the ids in `poisoned` on every attempt and logs each batch.
    #[derive(Default)]
    struct ScriptedBackend {
        poisoned: HashSet<RecordId>,
        fail_whole_batches: AtomicUsize,
        batches: Mutex<Vec<Vec<RecordId>>>,
    }

    #[async_trait]
    impl BackingStore for ScriptedBackend {
        async fn read(&self, _key: &str) -> Result<Option<Document>, StoreError> {
            Ok(None)
        }

        async fn write_batch(
            &self,
            records: &[WriteRecord],
        ) -> Result<BatchWriteResult, StoreError> {
            self.batches
                .lock()
                .push(records.iter().map(WriteRecord::id).collect());
            if self
                .fail_whole_batches
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::unavailable("flaky"));
            }
            let (failed, succeeded): (Vec<_>, Vec<_>) = records
                .iter()
                .map(WriteRecord::id)
                .partition(|id| self.poisoned.contains(id));
            Ok(BatchWriteResult { succeeded, failed })
        }
    }

    fn context(
        backend: Arc<ScriptedBackend>,
        dead: Arc<MemoryDeadLetters>,
        max_retries: u32,
    ) -> FlushContext {
        FlushContext {
            queue: Arc::new(WriteQueue::new(1000)),
            store: Arc::new(StoreAdapter::new(backend, AdapterConfig::default())),
            dead_letters: dead,
            counters: Arc::new(FlushCounters::default()),
            batch: BatchConfig {
                batch_size: 10,
                batch_timeout: Duration::from_millis(20),
                worker_count: 2,
                retry: RetryPolicy {
                    max_retries,
                    base_delay: Duration::from_millis(10),
                    max_delay: Duration::from_millis(100),
                },
            },
        }
    }

    fn records(range: std::ops::Range<u64>) -> Vec<WriteRecord> {
        range
            .map(|i| WriteRecord::new(RecordId(i), json!(i)))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn retries_only_failed_subset_then_drops() {
        let backend = Arc::new(ScriptedBackend {
            poisoned: [RecordId(1), RecordId(3)].into_iter().collect(),
            ..Default::default()
        });
        let dead = Arc::new(MemoryDeadLetters::new());
        let ctx = context(Arc::clone(&backend), Arc::clone(&dead), 2);

        let dropped = flush_with_retry(&ctx, records(0..5)).await;

        assert_eq!(dropped, 2);
        let batches = backend.batches.lock().clone();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 5);
        assert_eq!(batches[1], vec![RecordId(1), RecordId(3)]);
        assert_eq!(batches[2], vec![RecordId(1), RecordId(3)]);
        assert_eq!(dead.ids(), vec![RecordId(1), RecordId(3)]);
        assert_eq!(ctx.counters.flushed(), 3);
        assert_eq!(ctx.counters.retried(), 4);
        assert_eq!(ctx.counters.dropped(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn whole_batch_error_is_retried_and_recovers() {
        let backend = Arc::new(ScriptedBackend {
            fail_whole_batches: AtomicUsize::new(2),
            ..Default::default()
        });
        let dead = Arc::new(MemoryDeadLetters::new());
        let ctx = context(Arc::clone(&backend), Arc::clone(&dead), 3);

        assert_eq!(flush_with_retry(&ctx, records(0..4)).await, 0);
        assert_eq!(backend.batches.lock().len(), 3);
        assert_eq!(ctx.counters.flushed(), 4);
        assert!(dead.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_drops_on_first_failure() {
        let backend = Arc::new(ScriptedBackend {
            fail_whole_batches: AtomicUsize::new(usize::MAX),
            ..Default::default()
        });
        let dead = Arc::new(MemoryDeadLetters::new());
        let ctx = context(Arc::clone(&backend), Arc::clone(&dead), 0);

        assert_eq!(flush_with_retry(&ctx, records(0..3)).await, 3);
        assert_eq!(backend.batches.lock().len(), 1);
        let taken = dead.take();
        assert!(matches!(
            &taken[0].1,
            DropReason::RetriesExhausted { attempts: 1, last_error } if last_error.contains("flaky")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_between_attempts() {
        let backend = Arc::new(ScriptedBackend {
            poisoned: [RecordId(0)].into_iter().collect(),
            ..Default::default()
        });
        let ctx = context(backend, Arc::new(MemoryDeadLetters::new()), 3);

        let start = tokio::time::Instant::now();
        flush_with_retry(&ctx, records(0..1)).await;
        // 10 + 20 + 40 ms of backoff across three retries.
        assert!(start.elapsed() >= Duration::from_millis(70));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn pool_drains_queue_and_exits_on_close() {
        let backend = Arc::new(ScriptedBackend::default());
        let ctx = context(Arc::clone(&backend), Arc::new(MemoryDeadLetters::new()), 1);
        for i in 0..35 {
            ctx.queue.enqueue(json!(i)).unwrap();
        }

        let pool = BatchWritePool::start(ctx.clone());
        assert_eq!(pool.worker_count(), 2);
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.queue.close();
        let outcome = pool.join(Duration::from_secs(1)).await;

        assert_eq!(
            outcome,
            JoinOutcome {
                completed: 2,
                aborted: 0,
                stranded: 0
            }
        );
        assert_eq!(ctx.counters.flushed(), 35);
        let mut seen: Vec<RecordId> = backend.batches.lock().iter().flatten().copied().collect();
        seen.sort();
        assert_eq!(seen, (0..35).map(RecordId).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_writer_dead_letters_only_unresolved_records() {
        let backend = Arc::new(ScriptedBackend {
            poisoned: [RecordId(1), RecordId(3)].into_iter().collect(),
            ..Default::default()
        });
        let dead = Arc::new(MemoryDeadLetters::new());
        let mut ctx = context(Arc::clone(&backend), Arc::clone(&dead), 5);
        ctx.batch.retry.base_delay = Duration::from_secs(10);
        ctx.batch.retry.max_delay = Duration::from_secs(10);
        for i in 0..5 {
            ctx.queue.enqueue(json!(i)).unwrap();
        }

        let pool = BatchWritePool::start(ctx.clone());
        // First attempt lands 0, 2 and 4; the writer then backs off for 10 s.
        tokio::time::sleep(Duration::from_millis(100)).await;
        ctx.queue.close();
        let outcome = pool.join(Duration::from_secs(1)).await;

        assert_eq!(
            outcome,
            JoinOutcome {
                completed: 1,
                aborted: 1,
                stranded: 2
            }
        );
        let taken = dead.take();
        let ids: Vec<RecordId> = taken.iter().map(|(r, _)| r.id()).collect();
        assert_eq!(ids, vec![RecordId(1), RecordId(3)]);
        assert!(taken.iter().all(|(_, reason)| *reason == DropReason::AbortedInFlight));
        assert_eq!(ctx.counters.flushed(), 3);
        assert_eq!(ctx.counters.dropped(), 2);
        assert_eq!(ctx.counters.flushed() + ctx.counters.dropped(), 5);
    }
}
