//! End-to-end behavior of queue, workers and store adapter under load,
//! backpressure and partial failure.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use surge_core::{BackingStore, BatchWriteResult, Document, RecordId, StoreError, WriteRecord};
use surge_server::queue::{QueueError, WriteQueue};
use surge_server::service::{
    BatchConfig, BatchWritePool, FlushContext, FlushCounters, MemoryDeadLetters, Pipeline,
    PipelineConfig, RetryPolicy, ShutdownPolicy,
};
use surge_server::storage::{AdapterConfig, BusyPolicy, MemoryStore, StoreAdapter};
use tokio::time::Instant;

/// Records every batch it receives; fails `poisoned` ids every time.
#[derive(Default)]
struct RecordingStore {
    poisoned: HashSet<RecordId>,
    batches: Mutex<Vec<(Instant, Vec<RecordId>)>>,
}

impl RecordingStore {
    fn poisoned(ids: impl IntoIterator<Item = RecordId>) -> Self {
        Self {
            poisoned: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(|(_, ids)| ids.len()).collect()
    }

    fn all_ids(&self) -> Vec<RecordId> {
        self.batches
            .lock()
            .iter()
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }
}

#[async_trait]
impl BackingStore for RecordingStore {
    async fn read(&self, _key: &str) -> Result<Option<Document>, StoreError> {
        Ok(None)
    }

    async fn write_batch(&self, records: &[WriteRecord]) -> Result<BatchWriteResult, StoreError> {
        let ids: Vec<RecordId> = records.iter().map(WriteRecord::id).collect();
        self.batches.lock().push((Instant::now(), ids.clone()));
        let (failed, succeeded) = ids.into_iter().partition(|id| self.poisoned.contains(id));
        Ok(BatchWriteResult { succeeded, failed })
    }
}

fn flush_context(
    queue: Arc<WriteQueue>,
    backend: Arc<dyn BackingStore>,
    batch: BatchConfig,
) -> FlushContext {
    FlushContext {
        queue,
        store: Arc::new(StoreAdapter::new(
            backend,
            AdapterConfig {
                ticket_capacity: 4,
                busy_policy: BusyPolicy::Queue {
                    max_wait: Duration::from_secs(10),
                    max_waiters: 64,
                },
                ..AdapterConfig::default()
            },
        )),
        dead_letters: Arc::new(MemoryDeadLetters::new()),
        counters: Arc::new(FlushCounters::default()),
        batch,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_no_loss_no_duplication() {
    let backend = Arc::new(RecordingStore::default());
    let queue = Arc::new(WriteQueue::new(100_000));
    let ctx = flush_context(
        Arc::clone(&queue),
        backend.clone(),
        BatchConfig {
            batch_size: 64,
            batch_timeout: Duration::from_millis(5),
            worker_count: 4,
            retry: RetryPolicy::default(),
        },
    );
    let pool = BatchWritePool::start(ctx.clone());

    let mut producers = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let queue = Arc::clone(&queue);
        producers.spawn(async move {
            for i in 0..1000 {
                queue.enqueue(json!(i)).unwrap();
                if i % 100 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        });
    }
    while let Some(done) = producers.join_next().await {
        done.unwrap();
    }

    queue.close();
    let outcome = pool.join(Duration::from_secs(30)).await;
    assert_eq!(outcome.aborted, 0);

    let ids = backend.all_ids();
    assert_eq!(ids.len(), 8000);
    let mut counts: HashMap<RecordId, usize> = HashMap::new();
    for id in ids {
        *counts.entry(id).or_default() += 1;
    }
    assert_eq!(counts.len(), 8000);
    assert!(counts.values().all(|&n| n == 1));
    assert_eq!(ctx.counters.flushed(), 8000);
}

#[tokio::test(start_paused = true)]
async fn burst_of_500_makes_two_full_batches_then_timed_remainder() {
    let backend = Arc::new(RecordingStore::default());
    let queue = Arc::new(WriteQueue::new(10_000));
    let ctx = flush_context(
        Arc::clone(&queue),
        backend.clone(),
        BatchConfig {
            batch_size: 200,
            batch_timeout: Duration::from_millis(50),
            worker_count: 2,
            retry: RetryPolicy::default(),
        },
    );

    let start = Instant::now();
    for i in 0..500 {
        queue.enqueue(json!(i)).unwrap();
    }
    let pool = BatchWritePool::start(ctx);

    tokio::time::sleep(Duration::from_millis(49)).await;
    assert_eq!(backend.batch_sizes(), vec![200, 200]);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(backend.batch_sizes(), vec![200, 200, 100]);
    let remainder_at = backend.batches.lock()[2].0;
    assert!(remainder_at.duration_since(start) >= Duration::from_millis(50));

    queue.close();
    pool.join(Duration::from_secs(1)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn five_thousand_writes_through_small_queue_all_flush() {
    let backend = Arc::new(MemoryStore::new());
    let queue = Arc::new(WriteQueue::new(1000));
    let batch_size = 100;
    let ctx = flush_context(
        Arc::clone(&queue),
        backend.clone(),
        BatchConfig {
            batch_size,
            batch_timeout: Duration::from_millis(10),
            worker_count: 4,
            retry: RetryPolicy::default(),
        },
    );
    let pool = BatchWritePool::start(ctx.clone());

    let mut full_rejections = 0u64;
    for i in 0..5000 {
        loop {
            // Only this task produces, so room seen here is still there below.
            let had_room = queue.len() < queue.capacity();
            match queue.enqueue(json!({ "index": i })) {
                Ok(_) => break,
                Err(QueueError::Full { capacity }) => {
                    assert!(!had_room, "write {i} rejected with backlog below capacity");
                    assert_eq!(capacity, 1000);
                    full_rejections += 1;
                    tokio::task::yield_now().await;
                }
                Err(QueueError::Closed) => unreachable!("queue closed early"),
            }
        }
    }

    queue.close();
    pool.join(Duration::from_secs(30)).await;

    assert_eq!(backend.len(), 5000);
    assert_eq!(ctx.counters.flushed(), 5000);
    assert_eq!(queue.accepted_total(), 5000);
    assert_eq!(queue.rejected_total(), full_rejections);
    // Every batch is at most batch_size, so at least 50 were needed.
    let batches = ctx.counters.batches();
    assert!(batches >= 50, "only {batches} batches");
    assert!((0..5000).all(|i| backend.contains(RecordId(i))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_rejections_once_backlog_drains() {
    let backend = Arc::new(MemoryStore::new());
    let queue = Arc::new(WriteQueue::new(1000));
    let ctx = flush_context(
        Arc::clone(&queue),
        backend.clone(),
        BatchConfig {
            batch_size: 100,
            batch_timeout: Duration::from_millis(5),
            worker_count: 4,
            retry: RetryPolicy::default(),
        },
    );

    // Fill to capacity before any writer runs, then let the pool drain it.
    for i in 0..1000 {
        queue.enqueue(json!(i)).unwrap();
    }
    assert_eq!(queue.enqueue(json!("over")), Err(QueueError::Full { capacity: 1000 }));
    let pool = BatchWritePool::start(ctx.clone());
    while !queue.is_empty() {
        tokio::task::yield_now().await;
    }

    let rejected_after_flood = queue.rejected_total();
    for i in 0..1000 {
        queue.enqueue(json!({ "late": i })).unwrap();
        if i % 50 == 0 {
            tokio::task::yield_now().await;
        }
    }
    assert_eq!(queue.rejected_total(), rejected_after_flood);

    queue.close();
    pool.join(Duration::from_secs(30)).await;
    assert_eq!(ctx.counters.flushed(), 2000);
    assert_eq!(backend.len(), 2000);
}

#[tokio::test]
async fn flood_into_stalled_queue_accepts_exactly_capacity() {
    let mut config = PipelineConfig::default();
    config.queue.max_len = 100;
    config.batch.worker_count = 2;
    config.shutdown_policy = ShutdownPolicy::Discard;
    let backend = Arc::new(MemoryStore::with_latency(Duration::from_secs(3600)));
    let pipeline = Pipeline::start(config, backend).unwrap();
    let queue = Arc::clone(pipeline.queue());

    // Synchronous flood: the writers never get scheduled in between.
    let results: Vec<_> = (0..1000).map(|i| queue.enqueue(json!(i))).collect();

    let accepted: Vec<RecordId> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    assert_eq!(accepted, (0..100).map(RecordId).collect::<Vec<_>>());
    assert!(results[100..]
        .iter()
        .all(|r| *r == Err(QueueError::Full { capacity: 100 })));
    assert_eq!(queue.len(), 100);
    assert_eq!(queue.rejected_total(), 900);

    let report = pipeline.shutdown().await;
    assert_eq!(report.pending_at_close, 100);
}

#[tokio::test(start_paused = true)]
async fn persistently_failing_subset_is_dropped_once() {
    let poisoned: Vec<RecordId> = (0..200).filter(|i| i % 4 == 0).map(RecordId).collect();
    let backend = Arc::new(RecordingStore::poisoned(poisoned.clone()));
    let dead = Arc::new(MemoryDeadLetters::new());

    let mut config = PipelineConfig::default();
    config.batch.batch_size = 200;
    config.batch.batch_timeout = Duration::from_millis(50);
    config.batch.worker_count = 1;
    config.batch.retry = RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
    };
    let pipeline =
        Pipeline::start_with_dead_letters(config, backend.clone(), dead.clone()).unwrap();

    for i in 0..200 {
        pipeline.queue().enqueue(json!(i)).unwrap();
    }
    // First flush plus three retries with 10 + 20 + 40 ms of backoff.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(backend.batch_sizes(), vec![200, 50, 50, 50]);
    assert_eq!(dead.ids(), poisoned);
    assert_eq!(pipeline.stats().flush().dropped(), 50);
    assert_eq!(pipeline.stats().flush().flushed(), 150);

    // Later flushes never carry the dropped records again.
    for i in 0..100 {
        pipeline.queue().enqueue(json!(i)).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    let sizes = backend.batch_sizes();
    assert_eq!(sizes.len(), 5);
    let last: HashSet<RecordId> = backend.batches.lock()[4].1.iter().copied().collect();
    assert!(poisoned.iter().all(|id| !last.contains(id)));
    assert_eq!(pipeline.queue().len(), 0);

    let report = pipeline.shutdown().await;
    assert_eq!(report.records_dropped, 50);
    assert_eq!(dead.len(), 50);
}
