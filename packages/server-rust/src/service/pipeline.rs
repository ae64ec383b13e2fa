//! Construction and teardown of the write-decoupling pipeline.
//!
//! [`Pipeline::start`] builds every shared handle once (cache, queue, store
//! adapter, counters), spawns the batch writers and the cache maintenance
//! worker, and wires the request handler. [`Pipeline::shutdown`] closes the
//! queue and drains or discards the backlog according to [`ShutdownPolicy`].

use std::sync::Arc;

use surge_core::BackingStore;
use tracing::{info, warn};

use super::background::{CacheMaintenance, PeriodicWorker};
use super::config::{ConfigError, PipelineConfig, ShutdownPolicy};
use super::dead_letter::{AuditLogSink, DeadLetterSink, DropReason};
use super::handler::RequestHandler;
use super::middleware::{build_unit_service, UnitService};
use super::stats::{FlushCounters, PipelineStats};
use super::worker::{BatchWritePool, FlushContext};
use crate::cache::ReadCache;
use crate::queue::WriteQueue;
use crate::storage::StoreAdapter;

/// What happened to the backlog during [`Pipeline::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub policy: ShutdownPolicy,
    /// Records still queued when the queue was closed.
    pub pending_at_close: usize,
    /// Records handed to the dead-letter sink instead of being flushed.
    pub discarded: usize,
    pub workers_completed: usize,
    /// Writers still busy when the drain timeout ran out.
    pub workers_aborted: usize,
    /// Records those aborted writers held, dead-lettered with
    /// [`DropReason::AbortedInFlight`].
    pub aborted_in_flight: usize,
    /// Records flushed over the pipeline's lifetime.
    pub records_flushed: u64,
    /// Records dropped over the pipeline's lifetime, including `discarded`.
    pub records_dropped: u64,
}

/// A running pipeline. Construct once per process.
pub struct Pipeline {
    config: PipelineConfig,
    cache: Arc<ReadCache>,
    queue: Arc<WriteQueue>,
    store: Arc<StoreAdapter>,
    dead_letters: Arc<dyn DeadLetterSink>,
    stats: PipelineStats,
    handler: RequestHandler,
    unit_service: UnitService,
    workers: BatchWritePool,
    maintenance: PeriodicWorker,
}

impl Pipeline {
    /// Starts the pipeline with the audit-log dead-letter sink.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn start(
        config: PipelineConfig,
        backend: Arc<dyn BackingStore>,
    ) -> Result<Self, ConfigError> {
        Self::start_with_dead_letters(config, backend, Arc::new(AuditLogSink))
    }

    /// Starts the pipeline with a caller-provided dead-letter sink.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn start_with_dead_letters(
        config: PipelineConfig,
        backend: Arc<dyn BackingStore>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let cache = Arc::new(ReadCache::new(config.cache.ttl));
        let queue = Arc::new(WriteQueue::new(config.queue.max_len));
        let store = Arc::new(StoreAdapter::new(backend, config.store));
        let counters = Arc::new(FlushCounters::default());
        let stats = PipelineStats::new(
            Arc::clone(&queue),
            Arc::clone(&cache),
            Arc::clone(&store),
            Arc::clone(&counters),
        );

        let workers = BatchWritePool::start(FlushContext {
            queue: Arc::clone(&queue),
            store: Arc::clone(&store),
            dead_letters: Arc::clone(&dead_letters),
            counters,
            batch: config.batch,
        });
        let maintenance = PeriodicWorker::start(
            CacheMaintenance::new(Arc::clone(&cache), stats.clone()),
            config.cache.sweep_interval,
        );

        let handler = RequestHandler::new(
            Arc::clone(&cache),
            Arc::clone(&queue),
            Arc::clone(&store),
            config.handler,
        );
        let unit_service = build_unit_service(handler.clone(), &config.handler);

        info!(
            workers = config.batch.worker_count,
            batch_size = config.batch.batch_size,
            batch_timeout_ms = u64::try_from(config.batch.batch_timeout.as_millis()).unwrap_or(u64::MAX),
            queue_max = config.queue.max_len,
            tickets = config.store.ticket_capacity,
            cache_ttl_s = config.cache.ttl.as_secs(),
            "pipeline started"
        );

        Ok(Self {
            config,
            cache,
            queue,
            store,
            dead_letters,
            stats,
            handler,
            unit_service,
            workers,
            maintenance,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The bare handler, without load shedding or instrumentation.
    #[must_use]
    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    /// The layered service units of work should normally go through.
    #[must_use]
    pub fn unit_service(&self) -> UnitService {
        self.unit_service.clone()
    }

    #[must_use]
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ReadCache> {
        &self.cache
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<WriteQueue> {
        &self.queue
    }

    #[must_use]
    pub fn store(&self) -> &Arc<StoreAdapter> {
        &self.store
    }

    /// Stops accepting writes and tears the pipeline down.
    ///
    /// With [`ShutdownPolicy::Drain`] the writers flush the backlog until it
    /// is empty or `drain_timeout` runs out; whatever is left is dead-lettered.
    /// With [`ShutdownPolicy::Discard`] the backlog is dead-lettered at once.
    /// Batches already taken by a writer are still flushed in both cases. A
    /// writer aborted at the deadline has its unresolved records
    /// dead-lettered too, so `records_flushed + records_dropped` covers every
    /// accepted write.
    pub async fn shutdown(mut self) -> ShutdownReport {
        let policy = self.config.shutdown_policy;
        self.queue.close();
        let pending_at_close = self.queue.len();
        info!(?policy, pending_at_close, "pipeline shutting down");

        let mut discarded = 0;
        if policy == ShutdownPolicy::Discard {
            discarded += discard_backlog(&self.queue, &self.stats, self.dead_letters.as_ref());
        }

        let outcome = self.workers.join(self.config.drain_timeout).await;
        if outcome.aborted > 0 {
            warn!(
                aborted = outcome.aborted,
                remaining = self.queue.len(),
                in_flight = outcome.stranded,
                "drain timeout reached, batch writers aborted"
            );
        }
        discarded += discard_backlog(&self.queue, &self.stats, self.dead_letters.as_ref());

        self.maintenance.stop().await;
        self.stats.publish_gauges();

        let report = ShutdownReport {
            policy,
            pending_at_close,
            discarded,
            workers_completed: outcome.completed,
            workers_aborted: outcome.aborted,
            aborted_in_flight: outcome.stranded,
            records_flushed: self.stats.flush().flushed(),
            records_dropped: self.stats.flush().dropped(),
        };
        info!(?report, "pipeline stopped");
        report
    }
}

/// Hands everything still queued to the dead-letter sink.
fn discard_backlog(
    queue: &WriteQueue,
    stats: &PipelineStats,
    dead_letters: &dyn DeadLetterSink,
) -> usize {
    let backlog = queue.drain_all();
    let count = backlog.len();
    if count > 0 {
        let reason = DropReason::Shutdown;
        stats.flush().record_drop(count, reason.label());
        dead_letters.on_dropped(backlog, &reason);
    }
    count
}
