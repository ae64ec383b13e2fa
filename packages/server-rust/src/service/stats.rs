//! Read-only gauges and counters over the pipeline's shared handles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::cache::ReadCache;
use crate::queue::WriteQueue;
use crate::storage::StoreAdapter;

/// Outcome counters maintained by the batch workers.
#[derive(Debug, Default)]
pub struct FlushCounters {
    batches: AtomicU64,
    flushed: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
}

impl FlushCounters {
    /// Records one batched write that persisted `records` records.
    pub fn record_flush(&self, records: usize) {
        let n = records as u64;
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.flushed.fetch_add(n, Ordering::Relaxed);
        metrics::counter!("surge_batches_flushed_total").increment(1);
        metrics::counter!("surge_records_flushed_total").increment(n);
    }

    pub fn record_retry(&self, records: usize) {
        let n = records as u64;
        self.retried.fetch_add(n, Ordering::Relaxed);
        metrics::counter!("surge_records_retried_total").increment(n);
    }

    pub fn record_drop(&self, records: usize, reason: &'static str) {
        let n = records as u64;
        self.dropped.fetch_add(n, Ordering::Relaxed);
        metrics::counter!("surge_records_dropped_total", "reason" => reason).increment(n);
    }

    /// Batched writes issued, including ones where every record failed.
    #[must_use]
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Records the store confirmed.
    #[must_use]
    pub fn flushed(&self) -> u64 {
        self.flushed.load(Ordering::Relaxed)
    }

    /// Record-level retry attempts.
    #[must_use]
    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    /// Records handed to the dead-letter sink.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Serializable point-in-time view of [`PipelineStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub queue_length: usize,
    pub queue_capacity: usize,
    pub writes_accepted: u64,
    pub writes_rejected: u64,
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Lifetime ratio; see [`PipelineStats::take_window_hit_ratio`] for the
    /// recent one.
    pub cache_hit_ratio: f64,
    pub store_in_flight: usize,
    pub store_peak_in_flight: usize,
    pub store_ticket_capacity: usize,
    pub store_waiting: usize,
    pub batches_flushed: u64,
    pub records_flushed: u64,
    pub records_retried: u64,
    pub records_dropped: u64,
}

/// Observability handle shared by the pipeline, the HTTP surface and the
/// maintenance worker.
#[derive(Clone)]
pub struct PipelineStats {
    queue: Arc<WriteQueue>,
    cache: Arc<ReadCache>,
    store: Arc<StoreAdapter>,
    flush: Arc<FlushCounters>,
    /// Cache (hits, misses) as of the last windowed read.
    window_mark: Arc<Mutex<(u64, u64)>>,
}

impl PipelineStats {
    #[must_use]
    pub fn new(
        queue: Arc<WriteQueue>,
        cache: Arc<ReadCache>,
        store: Arc<StoreAdapter>,
        flush: Arc<FlushCounters>,
    ) -> Self {
        Self {
            queue,
            cache,
            store,
            flush,
            window_mark: Arc::new(Mutex::new((0, 0))),
        }
    }

    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.queue.len()
    }

    /// Cumulative hit ratio since the cache was created.
    #[must_use]
    pub fn cache_hit_ratio(&self) -> f64 {
        self.cache.hit_ratio()
    }

    /// Hit ratio over the lookups made since the previous call, then starts a
    /// new window. `None` if there were no lookups in between.
    #[allow(clippy::cast_precision_loss)]
    pub fn take_window_hit_ratio(&self) -> Option<f64> {
        let (hits, misses) = (self.cache.hits(), self.cache.misses());
        let (prev_hits, prev_misses) =
            std::mem::replace(&mut *self.window_mark.lock(), (hits, misses));
        let window_hits = hits.saturating_sub(prev_hits);
        let total = window_hits + misses.saturating_sub(prev_misses);
        (total > 0).then(|| window_hits as f64 / total as f64)
    }

    #[must_use]
    pub fn in_flight_tickets(&self) -> usize {
        self.store.in_flight()
    }

    #[must_use]
    pub fn flush(&self) -> &FlushCounters {
        &self.flush
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            queue_length: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            writes_accepted: self.queue.accepted_total(),
            writes_rejected: self.queue.rejected_total(),
            cache_entries: self.cache.len(),
            cache_hits: self.cache.hits(),
            cache_misses: self.cache.misses(),
            cache_hit_ratio: self.cache.hit_ratio(),
            store_in_flight: self.store.in_flight(),
            store_peak_in_flight: self.store.peak_in_flight(),
            store_ticket_capacity: self.store.ticket_capacity(),
            store_waiting: self.store.waiting(),
            batches_flushed: self.flush.batches(),
            records_flushed: self.flush.flushed(),
            records_retried: self.flush.retried(),
            records_dropped: self.flush.dropped(),
        }
    }

    /// Pushes the operator gauges to the `metrics` recorder.
    ///
    /// `surge_cache_hit_ratio` covers the lookups since the previous publish
    /// and keeps its last value across a window with none.
    /// `surge_cache_hit_ratio_lifetime` is cumulative.
    #[allow(clippy::cast_precision_loss)]
    pub fn publish_gauges(&self) {
        metrics::gauge!("surge_queue_length").set(self.queue.len() as f64);
        if let Some(ratio) = self.take_window_hit_ratio() {
            metrics::gauge!("surge_cache_hit_ratio").set(ratio);
        }
        metrics::gauge!("surge_cache_hit_ratio_lifetime").set(self.cache.hit_ratio());
        metrics::gauge!("surge_store_in_flight").set(self.store.in_flight() as f64);
    }
}
