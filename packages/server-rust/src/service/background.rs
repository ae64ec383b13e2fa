//! Periodic background tasks.
//!
//! A [`PeriodicWorker`] drives a [`PeriodicTask`] on a fixed interval until it
//! is stopped. The cache maintenance task is the one the pipeline runs: it
//! evicts expired cache entries and republishes the operator gauges.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use super::stats::PipelineStats;
use crate::cache::ReadCache;

/// Work executed by a [`PeriodicWorker`].
#[async_trait]
pub trait PeriodicTask: Send + 'static {
    /// Called once per interval.
    async fn on_tick(&mut self);

    /// Called once when the worker is stopped. Default is a no-op.
    async fn shutdown(&mut self) {}
}

/// Runs a [`PeriodicTask`] on its own tokio task.
pub struct PeriodicWorker {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicWorker {
    /// Starts ticking `task` every `interval`. The first tick fires one full
    /// interval after start, not immediately.
    pub fn start<T: PeriodicTask>(mut task: T, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => task.on_tick().await,
                    _ = &mut shutdown_rx => break,
                }
            }

            task.shutdown().await;
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Signals the task to stop and waits for its shutdown hook to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

/// Evicts expired cache entries and refreshes gauges.
pub struct CacheMaintenance {
    cache: Arc<ReadCache>,
    stats: PipelineStats,
}

impl CacheMaintenance {
    #[must_use]
    pub fn new(cache: Arc<ReadCache>, stats: PipelineStats) -> Self {
        Self { cache, stats }
    }
}

#[async_trait]
impl PeriodicTask for CacheMaintenance {
    async fn on_tick(&mut self) {
        let purged = self.cache.purge_expired();
        if purged > 0 {
            debug!(purged, remaining = self.cache.len(), "purged expired cache entries");
        }
        self.stats.publish_gauges();
    }

    async fn shutdown(&mut self) {
        self.stats.publish_gauges();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use super::*;
    use crate::queue::WriteQueue;
    use crate::service::stats::FlushCounters;
    use crate::storage::{AdapterConfig, MemoryStore, StoreAdapter};

    struct CountingTask {
        ticks: Arc<AtomicU32>,
        shutdowns: Arc<AtomicU32>,
    }

    #[async_trait]
    impl PeriodicTask for CountingTask {
        async fn on_tick(&mut self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_interval_and_runs_shutdown_hook() {
        let ticks = Arc::new(AtomicU32::new(0));
        let shutdowns = Arc::new(AtomicU32::new(0));
        let mut worker = PeriodicWorker::start(
            CountingTask {
                ticks: Arc::clone(&ticks),
                shutdowns: Arc::clone(&shutdowns),
            },
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(35)).await;
        worker.stop().await;

        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_twice_is_harmless() {
        let mut worker = PeriodicWorker::start(
            CountingTask {
                ticks: Arc::new(AtomicU32::new(0)),
                shutdowns: Arc::new(AtomicU32::new(0)),
            },
            Duration::from_secs(60),
        );
        worker.stop().await;
        worker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn maintenance_purges_expired_entries() {
        let cache = Arc::new(ReadCache::new(Duration::from_millis(50)));
        let stats = PipelineStats::new(
            Arc::new(WriteQueue::new(4)),
            Arc::clone(&cache),
            Arc::new(StoreAdapter::new(
                Arc::new(MemoryStore::new()),
                AdapterConfig::default(),
            )),
            Arc::new(FlushCounters::default()),
        );
        cache.put("a", json!(1));
        cache.put("b", json!(2));

        let mut worker =
            PeriodicWorker::start(CacheMaintenance::new(Arc::clone(&cache), stats), Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.is_empty());
        worker.stop().await;
    }
}
