use std::time::Duration;

use crate::storage::{AdapterConfig, BusyPolicy};

/// What a request handler does when the write queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Fail the unit of work with a retryable backpressure error.
    #[default]
    RejectRequest,
    /// Drop the write, count it as rejected, and carry on.
    DropWrite,
}

/// What happens to queued writes when the pipeline shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownPolicy {
    /// Let the workers flush the backlog, bounded by the drain timeout.
    #[default]
    Drain,
    /// Hand the backlog to the dead-letter sink without flushing.
    Discard,
}

/// Retry budget and exponential backoff for failed batch subsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. 0 drops on the first failure.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`,
    /// capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Read cache settings.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Lifetime of a cache fill. Fixed for the workload, not per key.
    pub ttl: Duration,
    /// Interval between expired-entry sweeps and gauge refreshes.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Write queue settings.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Maximum number of pending records.
    pub max_len: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_len: 100_000 }
    }
}

/// Batch worker pool settings.
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Flush as soon as this many records are pending.
    pub batch_size: usize,
    /// Flush once the oldest pending record has waited this long.
    pub batch_timeout: Duration,
    /// Number of concurrent batch writers.
    pub worker_count: usize,
    /// Retry budget for failed records.
    pub retry: RetryPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout: Duration::from_millis(100),
            worker_count: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-unit-of-work shape and admission settings.
#[derive(Debug, Clone, Copy)]
pub struct HandlerConfig {
    /// Reads performed by each unit (R).
    pub reads_per_unit: usize,
    /// Writes enqueued by each unit (W).
    pub writes_per_unit: usize,
    /// Length of the random payload in each write document.
    pub payload_size: usize,
    /// Behavior when the write queue is full.
    pub overflow_policy: OverflowPolicy,
    /// Units of work allowed in flight before load shedding.
    pub max_concurrent_units: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            reads_per_unit: 5,
            writes_per_unit: 5,
            payload_size: 512,
            overflow_policy: OverflowPolicy::default(),
            max_concurrent_units: 10_000,
        }
    }
}

/// Complete configuration surface of the write-decoupling pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub batch: BatchConfig,
    pub store: AdapterConfig,
    pub handler: HandlerConfig,
    pub shutdown_policy: ShutdownPolicy,
    /// Upper bound on waiting for workers during shutdown.
    pub drain_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            batch: BatchConfig::default(),
            store: AdapterConfig::default(),
            handler: HandlerConfig::default(),
            shutdown_policy: ShutdownPolicy::default(),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Invalid pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

impl PipelineConfig {
    /// Checks that every size, count and interval that must be positive is.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Zero`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("cache.ttl", self.cache.ttl.is_zero()),
            ("cache.sweep_interval", self.cache.sweep_interval.is_zero()),
            ("queue.max_len", self.queue.max_len == 0),
            ("batch.batch_size", self.batch.batch_size == 0),
            ("batch.batch_timeout", self.batch.batch_timeout.is_zero()),
            ("batch.worker_count", self.batch.worker_count == 0),
            ("store.ticket_capacity", self.store.ticket_capacity == 0),
            ("store.read_timeout", self.store.read_timeout.is_zero()),
            ("store.write_timeout", self.store.write_timeout.is_zero()),
            ("handler.max_concurrent_units", self.handler.max_concurrent_units == 0),
        ];
        if let Some((field, _)) = checks.iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::Zero { field });
        }
        if let BusyPolicy::Queue { max_waiters: 0, .. } = self.store.busy_policy {
            return Err(ConfigError::Zero {
                field: "store.busy_policy.max_waiters",
            });
        }
        Ok(())
    }
}
