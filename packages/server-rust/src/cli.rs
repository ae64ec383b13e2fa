//! Command-line and environment configuration for the `surge-server` binary.
//!
//! Every pipeline knob has a flag and an environment fallback. Conversion into
//! [`PipelineConfig`] and [`NetworkConfig`] happens here so the library types
//! stay free of clap.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::network::NetworkConfig;
use crate::service::{
    BatchConfig, CacheConfig, HandlerConfig, OverflowPolicy, PipelineConfig, QueueConfig,
    RetryPolicy, ShutdownPolicy,
};
use crate::storage::{AdapterConfig, BusyPolicy};

/// Write-decoupling front for a capacity-limited store.
#[derive(Parser, Debug, Clone)]
#[command(name = "surge-server", version)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to
    #[arg(long, env = "APP_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP port
    #[arg(long, env = "APP_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Prometheus exporter listen address; disabled when unset
    #[arg(long, env = "METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Cache TTL in seconds
    #[arg(long, env = "CACHE_TTL", default_value_t = 300)]
    pub cache_ttl: u64,

    /// Interval between expired-entry sweeps, in seconds
    #[arg(long, env = "CACHE_SWEEP_SECS", default_value_t = 30)]
    pub cache_sweep_secs: u64,

    /// Maximum pending writes before the queue rejects
    #[arg(long, env = "MAX_QUEUE_SIZE", default_value_t = 100_000)]
    pub max_queue_size: usize,

    /// Records per batched write
    #[arg(long, env = "BATCH_SIZE", default_value_t = 100)]
    pub batch_size: usize,

    /// Max age of the oldest pending record before a partial batch flushes
    #[arg(long, env = "BATCH_TIMEOUT_MS", default_value_t = 100)]
    pub batch_timeout_ms: u64,

    /// Concurrent batch writers
    #[arg(long, env = "WRITE_WORKERS", default_value_t = 4)]
    pub write_workers: usize,

    /// Retries for records that fail to flush
    #[arg(long, env = "WRITE_MAX_RETRIES", default_value_t = 3)]
    pub write_max_retries: u32,

    /// First retry delay in milliseconds, doubled per attempt
    #[arg(long, env = "WRITE_RETRY_BASE_MS", default_value_t = 50)]
    pub write_retry_base_ms: u64,

    /// Upper bound on a single retry delay in milliseconds
    #[arg(long, env = "WRITE_RETRY_MAX_MS", default_value_t = 2000)]
    pub write_retry_max_ms: u64,

    /// Concurrent operations the store can sustain
    #[arg(long, env = "STORE_TICKETS", default_value_t = 8)]
    pub store_tickets: usize,

    /// What to do when every store ticket is taken
    #[arg(long, env = "STORE_BUSY_POLICY", value_enum, default_value_t = BusyMode::Queue)]
    pub store_busy_policy: BusyMode,

    /// Bounded wait for a ticket under the queue policy, in milliseconds
    #[arg(long, env = "STORE_MAX_WAIT_MS", default_value_t = 250)]
    pub store_max_wait_ms: u64,

    /// Callers allowed to wait for a ticket at once
    #[arg(long, env = "STORE_MAX_WAITERS", default_value_t = 1024)]
    pub store_max_waiters: usize,

    /// Store read timeout in milliseconds
    #[arg(long, env = "STORE_READ_TIMEOUT_MS", default_value_t = 2000)]
    pub store_read_timeout_ms: u64,

    /// Store batched-write timeout in milliseconds
    #[arg(long, env = "STORE_WRITE_TIMEOUT_MS", default_value_t = 5000)]
    pub store_write_timeout_ms: u64,

    /// Simulated store latency per operation, in milliseconds
    #[arg(long, env = "STORE_LATENCY_MS", default_value_t = 0)]
    pub store_latency_ms: u64,

    /// What a request does when the write queue is full
    #[arg(long, env = "WRITE_OVERFLOW_POLICY", value_enum, default_value_t = OverflowMode::RejectRequest)]
    pub write_overflow_policy: OverflowMode,

    /// Reads per unit of work
    #[arg(long, env = "READS_PER_REQUEST", default_value_t = 5)]
    pub reads_per_request: usize,

    /// Writes per unit of work
    #[arg(long, env = "WRITES_PER_REQUEST", default_value_t = 5)]
    pub writes_per_request: usize,

    /// Length of each write's random payload
    #[arg(long, env = "PAYLOAD_SIZE", default_value_t = 512)]
    pub payload_size: usize,

    /// Units of work in flight before load shedding
    #[arg(long, env = "MAX_CONCURRENT_REQUESTS", default_value_t = 10_000)]
    pub max_concurrent_requests: usize,

    /// What happens to queued writes at shutdown
    #[arg(long, env = "SHUTDOWN_POLICY", value_enum, default_value_t = ShutdownMode::Drain)]
    pub shutdown_policy: ShutdownMode,

    /// Upper bound on draining at shutdown, in seconds
    #[arg(long, env = "DRAIN_TIMEOUT_SECS", default_value_t = 30)]
    pub drain_timeout_secs: u64,

    /// Per-request timeout, in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Allowed CORS origins, comma separated
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BusyMode {
    Queue,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OverflowMode {
    RejectRequest,
    DropWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShutdownMode {
    Drain,
    Discard,
}

impl ServerArgs {
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        let busy_policy = match self.store_busy_policy {
            BusyMode::Queue => BusyPolicy::Queue {
                max_wait: Duration::from_millis(self.store_max_wait_ms),
                max_waiters: self.store_max_waiters,
            },
            BusyMode::Reject => BusyPolicy::Reject,
        };

        PipelineConfig {
            cache: CacheConfig {
                ttl: Duration::from_secs(self.cache_ttl),
                sweep_interval: Duration::from_secs(self.cache_sweep_secs),
            },
            queue: QueueConfig {
                max_len: self.max_queue_size,
            },
            batch: BatchConfig {
                batch_size: self.batch_size,
                batch_timeout: Duration::from_millis(self.batch_timeout_ms),
                worker_count: self.write_workers,
                retry: RetryPolicy {
                    max_retries: self.write_max_retries,
                    base_delay: Duration::from_millis(self.write_retry_base_ms),
                    max_delay: Duration::from_millis(self.write_retry_max_ms),
                },
            },
            store: AdapterConfig {
                ticket_capacity: self.store_tickets,
                busy_policy,
                read_timeout: Duration::from_millis(self.store_read_timeout_ms),
                write_timeout: Duration::from_millis(self.store_write_timeout_ms),
            },
            handler: HandlerConfig {
                reads_per_unit: self.reads_per_request,
                writes_per_unit: self.writes_per_request,
                payload_size: self.payload_size,
                overflow_policy: match self.write_overflow_policy {
                    OverflowMode::RejectRequest => OverflowPolicy::RejectRequest,
                    OverflowMode::DropWrite => OverflowPolicy::DropWrite,
                },
                max_concurrent_units: self.max_concurrent_requests,
            },
            shutdown_policy: match self.shutdown_policy {
                ShutdownMode::Drain => ShutdownPolicy::Drain,
                ShutdownMode::Discard => ShutdownPolicy::Discard,
            },
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
        }
    }

    #[must_use]
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            cors_origins: self.cors_origins.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
        }
    }

    #[must_use]
    pub fn store_latency(&self) -> Duration {
        Duration::from_millis(self.store_latency_ms)
    }
}
