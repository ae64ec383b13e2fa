//! The write-decoupling service layer.
//!
//! 1. **Units of work** (`unit`): request identity, results, state machine, errors
//! 2. **Handler** (`handler`): cache-first reads, queued writes
//! 3. **Middleware** (`middleware`): Tower layers (load shedding, metrics)
//! 4. **Batch writers** (`worker`): drain the queue into the store with retry
//! 5. **Background tasks** (`background`): cache maintenance and gauge refresh
//! 6. **Pipeline** (`pipeline`): construction and shutdown of all of the above

pub mod background;
pub mod config;
pub mod dead_letter;
pub mod handler;
pub mod middleware;
pub mod pipeline;
pub mod stats;
pub mod unit;
pub mod worker;

pub use background::{CacheMaintenance, PeriodicTask, PeriodicWorker};
pub use config::{
    BatchConfig, CacheConfig, ConfigError, HandlerConfig, OverflowPolicy, PipelineConfig,
    QueueConfig, RetryPolicy, ShutdownPolicy,
};
pub use dead_letter::{AuditLogSink, DeadLetterSink, DropReason, MemoryDeadLetters};
pub use handler::RequestHandler;
pub use middleware::{build_unit_service, UnitService};
pub use pipeline::{Pipeline, ShutdownReport};
pub use stats::{FlushCounters, PipelineStats, StatsSnapshot};
pub use unit::{ReadOutcome, RequestError, UnitOfWork, UnitResult, UnitState};
pub use worker::{BatchWritePool, FlushContext, JoinOutcome};
