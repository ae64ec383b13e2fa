//! HTTP handler definitions.
//!
//! Defines `AppState`, the shared state carried through axum extractors, and
//! re-exports every handler for router assembly.

pub mod api;
pub mod health;

pub use api::{cache_status_handler, data_handler, flush_cache_handler, stats_handler};
pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use super::ShutdownController;
use crate::cache::ReadCache;
use crate::service::{Pipeline, PipelineStats, UnitService};

/// Shared application state. Every field is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    /// Load-shedding, instrumented unit-of-work service.
    pub units: UnitService,
    pub stats: PipelineStats,
    pub cache: Arc<ReadCache>,
    /// Health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Used for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    /// Takes handles from a running pipeline.
    #[must_use]
    pub fn new(pipeline: &Pipeline, shutdown: Arc<ShutdownController>) -> Self {
        Self {
            units: pipeline.unit_service(),
            stats: pipeline.stats().clone(),
            cache: Arc::clone(pipeline.cache()),
            shutdown,
            start_time: Instant::now(),
        }
    }
}
