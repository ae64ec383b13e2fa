//! Tower middleware layers around the request handler.
//!
//! - [`load_shed`]: Semaphore-based concurrency limiting
//! - [`metrics`]: Unit timing, outcome counting and tracing spans
//! - [`pipeline`]: Composes the layers into [`UnitService`]

pub mod load_shed;
pub mod metrics;
pub mod pipeline;

pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_unit_service, UnitService};
