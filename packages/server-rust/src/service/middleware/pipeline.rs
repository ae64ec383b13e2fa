//! Composes the middleware layers around the request handler.

use tower::ServiceBuilder;

use super::load_shed::{LoadShedLayer, LoadShedService};
use super::metrics::{MetricsLayer, MetricsService};
use crate::service::config::HandlerConfig;
use crate::service::handler::RequestHandler;

/// The full unit-of-work service stack. Concrete so it can be shared as axum
/// state, which requires `Sync`.
pub type UnitService = LoadShedService<MetricsService<RequestHandler>>;

/// Wraps `handler` with, outermost first:
/// 1. `LoadShedLayer`: reject when overloaded, before any work
/// 2. `MetricsLayer`: span, duration and outcome of the unit
#[must_use]
pub fn build_unit_service(handler: RequestHandler, config: &HandlerConfig) -> UnitService {
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_units))
        .layer(MetricsLayer)
        .service(handler)
}
