//! Pipeline endpoints: units of work, stats, and cache administration.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tower::ServiceExt;

use super::AppState;
use crate::network::middleware::REQUEST_ID_HEADER;
use crate::service::{RequestError, StatsSnapshot, UnitOfWork, UnitResult};

/// Seconds clients are asked to wait before retrying a 503.
const RETRY_AFTER_SECS: &str = "1";

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.kind(),
            "detail": self.to_string(),
            "retryable": true,
        }));
        (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, RETRY_AFTER_SECS)],
            body,
        )
            .into_response()
    }
}

/// `GET /api/data`: runs one unit of work.
///
/// The unit's identity is the request id. Responds as soon as the writes are
/// queued; `writesAccepted` means queued, not persisted.
pub async fn data_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UnitResult>, RequestError> {
    // Counted before the state check so a drain that starts in between still
    // waits for this request.
    let _guard = state.shutdown.in_flight_guard();
    if !state.shutdown.is_accepting() {
        return Err(RequestError::ShuttingDown { accepted: 0 });
    }

    let unit = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(UnitOfWork::anonymous, UnitOfWork::new);

    state.units.clone().oneshot(unit).await.map(Json)
}

/// `GET /api/stats`
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

/// `GET /api/cache/status`
pub async fn cache_status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cache = &state.cache;
    Json(json!({
        "entries": cache.len(),
        "hits": cache.hits(),
        "misses": cache.misses(),
        "hitRatio": cache.hit_ratio(),
        "ttlSecs": cache.ttl().as_secs(),
        "queueLength": state.stats.queue_length(),
    }))
}

/// `POST /api/admin/flush-cache`: drops every cache entry.
pub async fn flush_cache_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let removed = state.cache.clear();
    tracing::info!(removed, "read cache flushed");
    Json(json!({ "status": "cache flushed", "removed": removed }))
}
