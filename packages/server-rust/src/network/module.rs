//! HTTP server lifecycle with deferred startup.
//!
//! `new()` creates the shutdown controller, `start()` binds the listener and
//! `serve()` accepts connections until the shutdown signal fires. The pipeline
//! is started by the caller in between and handed to `serve()` as state.

use std::future::Future;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    cache_status_handler, data_handler, flush_cache_handler, health_handler, liveness_handler,
    readiness_handler, stats_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;

/// Owns the listener and the shutdown controller.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    /// Shared shutdown controller, for building [`AppState`] and for
    /// triggering shutdown from outside.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Binds the listener. Returns the bound port, which differs from the
    /// configured one when that is 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "TCP listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests.
    ///
    /// Health moves to `Ready` once serving begins and to `Draining` when
    /// the signal fires; in-flight requests get up to `drain_timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or on a fatal I/O error.
    pub async fn serve(
        self,
        state: AppState,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(listener) = self.listener else {
            anyhow::bail!("start() must be called before serve()");
        };
        let router = build_router(&self.config, state);
        let controller = self.shutdown;

        controller.set_ready();
        info!("serving HTTP");

        let signal_controller = Arc::clone(&controller);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    () = shutdown => {},
                    () = signal_controller.wait_for_shutdown() => {},
                }
                signal_controller.trigger_shutdown();
            })
            .await?;

        if controller
            .wait_for_drain(self.config.drain_timeout)
            .await
        {
            info!("all in-flight requests drained");
        } else {
            warn!(
                remaining = controller.in_flight_count(),
                "drain timeout expired with requests in flight"
            );
        }
        Ok(())
    }
}

/// Assembles routes and layers.
///
/// - `GET /api/data`: one unit of work
/// - `GET /api/stats`, `GET /api/cache/status`
/// - `POST /api/admin/flush-cache`
/// - `GET /health`, `/health/live`, `/health/ready` (and `/healthz`, `/readyz`)
pub fn build_router(config: &NetworkConfig, state: AppState) -> Router {
    Router::new()
        .route("/api/data", get(data_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/cache/status", get(cache_status_handler))
        .route("/api/admin/flush-cache", post(flush_cache_handler))
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .layer(build_http_layers(config))
        .with_state(state)
}
