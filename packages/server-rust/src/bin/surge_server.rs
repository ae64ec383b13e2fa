//! `surge-server`: the pipeline behind HTTP, in front of a simulated store.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use surge_server::cli::{LogFormat, ServerArgs};
use surge_server::network::{AppState, NetworkModule};
use surge_server::service::Pipeline;
use surge_server::storage::MemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    init_tracing(args.log_format);

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }

    let backend = Arc::new(MemoryStore::with_latency(args.store_latency()));
    let pipeline = Pipeline::start(args.pipeline_config(), backend)
        .context("invalid pipeline configuration")?;

    let mut network = NetworkModule::new(args.network_config());
    let port = network.start().await?;
    info!(port, "surge-server ready");

    let state = AppState::new(&pipeline, network.shutdown_controller());
    let served = network.serve(state, shutdown_signal()).await;
    if let Err(err) = &served {
        error!(error = %err, "HTTP server failed");
    }

    let report = pipeline.shutdown().await;
    info!(
        flushed = report.records_flushed,
        dropped = report.records_dropped,
        discarded = report.discarded,
        aborted_in_flight = report.aborted_in_flight,
        "shutdown complete"
    );
    served
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init(),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
