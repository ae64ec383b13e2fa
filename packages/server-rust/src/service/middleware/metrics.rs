//! Instrumentation middleware for units of work.
//!
//! Wraps each unit in a `tracing` span, records its duration in the
//! `surge_unit_duration_seconds` histogram and counts outcomes.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::unit::{RequestError, UnitOfWork, UnitResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<UnitOfWork> for MetricsService<S>
where
    S: Service<UnitOfWork, Response = UnitResult, Error = RequestError> + Send,
    S::Future: Send + 'static,
{
    type Response = UnitResult;
    type Error = RequestError;
    type Future = Pin<Box<dyn Future<Output = Result<UnitResult, RequestError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, unit: UnitOfWork) -> Self::Future {
        let span = info_span!(
            "unit",
            unit_id = %unit.id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(unit);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(err) => err.kind(),
                };
                let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome);

                metrics::histogram!("surge_unit_duration_seconds").record(elapsed.as_secs_f64());
                metrics::counter!("surge_units_total", "outcome" => outcome).increment(1);

                match &result {
                    Ok(r) => tracing::debug!(
                        duration_ms,
                        writes_accepted = r.writes_accepted,
                        writes_rejected = r.writes_rejected,
                        "unit complete"
                    ),
                    Err(err) => tracing::warn!(duration_ms, outcome, error = %err, "unit failed"),
                }

                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use super::*;

    /// Succeeds for ids starting with "ok", fails otherwise.
    struct ImmediateService;

    impl Service<UnitOfWork> for ImmediateService {
        type Response = UnitResult;
        type Error = RequestError;
        type Future = Pin<Box<dyn Future<Output = Result<UnitResult, RequestError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, unit: UnitOfWork) -> Self::Future {
            Box::pin(async move {
                if unit.id.starts_with("ok") {
                    Ok(UnitResult {
                        unit_id: unit.id,
                        reads: Vec::new(),
                        writes_accepted: 1,
                        writes_rejected: 0,
                    })
                } else {
                    Err(RequestError::Backpressure { accepted: 0 })
                }
            })
        }
    }

    #[tokio::test]
    async fn passes_results_through() {
        let svc = MetricsLayer.layer(ImmediateService);
        let result = svc.oneshot(UnitOfWork::new("ok-1")).await.unwrap();
        assert_eq!(result.writes_accepted, 1);
    }

    #[tokio::test]
    async fn passes_errors_through() {
        let svc = MetricsLayer.layer(ImmediateService);
        let err = svc.oneshot(UnitOfWork::new("bad")).await.unwrap_err();
        assert_eq!(err, RequestError::Backpressure { accepted: 0 });
    }
}
