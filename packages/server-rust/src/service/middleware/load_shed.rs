//! Load-shedding middleware for units of work.
//!
//! Rejects a unit with `RequestError::Overloaded` when the number already in
//! flight reaches `max_concurrent_units`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Semaphore;
use tower::{Layer, Service};

use crate::service::unit::{RequestError, UnitOfWork, UnitResult};

/// Tower layer that caps concurrent units of work.
///
/// When all permits are taken, incoming units are rejected immediately rather
/// than queued.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    semaphore: Arc<Semaphore>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            semaphore: Arc::clone(&self.semaphore),
        }
    }
}

/// Service wrapper enforcing the concurrency cap.
#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
}

impl<S> LoadShedService<S> {
    /// Permits currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl<S> Service<UnitOfWork> for LoadShedService<S>
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
        let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
            return Box::pin(async { Err(RequestError::Overloaded) });
        };

        let fut = self.inner.call(unit);
        Box::pin(async move {
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tower::ServiceExt;

    use super::*;

    /// Service that holds each unit for a fixed delay.
    #[derive(Clone)]
    struct SlowService {
        delay: Duration,
    }

    impl Service<UnitOfWork> for SlowService {
        type Response = UnitResult;
        type Error = RequestError;
        type Future = Pin<Box<dyn Future<Output = Result<UnitResult, RequestError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, unit: UnitOfWork) -> Self::Future {
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(UnitResult {
                    unit_id: unit.id,
                    reads: Vec::new(),
                    writes_accepted: 0,
                    writes_rejected: 0,
                })
            })
        }
    }

    #[tokio::test]
    async fn allows_units_under_limit() {
        let svc = LoadShedLayer::new(4).layer(SlowService {
            delay: Duration::from_millis(1),
        });
        let result = svc.oneshot(UnitOfWork::new("u")).await.unwrap();
        assert_eq!(result.unit_id, "u");
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_when_overloaded() {
        let mut svc = LoadShedLayer::new(1).layer(SlowService {
            delay: Duration::from_millis(500),
        });

        let _ = ServiceExt::ready(&mut svc).await.unwrap();
        let in_flight = tokio::spawn(svc.call(UnitOfWork::new("first")));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = svc.call(UnitOfWork::new("second")).await.unwrap_err();
        assert_eq!(err, RequestError::Overloaded);

        assert!(in_flight.await.unwrap().is_ok());
        assert_eq!(svc.available(), 1);
    }
}
