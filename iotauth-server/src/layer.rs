use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::Request;
use futures::future::BoxFuture;
use tower::{Layer, Service};

/// The process-wide counters `GET /metrics` reports. A `tower::Layer`
/// generalization of the teacher's `AuthServiceLayer`
/// (`covert-server::layer::auth_service`): same "wrap every request before
/// the handler runs" shape, repointed from bearer-token-to-`Permissions`
/// resolution (now done inline by `system::AuthService::identify`) to
/// request counting, since SPEC_FULL's ambient stack calls for a minimal
/// counter registry rather than an ACL extension.
#[derive(Clone, Default)]
pub struct RequestMetrics {
    total: Arc<AtomicU64>,
}

impl RequestMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn increment(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone)]
pub struct MetricsLayer {
    metrics: RequestMetrics,
}

impl MetricsLayer {
    #[must_use]
    pub fn new(metrics: RequestMetrics) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    metrics: RequestMetrics,
}

impl<S> Service<Request<Body>> for MetricsService<S>
where
    S: Service<Request<Body>> + Send + Clone + 'static,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        self.metrics.increment();
        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(req).await })
    }
}
