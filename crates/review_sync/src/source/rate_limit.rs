use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde_json::Value;

use super::errors::Result;
use super::types::{Filters, Page, PagedSource, ResourceKind};

type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Default outbound request rates.
pub mod rate_limits {
    /// Requests per second when nothing is configured.
    pub const DEFAULT_RPS: u32 = 10;
}

fn quota(requests_per_second: u32) -> Quota {
    Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN))
}

/// Shared token-bucket limiter. Clones draw from the same bucket.
#[derive(Clone)]
pub struct ApiRateLimiter {
    inner: Arc<GovernorRateLimiter>,
}

impl ApiRateLimiter {
    /// A limiter allowing `requests_per_second` (0 is treated as 1).
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            inner: Arc::new(RateLimiter::direct(quota(requests_per_second))),
        }
    }

    /// Wait until the bucket has capacity for one request.
    pub async fn wait(&self) {
        self.inner.until_ready().await;
    }
}

impl std::fmt::Debug for ApiRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRateLimiter").finish_non_exhaustive()
    }
}

/// A [`PagedSource`] decorator that waits on the limiter before every call.
///
/// ```ignore
/// let source = RateLimitedSource::new(http_source, rate_limits::DEFAULT_RPS);
/// ```
pub struct RateLimitedSource<S> {
    inner: S,
    limiter: ApiRateLimiter,
}

impl<S> RateLimitedSource<S> {
    pub fn new(inner: S, requests_per_second: u32) -> Self {
        Self::with_limiter(inner, ApiRateLimiter::new(requests_per_second))
    }

    /// Wrap `inner` with an existing (possibly shared) limiter.
    pub fn with_limiter(inner: S, limiter: ApiRateLimiter) -> Self {
        Self { inner, limiter }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: Clone> Clone for RateLimitedSource<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
        }
    }
}

#[async_trait]
impl<S: PagedSource> PagedSource for RateLimitedSource<S> {
    async fn fetch_page(
        &self,
        resource: ResourceKind,
        offset: usize,
        limit: usize,
        filters: &Filters,
    ) -> Result<Page> {
        self.limiter.wait().await;
        self.inner.fetch_page(resource, offset, limit, filters).await
    }

    async fn fetch_detail(&self, resource: ResourceKind, id: &str) -> Result<Value> {
        self.limiter.wait().await;
        self.inner.fetch_detail(resource, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PagedSource for CountingSource {
        async fn fetch_page(
            &self,
            _resource: ResourceKind,
            _offset: usize,
            _limit: usize,
            _filters: &Filters,
        ) -> Result<Page> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Page::default())
        }

        async fn fetch_detail(&self, _resource: ResourceKind, id: &str) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Value::String(id.to_string()))
        }
    }

    #[test]
    fn zero_rps_is_clamped_to_one() {
        assert_eq!(quota(0), quota(1));
    }

    #[tokio::test]
    async fn first_request_is_not_delayed() {
        let limiter = ApiRateLimiter::new(100);
        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn decorator_delegates_every_call() {
        let source = RateLimitedSource::new(
            CountingSource {
                calls: AtomicUsize::new(0),
            },
            1000,
        );

        source
            .fetch_page(ResourceKind::Reviews, 0, 50, &Filters::new())
            .await
            .expect("page");
        let detail = source
            .fetch_detail(ResourceKind::ReviewProgress, "r-1")
            .await
            .expect("detail");

        assert_eq!(detail, Value::String("r-1".into()));
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 2);
    }
}
