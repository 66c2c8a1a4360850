//! Source access with caching, retries, per-call deadlines and circuit
//! breaking layered over a [`PagedSource`].
//!
//! Every remote call runs as
//! `breaker(dependency) -> retry(transient) -> timeout -> source`, so one
//! logical call counts once against the breaker however many attempts it
//! took.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::cache::CacheLayer;
use crate::circuit_breaker::CircuitBreaker;
use crate::retry::{RetryConfig, with_retry};
use crate::source::{Filters, Page, PagedSource, ResourceKind, Result, SourceError};
use crate::sync::transform::{detail_records, record_id};
use crate::sync::{CancelFlag, ProgressCallback, SyncConfig, SyncProgress, emit};

/// Cache kind under which workflow payloads are stored.
pub const WORKFLOW_CACHE_KIND: &str = "workflow";

/// Cache parameters addressing one workflow.
#[inline]
pub fn workflow_cache_params(workflow_id: &str) -> Value {
    json!({ "id": workflow_id })
}

// ─── Metrics ─────────────────────────────────────────────────────────────────

/// Source-side counters, read by the sync report.
#[derive(Debug, Default)]
pub struct ApiMetrics {
    calls: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
    circuit_open: AtomicU64,
    busy_micros: AtomicU64,
}

/// Point-in-time copy of [`ApiMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ApiMetricsSnapshot {
    /// Attempts sent to the source, retries included.
    pub calls: u64,
    /// Attempts that failed.
    pub errors: u64,
    pub retries: u64,
    /// Calls rejected by an open breaker without reaching the source.
    pub circuit_open: u64,
    #[serde(skip)]
    pub busy_time: Duration,
}

impl ApiMetricsSnapshot {
    /// Fraction of attempts that succeeded; zero when nothing was sent.
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            return 0.0;
        }
        (self.calls - self.errors.min(self.calls)) as f64 / self.calls as f64
    }

    /// Counters accumulated since `start` was taken.
    pub fn since(&self, start: &Self) -> Self {
        Self {
            calls: self.calls.saturating_sub(start.calls),
            errors: self.errors.saturating_sub(start.errors),
            retries: self.retries.saturating_sub(start.retries),
            circuit_open: self.circuit_open.saturating_sub(start.circuit_open),
            busy_time: self.busy_time.saturating_sub(start.busy_time),
        }
    }
}

impl ApiMetrics {
    fn record(&self, elapsed: Duration, ok: bool) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.busy_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ApiMetricsSnapshot {
        ApiMetricsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            circuit_open: self.circuit_open.load(Ordering::Relaxed),
            busy_time: Duration::from_micros(self.busy_micros.load(Ordering::Relaxed)),
        }
    }
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// Every page of a list resource.
#[derive(Debug, Default)]
pub struct FetchedList {
    pub records: Vec<Value>,
    /// Last total the source reported, if any page carried one.
    pub reported_total: Option<usize>,
    pub pages: usize,
}

/// Sub-resources of one review.
#[derive(Debug, Clone)]
pub struct ReviewDetails {
    pub review_id: String,
    pub review: Value,
    pub versions: Vec<Value>,
    pub progress: Vec<Value>,
    /// Owning workflow, `None` when it could not be fetched.
    pub workflow: Option<Value>,
    pub workflow_from_cache: bool,
    /// Non-fatal problems met while fetching.
    pub warnings: Vec<String>,
}

/// Outcome of fetching one review's details.
#[derive(Debug)]
pub enum DetailOutcome {
    Fetched(Box<ReviewDetails>),
    Failed { review_id: String, error: SourceError },
    /// Cancellation was requested before this review started.
    Skipped { review_id: String },
}

impl DetailOutcome {
    pub fn review_id(&self) -> &str {
        match self {
            DetailOutcome::Fetched(details) => &details.review_id,
            DetailOutcome::Failed { review_id, .. } | DetailOutcome::Skipped { review_id } => {
                review_id
            }
        }
    }
}

/// Workflow id a review record points at.
fn workflow_ref(review: &Value) -> Option<String> {
    match review.get("workflowId")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A single-record response, possibly wrapped as `{results: [record]}`.
fn single_record(body: Value) -> Option<Value> {
    match body {
        Value::Null => None,
        Value::Array(items) => items.into_iter().next(),
        Value::Object(ref map) if map.contains_key("results") && !map.contains_key("id") => {
            detail_records(body).into_iter().next()
        }
        other => Some(other),
    }
}

// ─── Fetcher ─────────────────────────────────────────────────────────────────

/// Fetches lists and per-review details from a [`PagedSource`].
pub struct RateLimitedFetcher {
    source: Arc<dyn PagedSource>,
    cache: Arc<CacheLayer>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
    call_timeout: Duration,
    page_size: usize,
    max_concurrent: usize,
    metrics: ApiMetrics,
}

impl std::fmt::Debug for RateLimitedFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedFetcher")
            .field("page_size", &self.page_size)
            .field("max_concurrent", &self.max_concurrent)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl RateLimitedFetcher {
    pub fn new(
        source: Arc<dyn PagedSource>,
        cache: Arc<CacheLayer>,
        breaker: Arc<CircuitBreaker>,
        config: &SyncConfig,
    ) -> Self {
        let config = config.clone().normalized();
        Self {
            source,
            cache,
            breaker,
            retry: config.retry(),
            call_timeout: config.call_timeout(),
            page_size: config.page_size,
            max_concurrent: config.max_concurrent,
            metrics: ApiMetrics::default(),
        }
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn metrics(&self) -> ApiMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run one logical call through breaker, retry and deadline.
    async fn call<T, F, Fut>(
        &self,
        resource: ResourceKind,
        op: F,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let dependency = resource.dependency();
        let op = &op;
        let metrics = &self.metrics;
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let deadline = self.call_timeout;

        let attempt = move || async move {
            if attempts.fetch_add(1, Ordering::SeqCst) > 0 {
                metrics.retries.fetch_add(1, Ordering::Relaxed);
            }
            let started = Instant::now();
            let result = match tokio::time::timeout(deadline, op()).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::timeout(deadline)),
            };
            metrics.record(started.elapsed(), result.is_ok());
            result
        };

        let result = self
            .breaker
            .execute_classified(
                dependency,
                || {
                    with_retry(
                        attempt,
                        &self.retry,
                        SourceError::is_transient,
                        resource.as_str(),
                        on_progress,
                    )
                },
                SourceError::is_dependency_failure,
            )
            .await;

        if let Err(e) = &result
            && e.is_circuit_open()
        {
            metrics.circuit_open.fetch_add(1, Ordering::Relaxed);
            emit(
                on_progress,
                SyncProgress::CircuitOpen {
                    dependency: dependency.to_string(),
                },
            );
        }
        result
    }

    /// Fetch one page of a list resource.
    pub async fn fetch_page(
        &self,
        resource: ResourceKind,
        offset: usize,
        filters: &Filters,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<Page> {
        let limit = self.page_size;
        self.call(
            resource,
            || self.source.fetch_page(resource, offset, limit, filters),
            on_progress,
        )
        .await
    }

    /// Fetch every page of a list resource.
    ///
    /// Stops on an empty or short page, or once the reported total has been
    /// reached. A failing page aborts the listing.
    #[tracing::instrument(skip(self, filters, on_progress), fields(resource = %resource))]
    pub async fn fetch_all(
        &self,
        resource: ResourceKind,
        filters: &Filters,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<FetchedList> {
        let mut list = FetchedList::default();
        let mut offset = 0;

        loop {
            let page = self.fetch_page(resource, offset, filters, on_progress).await?;
            list.pages += 1;
            if page.total_count.is_some() {
                list.reported_total = page.total_count;
            }

            let count = page.records.len();
            list.records.extend(page.records);
            emit(
                on_progress,
                SyncProgress::FetchedPage {
                    resource: resource.as_str().to_string(),
                    offset,
                    count,
                    total_so_far: list.records.len(),
                    reported_total: list.reported_total,
                },
            );

            if count == 0 || count < self.page_size {
                break;
            }
            if let Some(total) = list.reported_total
                && list.records.len() >= total
            {
                break;
            }
            offset += self.page_size;
        }

        tracing::debug!(
            resource = %resource,
            records = list.records.len(),
            pages = list.pages,
            "Listing complete"
        );
        emit(
            on_progress,
            SyncProgress::FetchComplete {
                resource: resource.as_str().to_string(),
                total: list.records.len(),
            },
        );
        Ok(list)
    }

    /// Fetch a per-review sub-resource.
    pub async fn fetch_detail(
        &self,
        resource: ResourceKind,
        review_id: &str,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<Value> {
        self.call(
            resource,
            || self.source.fetch_detail(resource, review_id),
            on_progress,
        )
        .await
    }

    /// Workflow owning a review, from the cache when possible.
    ///
    /// Returns the payload and whether it came from the cache. A fetched
    /// workflow is cached under its own id.
    pub async fn review_workflow(
        &self,
        review_id: &str,
        workflow_id: Option<&str>,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<(Option<Value>, bool)> {
        if let Some(id) = workflow_id
            && let Some(cached) = self
                .cache
                .get(WORKFLOW_CACHE_KIND, &workflow_cache_params(id))
        {
            return Ok((Some(cached), true));
        }

        let body = self
            .fetch_detail(ResourceKind::ReviewWorkflow, review_id, on_progress)
            .await?;
        let workflow = single_record(body);
        if let Some(workflow) = &workflow
            && let Some(id) = record_id(workflow).or_else(|| workflow_id.map(str::to_string))
        {
            self.cache.set(
                WORKFLOW_CACHE_KIND,
                &workflow_cache_params(&id),
                workflow.clone(),
            );
        }
        Ok((workflow, false))
    }

    /// Versions, progress and workflow of one review, fetched in sequence.
    ///
    /// Versions or progress failing fails the review. A workflow that cannot
    /// be fetched is left out with a warning.
    async fn review_details(&self, review: Value, review_id: String) -> DetailOutcome {
        let versions = match self
            .fetch_detail(ResourceKind::ReviewVersions, &review_id, None)
            .await
        {
            Ok(body) => detail_records(body),
            Err(error) => return DetailOutcome::Failed { review_id, error },
        };
        let progress = match self
            .fetch_detail(ResourceKind::ReviewProgress, &review_id, None)
            .await
        {
            Ok(body) => detail_records(body),
            Err(error) => return DetailOutcome::Failed { review_id, error },
        };

        let mut warnings = Vec::new();
        let workflow_id = workflow_ref(&review);
        let (workflow, workflow_from_cache) = match self
            .review_workflow(&review_id, workflow_id.as_deref(), None)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(review_id, error = %e, "Workflow fetch failed");
                warnings.push(format!("review {review_id}: workflow unavailable: {e}"));
                (None, false)
            }
        };

        DetailOutcome::Fetched(Box::new(ReviewDetails {
            review_id,
            review,
            versions,
            progress,
            workflow,
            workflow_from_cache,
            warnings,
        }))
    }

    /// Fetch details for many reviews with at most `max_concurrent` in
    /// flight. Outcomes are returned in input order.
    ///
    /// Reviews not yet started when `cancel` is raised come back as
    /// [`DetailOutcome::Skipped`].
    pub async fn fetch_review_details(
        self: &Arc<Self>,
        reviews: Vec<Value>,
        cancel: &CancelFlag,
        on_progress: Option<&ProgressCallback>,
    ) -> Vec<DetailOutcome> {
        if reviews.is_empty() {
            return Vec::new();
        }

        let concurrency = self.max_concurrent.clamp(1, reviews.len());
        let semaphore = Arc::new(Semaphore::new(concurrency));

        emit(
            on_progress,
            SyncProgress::FetchingDetails {
                count: reviews.len(),
                concurrency,
            },
        );

        let mut handles = Vec::with_capacity(reviews.len());

        for review in reviews {
            let review_id = record_id(&review).unwrap_or_default();
            let fetcher = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let spawned_id = review_id.clone();

            let handle = tokio::spawn(async move {
                let review_id = spawned_id;
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return DetailOutcome::Failed {
                            review_id,
                            error: SourceError::transient("Semaphore closed unexpectedly"),
                        };
                    }
                };
                if cancel.is_cancelled() {
                    return DetailOutcome::Skipped { review_id };
                }
                if review_id.is_empty() {
                    return DetailOutcome::Failed {
                        review_id,
                        error: SourceError::decode("review record has no id"),
                    };
                }
                fetcher.review_details(review, review_id).await
            });

            handles.push((review_id, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (review_id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => DetailOutcome::Failed {
                    review_id,
                    error: SourceError::transient(format!("Task panic: {e}")),
                },
            };

            match &outcome {
                DetailOutcome::Fetched(details) => {
                    for message in &details.warnings {
                        emit(
                            on_progress,
                            SyncProgress::Warning {
                                message: message.clone(),
                            },
                        );
                    }
                    emit(
                        on_progress,
                        SyncProgress::DetailFetched {
                            review_id: details.review_id.clone(),
                        },
                    );
                }
                DetailOutcome::Failed { review_id, error } => emit(
                    on_progress,
                    SyncProgress::DetailError {
                        review_id: review_id.clone(),
                        error: error.to_string(),
                    },
                ),
                DetailOutcome::Skipped { .. } => {}
            }
            outcomes.push(outcome);
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use crate::circuit_breaker::CircuitState;

    use super::*;

    /// In-memory source with scripted failures and an in-flight gauge.
    #[derive(Default)]
    struct FakeSource {
        reviews: Vec<Value>,
        report_total: bool,
        failures: Mutex<HashMap<(ResourceKind, String), Vec<SourceError>>>,
        calls: Mutex<Vec<(ResourceKind, String)>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl FakeSource {
        fn with_reviews(n: usize) -> Self {
            Self {
                reviews: (0..n)
                    .map(|i| json!({"id": format!("r-{i}"), "workflowId": "wf-1"}))
                    .collect(),
                report_total: true,
                ..Self::default()
            }
        }

        fn fail(&self, resource: ResourceKind, id: &str, errors: Vec<SourceError>) {
            self.failures
                .lock()
                .expect("lock")
                .insert((resource, id.to_string()), errors);
        }

        fn calls_to(&self, resource: ResourceKind) -> usize {
            self.calls
                .lock()
                .expect("lock")
                .iter()
                .filter(|(r, _)| *r == resource)
                .count()
        }

        fn scripted(&self, resource: ResourceKind, id: &str) -> Option<SourceError> {
            let mut failures = self.failures.lock().expect("lock");
            let queue = failures.get_mut(&(resource, id.to_string()))?;
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0))
            }
        }

        async fn enter(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PagedSource for FakeSource {
        async fn fetch_page(
            &self,
            resource: ResourceKind,
            offset: usize,
            limit: usize,
            _filters: &Filters,
        ) -> Result<Page> {
            self.calls
                .lock()
                .expect("lock")
                .push((resource, offset.to_string()));
            if let Some(e) = self.scripted(resource, &offset.to_string()) {
                return Err(e);
            }
            let records = self.reviews.iter().skip(offset).take(limit).cloned().collect();
            Ok(Page {
                records,
                total_count: self.report_total.then_some(self.reviews.len()),
            })
        }

        async fn fetch_detail(&self, resource: ResourceKind, id: &str) -> Result<Value> {
            self.calls
                .lock()
                .expect("lock")
                .push((resource, id.to_string()));
            self.enter().await;
            if let Some(e) = self.scripted(resource, id) {
                return Err(e);
            }
            Ok(match resource {
                ResourceKind::ReviewWorkflow => json!({"id": "wf-1", "name": "Two step"}),
                _ => json!({"results": [{"id": format!("{id}-x")}]}),
            })
        }
    }

    fn fetcher(source: Arc<FakeSource>, config: SyncConfig) -> Arc<RateLimitedFetcher> {
        Arc::new(RateLimitedFetcher::new(
            source,
            Arc::new(config.cache()),
            Arc::new(CircuitBreaker::new(config.breaker())),
            &config,
        ))
    }

    #[tokio::test]
    async fn fetch_all_pages_until_reported_total() {
        let source = Arc::new(FakeSource::with_reviews(120));
        let fetcher = fetcher(Arc::clone(&source), SyncConfig::default());

        let list = fetcher
            .fetch_all(ResourceKind::Reviews, &Filters::new(), None)
            .await
            .expect("listing");

        assert_eq!(list.records.len(), 120);
        assert_eq!(list.pages, 3);
        assert_eq!(list.reported_total, Some(120));
        assert_eq!(source.calls_to(ResourceKind::Reviews), 3);
    }

    #[tokio::test]
    async fn fetch_all_stops_at_exact_total_without_extra_page() {
        let source = Arc::new(FakeSource::with_reviews(100));
        let fetcher = fetcher(Arc::clone(&source), SyncConfig::default());

        let list = fetcher
            .fetch_all(ResourceKind::Reviews, &Filters::new(), None)
            .await
            .expect("listing");

        assert_eq!(list.records.len(), 100);
        assert_eq!(source.calls_to(ResourceKind::Reviews), 2);
    }

    #[tokio::test]
    async fn fetch_all_without_total_stops_on_empty_page() {
        let mut source = FakeSource::with_reviews(100);
        source.report_total = false;
        let source = Arc::new(source);
        let fetcher = fetcher(Arc::clone(&source), SyncConfig::default());

        let list = fetcher
            .fetch_all(ResourceKind::Reviews, &Filters::new(), None)
            .await
            .expect("listing");

        assert_eq!(list.records.len(), 100);
        assert_eq!(list.reported_total, None);
        assert_eq!(source.calls_to(ResourceKind::Reviews), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_page_errors_are_retried() {
        let source = Arc::new(FakeSource::with_reviews(10));
        source.fail(
            ResourceKind::Reviews,
            "0",
            vec![SourceError::transient("502"), SourceError::transient("503")],
        );
        let fetcher = fetcher(Arc::clone(&source), SyncConfig::default());

        let list = fetcher
            .fetch_all(ResourceKind::Reviews, &Filters::new(), None)
            .await
            .expect("third attempt succeeds");

        assert_eq!(list.records.len(), 10);
        let metrics = fetcher.metrics();
        assert_eq!(metrics.calls, 3);
        assert_eq!(metrics.errors, 2);
        assert_eq!(metrics.retries, 2);
        assert_eq!(fetcher.breaker().state("reviews"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let source = Arc::new(FakeSource::with_reviews(10));
        source.fail(
            ResourceKind::Reviews,
            "0",
            vec![SourceError::permanent(Some(404), "not found")],
        );
        let fetcher = fetcher(Arc::clone(&source), SyncConfig::default());

        let err = fetcher
            .fetch_all(ResourceKind::Reviews, &Filters::new(), None)
            .await
            .expect_err("404");

        assert!(matches!(err, SourceError::Permanent { status: Some(404), .. }));
        assert_eq!(source.calls_to(ResourceKind::Reviews), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn details_respect_concurrency_limit_and_order() {
        let mut source = FakeSource::with_reviews(30);
        source.delay = Duration::from_millis(20);
        let source = Arc::new(source);
        let config = SyncConfig {
            max_concurrent: 4,
            ..SyncConfig::default()
        };
        let fetcher = fetcher(Arc::clone(&source), config);

        let outcomes = fetcher
            .fetch_review_details(source.reviews.clone(), &CancelFlag::new(), None)
            .await;

        assert_eq!(outcomes.len(), 30);
        assert!(source.peak.load(Ordering::SeqCst) <= 4);
        let ids: Vec<&str> = outcomes.iter().map(DetailOutcome::review_id).collect();
        let expected: Vec<String> = (0..30).map(|i| format!("r-{i}")).collect();
        assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn workflow_is_fetched_once_then_served_from_cache() {
        let source = Arc::new(FakeSource::with_reviews(5));
        let config = SyncConfig {
            max_concurrent: 1,
            ..SyncConfig::default()
        };
        let fetcher = fetcher(Arc::clone(&source), config);

        let outcomes = fetcher
            .fetch_review_details(source.reviews.clone(), &CancelFlag::new(), None)
            .await;

        assert_eq!(source.calls_to(ResourceKind::ReviewWorkflow), 1);
        let cached = outcomes
            .iter()
            .filter(|o| matches!(o, DetailOutcome::Fetched(d) if d.workflow_from_cache))
            .count();
        assert_eq!(cached, 4);
    }

    #[tokio::test]
    async fn workflow_failure_keeps_review_with_warning() {
        let source = Arc::new(FakeSource::with_reviews(1));
        source.fail(
            ResourceKind::ReviewWorkflow,
            "r-0",
            vec![SourceError::permanent(Some(404), "gone")],
        );
        let fetcher = fetcher(Arc::clone(&source), SyncConfig::default());

        let outcomes = fetcher
            .fetch_review_details(source.reviews.clone(), &CancelFlag::new(), None)
            .await;

        match &outcomes[0] {
            DetailOutcome::Fetched(details) => {
                assert!(details.workflow.is_none());
                assert_eq!(details.warnings.len(), 1);
                assert_eq!(details.versions.len(), 1);
            }
            other => panic!("expected fetched details, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn progress_failure_fails_only_that_review() {
        let source = Arc::new(FakeSource::with_reviews(3));
        source.fail(
            ResourceKind::ReviewProgress,
            "r-1",
            vec![SourceError::permanent(Some(400), "bad request")],
        );
        let fetcher = fetcher(Arc::clone(&source), SyncConfig::default());

        let outcomes = fetcher
            .fetch_review_details(source.reviews.clone(), &CancelFlag::new(), None)
            .await;

        assert!(matches!(outcomes[0], DetailOutcome::Fetched(_)));
        assert!(matches!(
            &outcomes[1],
            DetailOutcome::Failed { review_id, .. } if review_id == "r-1"
        ));
        assert!(matches!(outcomes[2], DetailOutcome::Fetched(_)));
    }

    #[tokio::test]
    async fn cancelled_fan_out_skips_remaining_reviews() {
        let source = Arc::new(FakeSource::with_reviews(5));
        let fetcher = fetcher(Arc::clone(&source), SyncConfig::default());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let outcomes = fetcher
            .fetch_review_details(source.reviews.clone(), &cancel, None)
            .await;

        assert!(
            outcomes
                .iter()
                .all(|o| matches!(o, DetailOutcome::Skipped { .. }))
        );
        assert_eq!(source.calls_to(ResourceKind::ReviewVersions), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_rejects_without_calling_source() {
        let source = Arc::new(FakeSource::with_reviews(1));
        source.fail(
            ResourceKind::ReviewVersions,
            "r-0",
            vec![SourceError::transient("down"); 10],
        );
        let config = SyncConfig {
            circuit_breaker_threshold: 1,
            max_retries: 0,
            ..SyncConfig::default()
        };
        let fetcher = fetcher(Arc::clone(&source), config);

        let first = fetcher
            .fetch_detail(ResourceKind::ReviewVersions, "r-0", None)
            .await
            .expect_err("transient failure");
        assert!(first.is_transient());

        let second = fetcher
            .fetch_detail(ResourceKind::ReviewProgress, "r-0", None)
            .await
            .expect_err("breaker open");
        assert!(second.is_circuit_open());
        assert_eq!(source.calls_to(ResourceKind::ReviewProgress), 0);
        assert_eq!(fetcher.metrics().circuit_open, 1);
    }

    #[test]
    fn single_record_unwraps_results() {
        assert_eq!(
            single_record(json!({"results": [{"id": "w"}]})),
            Some(json!({"id": "w"}))
        );
        assert_eq!(single_record(json!({"id": "w"})), Some(json!({"id": "w"})));
        assert_eq!(single_record(Value::Null), None);
    }

    #[test]
    fn success_rate_of_idle_metrics_is_zero() {
        assert_eq!(ApiMetricsSnapshot::default().success_rate(), 0.0);
    }
}
