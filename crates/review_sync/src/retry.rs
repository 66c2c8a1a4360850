//! Retry with exponential backoff, shared by remote fetches and batch writes.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use crate::sync::{INITIAL_BACKOFF_MS, MAX_BACKOFF_MS, ProgressCallback, SyncProgress, emit};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// Default multiplier between consecutive delays.
pub const DEFAULT_BACKOFF_FACTOR: f32 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Retries after the first attempt (0 disables retrying).
    pub max_retries: usize,
    /// Multiplier applied to the delay after each retry.
    pub factor: f32,
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            factor: DEFAULT_BACKOFF_FACTOR,
            with_jitter: true,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_retries,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_factor(mut self, factor: f32) -> Self {
        // backon rejects factors below 1.0
        self.factor = factor.max(1.0);
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Backoff used for transient database errors: 3 attempts, 100ms initial.
    #[must_use]
    pub fn database() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(2), 2).with_jitter(false)
    }

    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.factor)
            .with_max_times(self.max_retries);

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder
    }
}

/// Run `operation`, retrying errors for which `is_retryable` holds.
///
/// Each scheduled retry emits [`SyncProgress::RetryBackoff`] tagged with
/// `label` and logs at debug level. The last error is returned once retries
/// are exhausted.
///
/// ```ignore
/// let page = with_retry(
///     || source.fetch_page(ResourceKind::Reviews, 0, 50, &filters),
///     &RetryConfig::default(),
///     SourceError::is_transient,
///     "reviews",
///     on_progress,
/// )
/// .await?;
/// ```
pub async fn with_retry<T, E, F, Fut, R>(
    mut operation: F,
    config: &RetryConfig,
    is_retryable: R,
    label: &str,
    on_progress: Option<&ProgressCallback>,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let attempt = AtomicU32::new(0);

    let counted = || {
        attempt.fetch_add(1, Ordering::SeqCst);
        operation()
    };

    counted
        .retry(config.clone().into_backoff())
        .notify(|err: &E, dur: Duration| {
            let current = attempt.load(Ordering::SeqCst);
            emit(
                on_progress,
                SyncProgress::RetryBackoff {
                    label: label.to_string(),
                    attempt: current,
                    retry_after_ms: dur.as_millis() as u64,
                    error: err.to_string(),
                },
            );
            tracing::debug!(
                label,
                attempt = current,
                delay_ms = dur.as_millis() as u64,
                error = %err,
                "Retrying after transient error"
            );
        })
        .when(|e: &E| is_retryable(e))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct TestError {
        message: &'static str,
        transient: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.message)
        }
    }

    #[test]
    fn default_config_uses_sync_constants() {
        let config = RetryConfig::default();
        assert_eq!(config.min_delay, Duration::from_millis(INITIAL_BACKOFF_MS));
        assert_eq!(config.max_delay, Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.factor, DEFAULT_BACKOFF_FACTOR);
    }

    #[test]
    fn factor_is_clamped_to_one() {
        assert_eq!(RetryConfig::default().with_factor(0.5).factor, 1.0);
        assert_eq!(RetryConfig::default().with_factor(3.0).factor, 3.0);
    }

    #[test]
    fn database_config_allows_three_attempts() {
        let config = RetryConfig::database();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.min_delay, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_and_emits_progress() {
        let calls = Arc::new(AtomicU32::new(0));
        let events: Arc<Mutex<Vec<SyncProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let capture = Arc::clone(&events);
        let callback: ProgressCallback = Box::new(move |event| {
            capture.lock().unwrap_or_else(|e| e.into_inner()).push(event);
        });

        let counter = Arc::clone(&calls);
        let result = with_retry(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TestError {
                            message: "503",
                            transient: true,
                        })
                    } else {
                        Ok(7u32)
                    }
                }
            },
            &RetryConfig::default(),
            |e: &TestError| e.transient,
            "reviews",
            Some(&callback),
        )
        .await;

        assert_eq!(result.expect("third attempt succeeds"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let events = events.lock().unwrap_or_else(|e| e.into_inner());
        let backoffs: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                SyncProgress::RetryBackoff { label, attempt, .. } if label == "reviews" => {
                    Some(*attempt)
                }
                _ => None,
            })
            .collect();
        assert_eq!(backoffs, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = with_retry(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError {
                        message: "timeout",
                        transient: true,
                    })
                }
            },
            &RetryConfig::new(Duration::from_millis(10), Duration::from_millis(100), 2),
            |e: &TestError| e.transient,
            "workflows",
            None,
        )
        .await
        .expect_err("exhausted");

        assert_eq!(err.message, "timeout");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = with_retry(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError {
                        message: "404",
                        transient: false,
                    })
                }
            },
            &RetryConfig::default(),
            |e: &TestError| e.transient,
            "review_detail",
            None,
        )
        .await
        .expect_err("permanent");

        assert_eq!(err.to_string(), "404");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
