//! Progress events emitted while a sync runs.
//!
//! The library never renders anything itself. Callers pass a
//! [`ProgressCallback`] and decide how to display (or log) each event.

use super::types::SyncPhase;

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// A run moved to a new phase.
    PhaseStarted {
        phase: SyncPhase,
    },

    /// Fetched one page of a list resource.
    FetchedPage {
        resource: String,
        offset: usize,
        count: usize,
        total_so_far: usize,
        /// Total reported by the source, if any.
        reported_total: Option<usize>,
    },

    /// Finished paging a list resource.
    FetchComplete {
        resource: String,
        total: usize,
    },

    /// Starting the per-review detail fan-out for one chunk.
    FetchingDetails {
        count: usize,
        concurrency: usize,
    },

    /// Details for one review fetched.
    DetailFetched {
        review_id: String,
    },

    /// Details for one review failed; the review is skipped.
    DetailError {
        review_id: String,
        error: String,
    },

    /// A batch write completed.
    Persisted {
        entity: &'static str,
        inserted: usize,
        updated: usize,
    },

    /// Cache warmed with freshly written records.
    CacheWarmed {
        count: usize,
    },

    /// One reviews chunk fully processed.
    ChunkComplete {
        chunk: usize,
        chunks: usize,
        processed: usize,
    },

    /// A transient error is being retried after a delay.
    RetryBackoff {
        /// What was being retried (resource or entity name).
        label: String,
        retry_after_ms: u64,
        attempt: u32,
        error: String,
    },

    /// A call was rejected by an open circuit.
    CircuitOpen {
        dependency: String,
    },

    /// Non-fatal condition worth surfacing.
    Warning {
        message: String,
    },

    /// Cancellation observed; the run stops at the next boundary.
    Cancelled {
        phase: SyncPhase,
    },

    /// The run reached `Done`.
    SyncComplete {
        duration_ms: u64,
        items: usize,
        errors: usize,
    },
}

/// Callback for progress updates during sync operations.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_invokes_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let callback: ProgressCallback = Box::new(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        emit(
            Some(&callback),
            SyncProgress::FetchComplete {
                resource: "reviews".to_string(),
                total: 120,
            },
        );
        emit(
            Some(&callback),
            SyncProgress::PhaseStarted {
                phase: SyncPhase::ReviewsSync,
            },
        );

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn emit_without_callback_is_a_no_op() {
        emit(
            None,
            SyncProgress::CacheWarmed { count: 3 },
        );
    }

    #[test]
    fn debug_output_names_variant_and_fields() {
        let event = SyncProgress::DetailError {
            review_id: "r-42".to_string(),
            error: "HTTP 500".to_string(),
        };
        let debug = format!("{event:?}");
        assert!(debug.contains("DetailError"));
        assert!(debug.contains("r-42"));
    }
}
