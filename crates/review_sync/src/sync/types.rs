//! Shared sync types and constants.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::source::Filters;

/// Default number of reviews whose details are fetched concurrently.
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

/// Default number of reviews written per chunk.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default page size for list endpoints.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Initial retry delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 500;

/// Maximum retry delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// How many per-item errors a report keeps verbatim.
pub const ERROR_SAMPLE_SIZE: usize = 10;

/// What a sync run covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncScope {
    pub project_id: String,
    /// Drop and recreate the schema before syncing.
    #[serde(default)]
    pub full_resync: bool,
    /// Filters passed to the reviews list endpoint.
    #[serde(default)]
    pub filters: Filters,
}

impl SyncScope {
    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn full(mut self) -> Self {
        self.full_resync = true;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }
}

/// Phases of a sync run, in order. `Failed` is reachable from any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPhase {
    Init,
    SchemaReset,
    WorkflowsSync,
    ReviewsSync,
    Report,
    Done,
    Failed,
}

impl SyncPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SyncPhase::Init => "init",
            SyncPhase::SchemaReset => "schema_reset",
            SyncPhase::WorkflowsSync => "workflows_sync",
            SyncPhase::ReviewsSync => "reviews_sync",
            SyncPhase::Report => "report",
            SyncPhase::Done => "done",
            SyncPhase::Failed => "failed",
        }
    }

    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncPhase::Done | SyncPhase::Failed)
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inserted/updated pair for one entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    /// Records seen after dedup.
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Records dropped before writing (missing key, failed detail fetch).
    pub skipped: usize,
}

impl EntityCounts {
    #[inline]
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Counters accumulated by one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub workflows: EntityCounts,
    pub reviews: EntityCounts,
    pub file_versions: EntityCounts,
    pub progress_steps: EntityCounts,
    /// Reviews whose workflow is neither cached nor stored.
    pub dangling_workflow_refs: usize,
    /// Reviews whose `current_step_id` names no step of their workflow.
    pub orphan_step_refs: usize,
    /// Calls short-circuited by an open circuit.
    pub circuit_open_rejections: usize,
    /// Remote total reported by the reviews list, if any.
    pub reported_review_total: Option<usize>,
    /// Per-item errors as `"<phase> <entity id>: <message>"`.
    pub errors: Vec<String>,
}

impl SyncStats {
    pub fn push_error(&mut self, phase: SyncPhase, entity_id: &str, message: impl std::fmt::Display) {
        self.errors.push(format!("{phase} {entity_id}: {message}"));
    }

    /// Records written across all entity kinds.
    pub fn items_written(&self) -> usize {
        self.workflows.written()
            + self.reviews.written()
            + self.file_versions.written()
            + self.progress_steps.written()
    }
}

/// Cooperative cancellation flag shared between a run and its controller.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_builder_sets_filters() {
        let scope = SyncScope::project("p-1").full().with_filter("status", "OPEN");
        assert!(scope.full_resync);
        assert_eq!(scope.filters.get("status").map(String::as_str), Some("OPEN"));
    }

    #[test]
    fn push_error_formats_phase_and_id() {
        let mut stats = SyncStats::default();
        stats.push_error(SyncPhase::ReviewsSync, "r-9", "HTTP 404");
        assert_eq!(stats.errors, vec!["reviews_sync r-9: HTTP 404".to_string()]);
    }

    #[test]
    fn terminal_phases() {
        assert!(SyncPhase::Done.is_terminal());
        assert!(SyncPhase::Failed.is_terminal());
        assert!(!SyncPhase::Report.is_terminal());
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn items_written_sums_all_kinds() {
        let mut stats = SyncStats::default();
        stats.workflows.inserted = 3;
        stats.reviews.updated = 2;
        stats.progress_steps.inserted = 4;
        assert_eq!(stats.items_written(), 9);
    }
}
