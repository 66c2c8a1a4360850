//! Phase sequencing for one sync run.
//!
//! ```text
//! INIT -> [SCHEMA_RESET] -> WORKFLOWS_SYNC -> REVIEWS_SYNC -> REPORT -> DONE
//!   \_________________________________________________________________-> FAILED
//! ```
//!
//! Workflows are committed before any review is fetched, so reviews only
//! reference workflows that are already stored unless the source changed in
//! between. Reviews are processed in chunks; each chunk is fetched
//! concurrently and then written kind by kind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde_json::{Map, Value, json};
use tokio::time::Instant;
use uuid::Uuid;

use crate::cache::{CacheLayer, CacheStats};
use crate::circuit_breaker::CircuitBreaker;
use crate::db;
use crate::fetcher::{
    ApiMetricsSnapshot, DetailOutcome, RateLimitedFetcher, ReviewDetails, WORKFLOW_CACHE_KIND, workflow_cache_params,
};
use crate::source::{Filters, PagedSource, ResourceKind, TokenProvider};
use crate::tasks::{TaskLifecycleManager, TaskSnapshot};
use crate::writer::{BatchUpsertWriter, DbMetricsSnapshot, EntityKind, UpsertCounts};

use super::config::SyncConfig;
use super::errors::{Result, SyncError};
use super::progress::{ProgressCallback, SyncProgress, emit};
use super::report::{RunMetrics, RunOutcome, SyncReport};
use super::transform::{
    StepDescriptor, dedup_latest, file_version_models, progress_models, record_id, review_model,
    template_steps, workflow_model,
};
use super::types::{CancelFlag, EntityCounts, SyncPhase, SyncScope, SyncStats};

/// Share of the task percentage reserved for phases before REVIEWS_SYNC.
const REVIEWS_START_PERCENT: u64 = 10;
/// Percentage reported once the last review chunk is written.
const REVIEWS_END_PERCENT: u64 = 95;

/// Mutable state of one run.
struct RunState {
    phase: SyncPhase,
    stats: SyncStats,
    synced_at: chrono::DateTime<chrono::FixedOffset>,
    /// Workflow steps looked up in the store, by workflow id.
    stored_steps: HashMap<String, Option<Vec<StepDescriptor>>>,
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn add_counts(counts: &mut EntityCounts, written: UpsertCounts) {
    counts.inserted += written.inserted;
    counts.updated += written.updated;
}

/// Drives sync runs and keeps their reports.
pub struct SyncOrchestrator {
    fetcher: Arc<RateLimitedFetcher>,
    writer: Arc<BatchUpsertWriter>,
    tasks: Arc<TaskLifecycleManager>,
    tokens: Arc<dyn TokenProvider>,
    config: SyncConfig,
    reports: Arc<Mutex<HashMap<String, SyncReport>>>,
    cancels: Mutex<HashMap<String, CancelFlag>>,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("config", &self.config)
            .field("fetcher", &self.fetcher)
            .field("writer", &self.writer)
            .finish_non_exhaustive()
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SyncOrchestrator {
    /// Wire a fetcher, writer and task manager from one config.
    pub fn new(
        source: Arc<dyn PagedSource>,
        tokens: Arc<dyn TokenProvider>,
        db: DatabaseConnection,
        config: SyncConfig,
    ) -> Self {
        let config = config.normalized();
        let cache = Arc::new(config.cache());
        let breaker = Arc::new(CircuitBreaker::new(config.breaker()));
        let fetcher = Arc::new(RateLimitedFetcher::new(source, cache, breaker, &config));
        let writer = Arc::new(BatchUpsertWriter::new(db).with_batch_size(config.batch_size));
        Self::from_parts(fetcher, writer, Arc::default(), tokens, config)
    }

    /// Assemble an orchestrator from shared parts.
    ///
    /// Reports are dropped when the task manager expires their task. The
    /// expiry sweep starts here when a runtime is available, otherwise with
    /// the first run.
    pub fn from_parts(
        fetcher: Arc<RateLimitedFetcher>,
        writer: Arc<BatchUpsertWriter>,
        tasks: Arc<TaskLifecycleManager>,
        tokens: Arc<dyn TokenProvider>,
        config: SyncConfig,
    ) -> Self {
        let reports: Arc<Mutex<HashMap<String, SyncReport>>> = Arc::default();
        let expired = Arc::clone(&reports);
        tasks.on_expired(move |task_ids| {
            let mut reports = guard(&expired);
            for task_id in task_ids {
                reports.remove(task_id);
            }
        });
        if tokio::runtime::Handle::try_current().is_ok() {
            tasks.start();
        }

        Self {
            fetcher,
            writer,
            tasks,
            tokens,
            config: config.normalized(),
            reports,
            cancels: Mutex::new(HashMap::new()),
        }
    }

    pub fn fetcher(&self) -> &Arc<RateLimitedFetcher> {
        &self.fetcher
    }

    pub fn writer(&self) -> &Arc<BatchUpsertWriter> {
        &self.writer
    }

    pub fn tasks(&self) -> &Arc<TaskLifecycleManager> {
        &self.tasks
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn cache(&self) -> &CacheLayer {
        self.fetcher.cache()
    }

    // ─── Produced Interface ──────────────────────────────────────────────────

    /// Start a run in the background and return its task id immediately.
    pub fn start_sync(self: &Arc<Self>, scope: SyncScope) -> String {
        let task_id = Uuid::new_v4().to_string();
        let cancel = self.register(&task_id, &scope);

        let this = Arc::clone(self);
        let id = task_id.clone();
        tokio::spawn(async move {
            this.drive(&scope, &id, &cancel, None).await;
        });

        task_id
    }

    /// Run to completion. The returned report is also kept for
    /// [`get_report`](Self::get_report).
    pub async fn run(
        &self,
        scope: &SyncScope,
        task_id: &str,
        on_progress: Option<&ProgressCallback>,
    ) -> SyncReport {
        let cancel = self.register(task_id, scope);
        self.drive(scope, task_id, &cancel, on_progress).await
    }

    /// Ask a run to stop at its next phase or chunk boundary.
    pub fn cancel(&self, task_id: &str) -> bool {
        match guard(&self.cancels).get(task_id) {
            Some(flag) => {
                flag.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancellation flag of a registered run, for callers wiring signals.
    pub fn cancel_flag(&self, task_id: &str) -> Option<CancelFlag> {
        guard(&self.cancels).get(task_id).cloned()
    }

    pub fn get_status(&self, task_id: &str) -> TaskSnapshot {
        self.tasks.status(task_id)
    }

    /// Report of a finished run.
    pub fn get_report(&self, task_id: &str) -> Option<SyncReport> {
        guard(&self.reports).get(task_id).cloned()
    }

    fn register(&self, task_id: &str, scope: &SyncScope) -> CancelFlag {
        self.tasks.start();
        self.tasks.register(
            task_id,
            object(json!({
                "current_stage": SyncPhase::Init.as_str(),
                "percentage": 0,
                "project_id": scope.project_id,
                "full_resync": scope.full_resync,
            })),
        );
        guard(&self.cancels)
            .entry(task_id.to_string())
            .or_default()
            .clone()
    }

    // ─── Run ─────────────────────────────────────────────────────────────────

    /// Shared counters; a run reports the difference across its own span.
    fn counters(&self) -> (ApiMetricsSnapshot, DbMetricsSnapshot, CacheStats) {
        (
            self.fetcher.metrics(),
            self.writer.metrics(),
            self.cache().stats(),
        )
    }

    #[tracing::instrument(skip(self, scope, cancel, on_progress), fields(project = %scope.project_id))]
    async fn drive(
        &self,
        scope: &SyncScope,
        task_id: &str,
        cancel: &CancelFlag,
        on_progress: Option<&ProgressCallback>,
    ) -> SyncReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let baseline = self.counters();
        let mut state = RunState {
            phase: SyncPhase::Init,
            stats: SyncStats::default(),
            synced_at: started_at.fixed_offset(),
            stored_steps: HashMap::new(),
        };

        let result = self
            .execute(scope, task_id, cancel, &mut state, on_progress)
            .await;

        let (outcome, error) = match &result {
            Ok(()) => (RunOutcome::Completed, None),
            Err(e) if e.is_cancelled() => (RunOutcome::Cancelled, Some(e.to_string())),
            Err(e) => (RunOutcome::Failed, Some(e.to_string())),
        };
        let last_phase = match outcome {
            RunOutcome::Completed => SyncPhase::Done,
            _ => state.phase,
        };

        let (api, db, cache) = self.counters();
        let api = api.since(&baseline.0);
        state.stats.circuit_open_rejections = api.circuit_open as usize;
        let metrics = RunMetrics {
            api,
            db: db.since(&baseline.1),
            cache: self
                .cache()
                .is_enabled()
                .then(|| cache.since(&baseline.2)),
            breakers: self.fetcher.breaker().snapshot(),
        };
        let report = SyncReport::new(
            task_id,
            scope,
            outcome,
            last_phase,
            error.clone(),
            state.stats,
            started_at,
            clock.elapsed(),
            metrics,
        );
        // Stored before the task turns terminal; expiry removes both.
        guard(&self.reports).insert(task_id.to_string(), report.clone());

        match &error {
            None => {
                let summary = serde_json::to_value(&report.stats).unwrap_or(Value::Null);
                self.tasks.update(
                    task_id,
                    object(json!({
                        "current_stage": SyncPhase::Done.as_str(),
                        "percentage": 100,
                    })),
                );
                self.tasks.complete(task_id, Some(summary));
                tracing::info!(
                    items = report.stats.items_written(),
                    errors = report.errors_total,
                    duration_ms = report.duration.as_millis() as u64,
                    "Sync complete"
                );
                emit(
                    on_progress,
                    SyncProgress::SyncComplete {
                        duration_ms: report.duration.as_millis() as u64,
                        items: report.stats.items_written(),
                        errors: report.errors_total,
                    },
                );
            }
            Some(message) => {
                self.tasks.fail(task_id, message);
                if outcome == RunOutcome::Cancelled {
                    tracing::warn!(phase = %last_phase, "Sync cancelled");
                } else {
                    tracing::error!(phase = %last_phase, error = %message, "Sync failed");
                }
            }
        }

        guard(&self.cancels).remove(task_id);
        report
    }

    async fn execute(
        &self,
        scope: &SyncScope,
        task_id: &str,
        cancel: &CancelFlag,
        state: &mut RunState,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        self.enter(SyncPhase::Init, task_id, 0, state, on_progress);
        self.init(scope).await?;
        self.checkpoint(cancel, state, on_progress)?;

        if scope.full_resync {
            self.enter(SyncPhase::SchemaReset, task_id, 2, state, on_progress);
            self.reset_schema().await?;
            self.checkpoint(cancel, state, on_progress)?;
        }

        self.enter(SyncPhase::WorkflowsSync, task_id, 5, state, on_progress);
        self.sync_workflows(state, on_progress).await?;
        self.checkpoint(cancel, state, on_progress)?;

        self.enter(
            SyncPhase::ReviewsSync,
            task_id,
            REVIEWS_START_PERCENT,
            state,
            on_progress,
        );
        self.sync_reviews(scope, task_id, cancel, state, on_progress)
            .await?;

        self.enter(
            SyncPhase::Report,
            task_id,
            REVIEWS_END_PERCENT,
            state,
            on_progress,
        );
        Ok(())
    }

    fn enter(
        &self,
        phase: SyncPhase,
        task_id: &str,
        percentage: u64,
        state: &mut RunState,
        on_progress: Option<&ProgressCallback>,
    ) {
        state.phase = phase;
        tracing::debug!(phase = %phase, "Entering phase");
        self.tasks.update(
            task_id,
            object(json!({"current_stage": phase.as_str(), "percentage": percentage})),
        );
        emit(on_progress, SyncProgress::PhaseStarted { phase });
    }

    fn checkpoint(
        &self,
        cancel: &CancelFlag,
        state: &RunState,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            emit(on_progress, SyncProgress::Cancelled { phase: state.phase });
            return Err(SyncError::Cancelled { phase: state.phase });
        }
        Ok(())
    }

    async fn init(&self, scope: &SyncScope) -> Result<()> {
        if scope.project_id.trim().is_empty() {
            return Err(SyncError::fatal_setup("project id is empty"));
        }

        let token = self
            .tokens
            .bearer_token()
            .await
            .map_err(|e| SyncError::auth(e.to_string()))?;
        if token.trim().is_empty() {
            return Err(SyncError::auth("access token is empty"));
        }

        // A full resync recreates the schema, so it need not exist yet.
        if !scope.full_resync {
            db::schema_ready(self.writer.connection())
                .await
                .map_err(|e| SyncError::fatal_setup(format!("schema is not ready: {e}")))?;
        }
        Ok(())
    }

    #[cfg(feature = "migrate")]
    async fn reset_schema(&self) -> Result<()> {
        db::reset_schema(self.writer.connection())
            .await
            .map_err(|e| SyncError::fatal_setup(format!("schema reset failed: {e}")))?;
        // Cached workflows may describe rows that no longer exist.
        self.cache().clear();
        Ok(())
    }

    #[cfg(not(feature = "migrate"))]
    async fn reset_schema(&self) -> Result<()> {
        Err(SyncError::fatal_setup(
            "full resync requires the `migrate` feature",
        ))
    }

    // ─── Workflows ───────────────────────────────────────────────────────────

    #[tracing::instrument(skip_all)]
    async fn sync_workflows(
        &self,
        state: &mut RunState,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        let phase = SyncPhase::WorkflowsSync;
        let list = self
            .fetcher
            .fetch_all(ResourceKind::Workflows, &Filters::new(), on_progress)
            .await
            .map_err(|e| SyncError::source(phase, e))?;

        let deduped = dedup_latest(list.records);
        if deduped.duplicates > 0 {
            tracing::debug!(duplicates = deduped.duplicates, "Dropped duplicate workflows");
        }
        let counts = &mut state.stats.workflows;
        counts.total = deduped.records.len();
        counts.skipped += deduped.missing_id;

        let mut rows = Vec::with_capacity(deduped.records.len());
        let mut warm = Vec::with_capacity(deduped.records.len());
        for record in deduped.records {
            match workflow_model(&record, state.synced_at) {
                Ok(row) => {
                    warm.push((row.workflow_id.clone(), record));
                    rows.push(row);
                }
                Err(e) => {
                    let id = record_id(&record).unwrap_or_default();
                    state.stats.workflows.skipped += 1;
                    state.stats.push_error(phase, &id, e);
                }
            }
        }

        let written = self
            .writer
            .upsert_workflows(rows)
            .await
            .map_err(|e| SyncError::persistence(phase, e))?;
        add_counts(&mut state.stats.workflows, written);
        self.persisted(EntityKind::Workflows, written, on_progress);

        if self.cache().is_enabled() {
            let count = warm.len();
            for (workflow_id, record) in warm {
                self.cache().set(
                    WORKFLOW_CACHE_KIND,
                    &workflow_cache_params(&workflow_id),
                    record,
                );
            }
            emit(on_progress, SyncProgress::CacheWarmed { count });
        }
        Ok(())
    }

    // ─── Reviews ─────────────────────────────────────────────────────────────

    #[tracing::instrument(skip_all)]
    async fn sync_reviews(
        &self,
        scope: &SyncScope,
        task_id: &str,
        cancel: &CancelFlag,
        state: &mut RunState,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        let phase = SyncPhase::ReviewsSync;
        let list = self
            .fetcher
            .fetch_all(ResourceKind::Reviews, &scope.filters, on_progress)
            .await
            .map_err(|e| SyncError::source(phase, e))?;
        state.stats.reported_review_total = list.reported_total;

        let deduped = dedup_latest(list.records);
        state.stats.reviews.total = deduped.records.len();
        state.stats.reviews.skipped += deduped.missing_id;

        let total = deduped.records.len();
        let chunks: Vec<&[Value]> = deduped.records.chunks(self.config.batch_size).collect();
        let chunk_count = chunks.len();
        let mut processed = 0;

        for (idx, chunk) in chunks.into_iter().enumerate() {
            self.checkpoint(cancel, state, on_progress)?;

            let outcomes = self
                .fetcher
                .fetch_review_details(chunk.to_vec(), cancel, on_progress)
                .await;
            let skipped = outcomes
                .iter()
                .any(|o| matches!(o, DetailOutcome::Skipped { .. }));

            self.write_chunk(scope, outcomes, state, on_progress).await?;

            processed += chunk.len();
            emit(
                on_progress,
                SyncProgress::ChunkComplete {
                    chunk: idx + 1,
                    chunks: chunk_count,
                    processed,
                },
            );
            let span = REVIEWS_END_PERCENT - REVIEWS_START_PERCENT;
            let percentage = REVIEWS_START_PERCENT + (processed as u64 * span) / total.max(1) as u64;
            self.tasks.update(
                task_id,
                object(json!({
                    "percentage": percentage,
                    "processed_reviews": processed,
                    "total_reviews": total,
                })),
            );

            if skipped {
                return self.checkpoint(cancel, state, on_progress);
            }
        }

        Ok(())
    }

    /// Shape and write one chunk: reviews, then file versions, then progress.
    async fn write_chunk(
        &self,
        scope: &SyncScope,
        outcomes: Vec<DetailOutcome>,
        state: &mut RunState,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        let phase = SyncPhase::ReviewsSync;
        let mut reviews = Vec::new();
        let mut versions = Vec::new();
        let mut steps = Vec::new();

        for outcome in outcomes {
            let details = match outcome {
                DetailOutcome::Fetched(details) => details,
                DetailOutcome::Failed { review_id, error } => {
                    state.stats.reviews.skipped += 1;
                    state.stats.push_error(phase, &review_id, &error);
                    continue;
                }
                DetailOutcome::Skipped { .. } => {
                    state.stats.reviews.skipped += 1;
                    continue;
                }
            };

            let review = match review_model(&details.review, Some(&scope.project_id), state.synced_at)
            {
                Ok(review) => review,
                Err(e) => {
                    state.stats.reviews.skipped += 1;
                    state.stats.push_error(phase, &details.review_id, e);
                    continue;
                }
            };

            let template = self
                .resolve_steps(&details, review.workflow_id.as_deref(), state)
                .await?;
            self.check_references(&review, template.as_deref(), state, on_progress);
            let template = template.unwrap_or_default();

            let shaped_versions =
                file_version_models(&review.review_id, &details.versions, state.synced_at);
            let shaped_steps = progress_models(
                &review.review_id,
                &details.progress,
                &template,
                state.synced_at,
            );
            state.stats.file_versions.total += details.versions.len();
            state.stats.file_versions.skipped += shaped_versions.warnings.len();
            state.stats.progress_steps.total += shaped_steps.rows.len();
            state.stats.progress_steps.skipped += shaped_steps.warnings.len();
            for message in shaped_versions.warnings.into_iter().chain(shaped_steps.warnings) {
                let message = format!("review {}: {message}", review.review_id);
                tracing::warn!(%message, "Skipped detail record");
                emit(on_progress, SyncProgress::Warning { message });
            }

            versions.extend(shaped_versions.rows);
            steps.extend(shaped_steps.rows);
            reviews.push(review);
        }

        let written = self
            .writer
            .upsert_reviews(reviews)
            .await
            .map_err(|e| SyncError::persistence(phase, e))?;
        add_counts(&mut state.stats.reviews, written);
        self.persisted(EntityKind::Reviews, written, on_progress);

        let written = self
            .writer
            .upsert_file_versions(versions)
            .await
            .map_err(|e| SyncError::persistence(phase, e))?;
        add_counts(&mut state.stats.file_versions, written);
        self.persisted(EntityKind::FileVersions, written, on_progress);

        let written = self
            .writer
            .upsert_progress_steps(steps)
            .await
            .map_err(|e| SyncError::persistence(phase, e))?;
        add_counts(&mut state.stats.progress_steps, written);
        self.persisted(EntityKind::ProgressSteps, written, on_progress);

        Ok(())
    }

    /// Template steps of a review's workflow: from the fetched payload, the
    /// cache, or the store. `None` when the workflow is unknown everywhere.
    async fn resolve_steps(
        &self,
        details: &ReviewDetails,
        workflow_id: Option<&str>,
        state: &mut RunState,
    ) -> Result<Option<Vec<StepDescriptor>>> {
        if let Some(workflow) = &details.workflow {
            return Ok(Some(template_steps(workflow)));
        }
        let Some(workflow_id) = workflow_id else {
            return Ok(None);
        };

        if let Some(cached) = self
            .cache()
            .get(WORKFLOW_CACHE_KIND, &workflow_cache_params(workflow_id))
        {
            return Ok(Some(template_steps(&cached)));
        }
        if let Some(known) = state.stored_steps.get(workflow_id) {
            return Ok(known.clone());
        }

        let stored = self
            .writer
            .lookup_workflow(workflow_id)
            .await
            .map_err(|e| SyncError::persistence(SyncPhase::ReviewsSync, e))?
            .map(|row| serde_json::from_value::<Vec<StepDescriptor>>(row.steps).unwrap_or_default());
        state
            .stored_steps
            .insert(workflow_id.to_string(), stored.clone());
        Ok(stored)
    }

    /// Count dangling workflow and orphan step references. Both are written
    /// anyway.
    fn check_references(
        &self,
        review: &crate::entity::review::Model,
        template: Option<&[StepDescriptor]>,
        state: &mut RunState,
        on_progress: Option<&ProgressCallback>,
    ) {
        if let Some(workflow_id) = review.workflow_id.as_deref()
            && template.is_none()
        {
            state.stats.dangling_workflow_refs += 1;
            let message = format!(
                "review {}: workflow {workflow_id} not found in cache or store",
                review.review_id
            );
            tracing::warn!(%message, "Dangling workflow reference");
            emit(on_progress, SyncProgress::Warning { message });
        }

        if let Some(step_id) = review.current_step_id.as_deref() {
            let known = template.is_some_and(|steps| {
                steps.iter().any(|s| s.id.as_deref() == Some(step_id))
            });
            if !known {
                state.stats.orphan_step_refs += 1;
                tracing::debug!(
                    review_id = %review.review_id,
                    step_id,
                    "Current step not in workflow"
                );
            }
        }
    }

    fn persisted(
        &self,
        kind: EntityKind,
        written: UpsertCounts,
        on_progress: Option<&ProgressCallback>,
    ) {
        if written.total() == 0 {
            return;
        }
        emit(
            on_progress,
            SyncProgress::Persisted {
                entity: kind.as_str(),
                inserted: written.inserted,
                updated: written.updated,
            },
        );
    }
}
