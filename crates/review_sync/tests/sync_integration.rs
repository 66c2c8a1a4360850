//! End-to-end sync runs against an in-memory SQLite store.
//!
//! The remote side is an in-process [`PagedSource`] so paging, detail fan-out
//! and failure injection are deterministic. Every run is wrapped in a timeout
//! so a hang shows up as a failure instead of a stuck test.

#![cfg(all(feature = "sqlite", feature = "migrate"))]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use review_sync::source::{Filters, Page, StaticTokenProvider};
use review_sync::sync::{RunOutcome, SyncReport};
use review_sync::tasks::TaskManagerConfig;
use review_sync::{
    EntityKind, PagedSource, ResourceKind, SourceError, SyncConfig, SyncOrchestrator, SyncPhase,
    SyncScope, TaskLifecycleManager, TaskState, connect, connect_and_migrate,
};

/// If exceeded, there's likely a hang/deadlock.
const SYNC_TIMEOUT: Duration = Duration::from_secs(20);

const WORKFLOWS: usize = 3;
const REVIEWS: usize = 120;

// ─── Fake Source ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeSource {
    workflows: Vec<Value>,
    reviews: Vec<Value>,
    /// Review ids whose workflow lookup fails with a 404.
    missing_workflows: Vec<String>,
    detail_delay: Duration,
    calls: Mutex<HashMap<ResourceKind, usize>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

fn workflow(n: usize) -> Value {
    json!({
        "id": format!("wf-{n}"),
        "name": format!("Workflow {n}"),
        "status": "ACTIVE",
        "steps": [
            {"id": format!("wf-{n}-s1"), "name": "Review", "type": "REVIEWER"},
            {"id": format!("wf-{n}-s2"), "name": "Approve", "type": "APPROVER"},
            {"id": format!("wf-{n}-s3"), "name": "Final", "type": "FINAL"}
        ],
        "updatedAt": "2025-10-01T00:00:00Z"
    })
}

fn review(n: usize) -> Value {
    let wf = n % WORKFLOWS;
    json!({
        "id": format!("r-{n}"),
        "sequenceId": n,
        "name": format!("Review {n}"),
        "status": "OPEN",
        "workflowId": format!("wf-{wf}"),
        "currentStepId": format!("wf-{wf}-s2"),
        "updatedAt": "2025-10-02T00:00:00Z"
    })
}

impl FakeSource {
    fn standard() -> Self {
        Self {
            workflows: (0..WORKFLOWS).map(workflow).collect(),
            reviews: (0..REVIEWS).map(review).collect(),
            detail_delay: Duration::from_millis(2),
            ..Self::default()
        }
    }

    fn calls_to(&self, resource: ResourceKind) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&resource)
            .copied()
            .unwrap_or(0)
    }

    fn workflow_for(&self, review_id: &str) -> Option<Value> {
        let review = self
            .reviews
            .iter()
            .find(|r| r["id"].as_str() == Some(review_id))?;
        let id = review["workflowId"].as_str()?;
        self.workflows
            .iter()
            .find(|w| w["id"].as_str() == Some(id))
            .cloned()
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
    ) -> Result<Page, SourceError> {
        *self.calls.lock().unwrap().entry(resource).or_default() += 1;
        let all = match resource {
            ResourceKind::Workflows => &self.workflows,
            ResourceKind::Reviews => &self.reviews,
            other => return Err(SourceError::permanent(None, format!("{other} is not paged"))),
        };
        Ok(Page {
            records: all.iter().skip(offset).take(limit).cloned().collect(),
            total_count: Some(all.len()),
        })
    }

    async fn fetch_detail(&self, resource: ResourceKind, id: &str) -> Result<Value, SourceError> {
        *self.calls.lock().unwrap().entry(resource).or_default() += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.detail_delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match resource {
            ResourceKind::ReviewVersions => Ok(json!({"results": [
                {"urn": format!("urn:{id}:v1"), "name": "plan.pdf", "versionNumber": 1,
                 "approveStatus": {"id": "a1", "value": "APPROVED", "label": "Approved"}}
            ]})),
            ResourceKind::ReviewProgress => Ok(json!({"results": [
                {"stepId": format!("{id}-x1"), "stepOrder": 1, "status": "completed",
                 "completedAt": "2025-10-01T10:00:00Z"}
            ]})),
            ResourceKind::ReviewWorkflow => {
                if self.missing_workflows.iter().any(|m| m == id) {
                    return Err(SourceError::permanent(Some(404), "workflow not found"));
                }
                match self.workflow_for(id) {
                    Some(wf) => Ok(json!({"results": [wf]})),
                    None => Err(SourceError::permanent(Some(404), "workflow not found")),
                }
            }
            other => Err(SourceError::permanent(None, format!("{other} has no detail"))),
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn config() -> SyncConfig {
    SyncConfig {
        max_concurrent: 10,
        page_size: 50,
        batch_size: 50,
        enable_cache: true,
        max_retries: 0,
        ..SyncConfig::testing()
    }
}

async fn orchestrator(
    source: Arc<FakeSource>,
    db: sea_orm::DatabaseConnection,
    config: SyncConfig,
) -> Arc<SyncOrchestrator> {
    Arc::new(SyncOrchestrator::new(
        source,
        Arc::new(StaticTokenProvider::new("token")),
        db,
        config,
    ))
}

async fn migrated() -> sea_orm::DatabaseConnection {
    connect_and_migrate("sqlite::memory:")
        .await
        .expect("Failed to create test database")
}

async fn run(orchestrator: &SyncOrchestrator, scope: &SyncScope, task_id: &str) -> SyncReport {
    tokio::time::timeout(SYNC_TIMEOUT, orchestrator.run(scope, task_id, None))
        .await
        .expect("Sync timed out - possible hang")
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_sync_writes_every_entity() {
    let source = Arc::new(FakeSource::standard());
    let orchestrator = orchestrator(Arc::clone(&source), migrated().await, config()).await;

    let report = run(&orchestrator, &SyncScope::project("p-1"), "task-1").await;

    assert_eq!(report.outcome, RunOutcome::Completed, "{:?}", report.error);
    assert_eq!(report.last_phase, SyncPhase::Done);
    let stats = &report.stats;
    assert_eq!(stats.workflows.inserted, WORKFLOWS);
    assert_eq!(stats.reviews.inserted, REVIEWS);
    assert_eq!(stats.file_versions.inserted, REVIEWS);
    // One executed step plus the pending current step per review.
    assert_eq!(stats.progress_steps.inserted, REVIEWS * 2);
    assert_eq!(stats.reported_review_total, Some(REVIEWS));
    assert_eq!(stats.dangling_workflow_refs, 0);
    assert_eq!(stats.orphan_step_refs, 0);
    assert!(stats.errors.is_empty());
    assert!(!report.source_empty);

    // 120 reviews over pages of 50: three calls, the last one short.
    assert_eq!(source.calls_to(ResourceKind::Reviews), 3);
    // Workflows were warmed into the cache, so no review fetched its own.
    assert_eq!(source.calls_to(ResourceKind::ReviewWorkflow), 0);

    let peak = source.peak.load(Ordering::SeqCst);
    assert!(peak <= 10, "peak concurrency {peak} exceeded the limit");
    assert!(peak >= 2, "details were fetched serially");

    let writer = orchestrator.writer();
    assert_eq!(writer.count(EntityKind::Reviews).await.unwrap(), REVIEWS as u64);
    assert_eq!(writer.count(EntityKind::Workflows).await.unwrap(), WORKFLOWS as u64);
    let stored = writer.lookup_review("r-7").await.unwrap().expect("stored");
    assert_eq!(stored.project_id.as_deref(), Some("p-1"));
    assert_eq!(stored.workflow_id.as_deref(), Some("wf-1"));

    let status = orchestrator.get_status("task-1");
    assert_eq!(status.status, TaskState::Completed);
    assert!(orchestrator.get_report("task-1").is_some());
}

#[tokio::test]
async fn test_second_run_only_updates() {
    let source = Arc::new(FakeSource::standard());
    let orchestrator = orchestrator(Arc::clone(&source), migrated().await, config()).await;
    let scope = SyncScope::project("p-1");

    let first = run(&orchestrator, &scope, "first").await;
    assert!(first.is_success());

    let second = run(&orchestrator, &scope, "second").await;
    assert!(second.is_success(), "{:?}", second.error);
    let stats = &second.stats;
    assert_eq!(stats.workflows.inserted, 0);
    assert_eq!(stats.workflows.updated, WORKFLOWS);
    assert_eq!(stats.reviews.inserted, 0);
    assert_eq!(stats.reviews.updated, REVIEWS);
    assert_eq!(stats.file_versions.inserted, 0);
    assert_eq!(stats.progress_steps.inserted, 0);
    assert_eq!(stats.progress_steps.updated, REVIEWS * 2);

    let writer = orchestrator.writer();
    assert_eq!(
        writer.count(EntityKind::ProgressSteps).await.unwrap(),
        (REVIEWS * 2) as u64
    );

    // Each report covers its own run only.
    assert_eq!(second.api.calls, first.api.calls);
    assert_eq!(second.db.batches, first.db.batches);
    let (first_cache, second_cache) = (first.cache.unwrap(), second.cache.unwrap());
    assert_eq!(second_cache.hits, first_cache.hits);
    assert_eq!(second_cache.misses, first_cache.misses);
}

#[tokio::test]
async fn test_expired_task_drops_its_report() {
    let source = Arc::new(FakeSource::standard());
    let base = orchestrator(source, migrated().await, config()).await;
    assert!(base.tasks().is_running());

    let tasks = Arc::new(TaskLifecycleManager::new(TaskManagerConfig {
        cleanup_interval: Duration::from_millis(20),
        running_ttl: Duration::from_secs(60),
        terminal_ttl: Duration::from_millis(50),
    }));
    let orchestrator = SyncOrchestrator::from_parts(
        Arc::clone(base.fetcher()),
        Arc::clone(base.writer()),
        Arc::clone(&tasks),
        Arc::new(StaticTokenProvider::new("token")),
        config(),
    );
    assert!(tasks.is_running());

    let report = run(&orchestrator, &SyncScope::project("p-1"), "short-lived").await;
    assert!(report.is_success(), "{:?}", report.error);
    assert!(orchestrator.get_report("short-lived").is_some());

    tokio::time::timeout(Duration::from_secs(5), async {
        while orchestrator.get_status("short-lived").exists
            || orchestrator.get_report("short-lived").is_some()
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("expired task was never swept");
    assert_eq!(tasks.stats().total, 0);
}

#[tokio::test]
async fn test_dangling_workflow_is_counted_and_review_still_written() {
    let mut source = FakeSource::standard();
    source.reviews = vec![
        json!({"id": "r-ok", "workflowId": "wf-0", "currentStepId": "wf-0-s1"}),
        json!({"id": "r-dangling", "workflowId": "wf-gone", "currentStepId": "ghost"}),
        json!({"id": "r-orphan", "workflowId": "wf-2", "currentStepId": "not-a-step"}),
    ];
    source.missing_workflows = vec!["r-dangling".to_string()];
    let source = Arc::new(source);
    let orchestrator = orchestrator(Arc::clone(&source), migrated().await, config()).await;

    let report = run(&orchestrator, &SyncScope::project("p-1"), "task").await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.stats.reviews.inserted, 3);
    assert_eq!(report.stats.dangling_workflow_refs, 1);
    // The dangling review's current step is unresolvable too.
    assert_eq!(report.stats.orphan_step_refs, 2);
    // Only the dangling review missed the cache.
    assert_eq!(source.calls_to(ResourceKind::ReviewWorkflow), 1);

    let stored = orchestrator
        .writer()
        .lookup_review("r-dangling")
        .await
        .unwrap()
        .expect("dangling review is stored");
    assert_eq!(stored.workflow_id.as_deref(), Some("wf-gone"));

    // Without a template, only the executed step is written.
    let steps = review_sync::writer::find_progress(orchestrator.writer().connection(), "r-dangling")
        .await
        .unwrap();
    assert_eq!(steps.len(), 1);
    assert!(steps[0].template_step_id.is_none());
}

#[tokio::test]
async fn test_empty_source_completes_and_flags_empty() {
    let source = Arc::new(FakeSource {
        workflows: (0..WORKFLOWS).map(workflow).collect(),
        ..FakeSource::default()
    });
    let orchestrator = orchestrator(source, migrated().await, config()).await;

    let report = run(&orchestrator, &SyncScope::project("p-1"), "task").await;

    assert!(report.is_success());
    assert!(report.source_empty);
    assert_eq!(report.stats.reviews.total, 0);
    assert_eq!(report.stats.workflows.inserted, WORKFLOWS);
}

#[tokio::test]
async fn test_missing_schema_is_fatal_setup() {
    let db = connect("sqlite::memory:").await.unwrap();
    let source = Arc::new(FakeSource::standard());
    let orchestrator = orchestrator(Arc::clone(&source), db, config()).await;

    let report = run(&orchestrator, &SyncScope::project("p-1"), "task").await;

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.last_phase, SyncPhase::Init);
    assert!(report.error.as_deref().unwrap().starts_with("Setup failed"));
    assert_eq!(source.calls_to(ResourceKind::Workflows), 0);
    assert_eq!(orchestrator.get_status("task").status, TaskState::Failed);
}

#[tokio::test]
async fn test_full_resync_creates_schema() {
    let db = connect("sqlite::memory:").await.unwrap();
    let orchestrator = orchestrator(Arc::new(FakeSource::standard()), db, config()).await;

    let report = run(&orchestrator, &SyncScope::project("p-1").full(), "task").await;

    assert!(report.is_success(), "{:?}", report.error);
    assert!(report.full_resync);
    assert_eq!(report.stats.reviews.inserted, REVIEWS);
}

#[tokio::test]
async fn test_empty_token_fails_with_auth_error() {
    let orchestrator = Arc::new(SyncOrchestrator::new(
        Arc::new(FakeSource::standard()),
        Arc::new(StaticTokenProvider::new("  ")),
        migrated().await,
        config(),
    ));

    let report = run(&orchestrator, &SyncScope::project("p-1"), "task").await;

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert!(
        report
            .error
            .as_deref()
            .unwrap()
            .starts_with("Authentication failed")
    );
}

#[tokio::test]
async fn test_background_run_can_be_cancelled() {
    let source = Arc::new(FakeSource::standard());
    let orchestrator = orchestrator(source, migrated().await, config()).await;

    let task_id = orchestrator.start_sync(SyncScope::project("p-1"));
    // The spawned run has not been polled yet, so it sees the flag at its
    // first checkpoint.
    assert!(orchestrator.cancel(&task_id));
    assert!(!orchestrator.cancel("unknown-task"));

    let report = tokio::time::timeout(SYNC_TIMEOUT, async {
        loop {
            if let Some(report) = orchestrator.get_report(&task_id) {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("background run never finished");

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.last_phase, SyncPhase::Init);
    assert_eq!(
        report.error.as_deref(),
        Some("Sync cancelled during init")
    );
    assert_eq!(report.stats.items_written(), 0);

    let status = orchestrator.get_status(&task_id);
    assert_eq!(status.status, TaskState::Failed);
    assert_eq!(
        status.field("error").and_then(Value::as_str),
        Some("Sync cancelled during init")
    );
}

#[tokio::test]
async fn test_failed_details_skip_only_their_review() {
    struct FlakyProgress(FakeSource);

    #[async_trait]
    impl PagedSource for FlakyProgress {
        async fn fetch_page(
            &self,
            resource: ResourceKind,
            offset: usize,
            limit: usize,
            filters: &Filters,
        ) -> Result<Page, SourceError> {
            self.0.fetch_page(resource, offset, limit, filters).await
        }

        async fn fetch_detail(
            &self,
            resource: ResourceKind,
            id: &str,
        ) -> Result<Value, SourceError> {
            if resource == ResourceKind::ReviewProgress && id == "r-5" {
                return Err(SourceError::permanent(Some(500), "progress exploded"));
            }
            self.0.fetch_detail(resource, id).await
        }
    }

    let source = Arc::new(FlakyProgress(FakeSource::standard()));
    let orchestrator = Arc::new(SyncOrchestrator::new(
        source,
        Arc::new(StaticTokenProvider::new("token")),
        migrated().await,
        config(),
    ));

    let report = run(&orchestrator, &SyncScope::project("p-1"), "task").await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.stats.reviews.inserted, REVIEWS - 1);
    assert_eq!(report.stats.reviews.skipped, 1);
    assert_eq!(report.errors_total, 1);
    assert!(report.stats.errors[0].contains("r-5"));
    assert!(
        orchestrator
            .writer()
            .lookup_review("r-5")
            .await
            .unwrap()
            .is_none()
    );
}
