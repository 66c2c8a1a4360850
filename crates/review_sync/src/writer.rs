//! Transactional batch persistence for synced records.
//!
//! Every write call runs in one transaction: a failure anywhere rolls the
//! whole call back. Workflows, reviews and file versions use a native
//! `ON CONFLICT (natural key) DO UPDATE`; progress steps use the matching
//! rules in [`progress`](self::progress) because their uniqueness is partial.

mod bulk;
mod errors;
mod progress;
mod query;
mod types;

use sea_orm::{DatabaseConnection, TransactionTrait};
use tokio::time::Instant;

use crate::entity::{review, review_file_version, review_progress_step, workflow};
use crate::retry::{RetryConfig, with_retry};
use crate::sync::DEFAULT_BATCH_SIZE;

use bulk::Upsertable;

pub use errors::{Result, WriterError};
pub use query::{count, find_progress, find_review, find_workflow};
pub use types::{DbMetrics, DbMetricsSnapshot, EntityBatch, EntityKind, UpsertCounts};

/// Writes homogeneous batches with insert-or-update semantics.
///
/// Re-writing the same batch leaves the stored rows unchanged and reports
/// every row as updated.
pub struct BatchUpsertWriter {
    db: DatabaseConnection,
    batch_size: usize,
    retry: RetryConfig,
    metrics: DbMetrics,
}

impl std::fmt::Debug for BatchUpsertWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchUpsertWriter")
            .field("batch_size", &self.batch_size)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl BatchUpsertWriter {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryConfig::database(),
            metrics: DbMetrics::default(),
        }
    }

    /// Rows per insert statement. Zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn metrics(&self) -> DbMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Persist one batch, dispatching on its kind.
    pub async fn upsert_batch(&self, batch: EntityBatch) -> Result<UpsertCounts> {
        match batch {
            EntityBatch::Workflows(rows) => self.upsert_workflows(rows).await,
            EntityBatch::Reviews(rows) => self.upsert_reviews(rows).await,
            EntityBatch::FileVersions(rows) => self.upsert_file_versions(rows).await,
            EntityBatch::ProgressSteps(rows) => self.upsert_progress_steps(rows).await,
        }
    }

    pub async fn upsert_workflows(&self, rows: Vec<workflow::Model>) -> Result<UpsertCounts> {
        self.upsert_keyed(rows).await
    }

    pub async fn upsert_reviews(&self, rows: Vec<review::Model>) -> Result<UpsertCounts> {
        self.upsert_keyed(rows).await
    }

    pub async fn upsert_file_versions(
        &self,
        rows: Vec<review_file_version::Model>,
    ) -> Result<UpsertCounts> {
        self.upsert_keyed(rows).await
    }

    #[tracing::instrument(skip(self, rows), fields(count = rows.len()))]
    pub async fn upsert_progress_steps(
        &self,
        rows: Vec<review_progress_step::Model>,
    ) -> Result<UpsertCounts> {
        if rows.is_empty() {
            return Ok(UpsertCounts::default());
        }

        let started = Instant::now();
        let result = with_retry(
            || self.progress_once(rows.clone()),
            &self.retry,
            WriterError::is_transient,
            EntityKind::ProgressSteps.as_str(),
            None,
        )
        .await;
        self.finish(EntityKind::ProgressSteps.as_str(), started, &result);
        result
    }

    pub async fn lookup_workflow(&self, workflow_id: &str) -> Result<Option<workflow::Model>> {
        find_workflow(&self.db, workflow_id).await
    }

    pub async fn lookup_review(&self, review_id: &str) -> Result<Option<review::Model>> {
        find_review(&self.db, review_id).await
    }

    pub async fn count(&self, kind: EntityKind) -> Result<u64> {
        count(&self.db, kind).await
    }

    async fn upsert_keyed<M: Upsertable>(&self, rows: Vec<M>) -> Result<UpsertCounts> {
        if rows.is_empty() {
            return Ok(UpsertCounts::default());
        }

        let rows = bulk::dedup_by_key(rows);
        tracing::debug!(entity = M::NAME, count = rows.len(), "Starting batch upsert");

        let started = Instant::now();
        let result = with_retry(
            || self.keyed_once(rows.clone()),
            &self.retry,
            WriterError::is_transient,
            M::NAME,
            None,
        )
        .await;
        self.finish(M::NAME, started, &result);
        result
    }

    async fn keyed_once<M: Upsertable>(&self, rows: Vec<M>) -> Result<UpsertCounts> {
        let txn = self.db.begin().await?;
        let mut counts = UpsertCounts::default();
        for chunk in rows.chunks(self.batch_size) {
            counts += bulk::upsert_chunk(&txn, chunk.to_vec()).await?;
        }
        txn.commit().await?;
        Ok(counts)
    }

    async fn progress_once(
        &self,
        rows: Vec<review_progress_step::Model>,
    ) -> Result<UpsertCounts> {
        let txn = self.db.begin().await?;
        let counts = progress::upsert_progress(&txn, rows).await?;
        txn.commit().await?;
        Ok(counts)
    }

    fn finish(&self, entity: &str, started: Instant, result: &Result<UpsertCounts>) {
        self.metrics.record(started.elapsed(), result.is_ok());
        match result {
            Ok(counts) => tracing::debug!(
                entity,
                inserted = counts.inserted,
                updated = counts.updated,
                "Batch upsert committed"
            ),
            Err(e) => tracing::warn!(entity, error = %e, "Batch upsert rolled back"),
        }
    }
}
