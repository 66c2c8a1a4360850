use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::entity::{review, review_file_version, review_progress_step, workflow};

/// Inserted/updated counts of one batch write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertCounts {
    #[inline]
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

impl std::ops::AddAssign for UpsertCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.updated += rhs.updated;
    }
}

/// Entity kinds the writer persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Workflows,
    Reviews,
    FileVersions,
    ProgressSteps,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Workflows => "workflows",
            EntityKind::Reviews => "reviews",
            EntityKind::FileVersions => "file_versions",
            EntityKind::ProgressSteps => "progress_steps",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A homogeneous batch of records for [`super::BatchUpsertWriter::upsert_batch`].
#[derive(Debug, Clone)]
pub enum EntityBatch {
    Workflows(Vec<workflow::Model>),
    Reviews(Vec<review::Model>),
    FileVersions(Vec<review_file_version::Model>),
    ProgressSteps(Vec<review_progress_step::Model>),
}

impl EntityBatch {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityBatch::Workflows(_) => EntityKind::Workflows,
            EntityBatch::Reviews(_) => EntityKind::Reviews,
            EntityBatch::FileVersions(_) => EntityKind::FileVersions,
            EntityBatch::ProgressSteps(_) => EntityKind::ProgressSteps,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EntityBatch::Workflows(rows) => rows.len(),
            EntityBatch::Reviews(rows) => rows.len(),
            EntityBatch::FileVersions(rows) => rows.len(),
            EntityBatch::ProgressSteps(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Store-side counters, read by the sync report.
#[derive(Debug, Default)]
pub struct DbMetrics {
    batches: AtomicU64,
    errors: AtomicU64,
    busy_micros: AtomicU64,
}

/// Point-in-time copy of [`DbMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DbMetricsSnapshot {
    pub batches: u64,
    pub errors: u64,
    #[serde(serialize_with = "seconds_f64")]
    pub busy_time: Duration,
}

impl DbMetricsSnapshot {
    /// Counters accumulated since `start` was taken.
    pub fn since(&self, start: &Self) -> Self {
        Self {
            batches: self.batches.saturating_sub(start.batches),
            errors: self.errors.saturating_sub(start.errors),
            busy_time: self.busy_time.saturating_sub(start.busy_time),
        }
    }
}

fn seconds_f64<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl DbMetrics {
    pub(crate) fn record(&self, elapsed: Duration, ok: bool) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.busy_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DbMetricsSnapshot {
        DbMetricsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            busy_time: Duration::from_micros(self.busy_micros.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate() {
        let mut counts = UpsertCounts::default();
        counts += UpsertCounts {
            inserted: 2,
            updated: 1,
        };
        counts += UpsertCounts {
            inserted: 0,
            updated: 4,
        };
        assert_eq!(counts.total(), 7);
    }

    #[test]
    fn metrics_track_failures() {
        let metrics = DbMetrics::default();
        metrics.record(Duration::from_millis(5), true);
        metrics.record(Duration::from_millis(7), false);
        let snap = metrics.snapshot();
        assert_eq!(snap.batches, 2);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.busy_time, Duration::from_millis(12));
    }

    #[test]
    fn batch_reports_kind_and_len() {
        let batch = EntityBatch::Reviews(Vec::new());
        assert_eq!(batch.kind(), EntityKind::Reviews);
        assert!(batch.is_empty());
    }
}
