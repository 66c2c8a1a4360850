//! Final statistics of a sync run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::CacheStats;
use crate::circuit_breaker::BreakerSnapshot;
use crate::fetcher::ApiMetricsSnapshot;
use crate::writer::DbMetricsSnapshot;

use super::types::{ERROR_SAMPLE_SIZE, SyncPhase, SyncScope, SyncStats};

/// API share of wall time above which the source is flagged.
const API_SHARE_THRESHOLD: f64 = 0.7;
/// Cache hit rate below which an enabled cache is flagged.
const CACHE_HIT_THRESHOLD: f64 = 0.3;
/// Store share of wall time above which the database is flagged.
const DB_SHARE_THRESHOLD: f64 = 0.5;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Failed => "failed",
            RunOutcome::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckKind {
    Api,
    Cache,
    Database,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A stage that dominated the run, with a tuning hint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bottleneck {
    #[serde(rename = "type")]
    pub kind: BottleneckKind,
    pub severity: Severity,
    pub message: String,
    pub suggestion: &'static str,
}

/// Derived throughput figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Performance {
    pub items_per_second: f64,
    /// 0.0..=1.0
    pub cache_hit_rate: f64,
    /// 0.0..=1.0
    pub api_success_rate: f64,
    /// Summed API and store time over wall time; above 1.0 means the
    /// concurrent run beat a serial one.
    pub estimated_speedup: f64,
}

/// Collected component counters at the end of a run.
#[derive(Debug, Clone, Default)]
pub struct RunMetrics {
    pub api: ApiMetricsSnapshot,
    pub db: DbMetricsSnapshot,
    pub cache: Option<CacheStats>,
    pub breakers: Vec<BreakerSnapshot>,
}

/// Everything known about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub task_id: String,
    pub project_id: String,
    pub full_resync: bool,
    pub outcome: RunOutcome,
    /// Phase the run ended in; the failing phase for failed runs.
    pub last_phase: SyncPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Counters; `stats.errors` holds only the first errors.
    pub stats: SyncStats,
    pub errors_total: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(rename = "duration_secs", serialize_with = "seconds_f64")]
    pub duration: Duration,
    pub performance: Performance,
    /// The source reported zero reviews.
    pub source_empty: bool,
    pub api: ApiMetricsSnapshot,
    pub db: DbMetricsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
    pub circuit_breakers: Vec<BreakerSnapshot>,
    pub bottlenecks: Vec<Bottleneck>,
}

fn seconds_f64<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

fn share(part: Duration, wall: Duration) -> f64 {
    if wall.is_zero() {
        0.0
    } else {
        part.as_secs_f64() / wall.as_secs_f64()
    }
}

/// Flag stages that dominated the wall time, and a cold cache.
pub fn identify_bottlenecks(metrics: &RunMetrics, wall: Duration) -> Vec<Bottleneck> {
    let mut found = Vec::new();

    let api_share = share(metrics.api.busy_time, wall);
    if api_share > API_SHARE_THRESHOLD {
        found.push(Bottleneck {
            kind: BottleneckKind::Api,
            severity: Severity::High,
            message: format!("API calls consume {:.1}% of total time", api_share * 100.0),
            suggestion: "Consider increasing concurrency or using more caching",
        });
    }

    if let Some(cache) = &metrics.cache
        && cache.enabled
    {
        let hit_rate = cache.hit_rate();
        if hit_rate < CACHE_HIT_THRESHOLD {
            found.push(Bottleneck {
                kind: BottleneckKind::Cache,
                severity: Severity::Medium,
                message: format!("Cache hit rate is only {:.1}%", hit_rate * 100.0),
                suggestion: "Consider increasing cache TTL or warming up cache",
            });
        }
    }

    let db_share = share(metrics.db.busy_time, wall);
    if db_share > DB_SHARE_THRESHOLD {
        found.push(Bottleneck {
            kind: BottleneckKind::Database,
            severity: Severity::High,
            message: format!(
                "Database operations consume {:.1}% of total time",
                db_share * 100.0
            ),
            suggestion: "Consider increasing batch size or optimizing SQL",
        });
    }

    found
}

impl SyncReport {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: &str,
        scope: &SyncScope,
        outcome: RunOutcome,
        last_phase: SyncPhase,
        error: Option<String>,
        mut stats: SyncStats,
        started_at: DateTime<Utc>,
        wall: Duration,
        metrics: RunMetrics,
    ) -> Self {
        let errors_total = stats.errors.len();
        stats.errors.truncate(ERROR_SAMPLE_SIZE);

        let serial = metrics.api.busy_time + metrics.db.busy_time;
        let performance = Performance {
            items_per_second: if wall.is_zero() {
                0.0
            } else {
                stats.items_written() as f64 / wall.as_secs_f64()
            },
            cache_hit_rate: metrics.cache.map(|c| c.hit_rate()).unwrap_or_default(),
            api_success_rate: metrics.api.success_rate(),
            estimated_speedup: share(serial, wall),
        };
        let bottlenecks = identify_bottlenecks(&metrics, wall);
        let finished_at = started_at
            + chrono::Duration::from_std(wall).unwrap_or_else(|_| chrono::Duration::zero());

        Self {
            task_id: task_id.to_string(),
            project_id: scope.project_id.clone(),
            full_resync: scope.full_resync,
            outcome,
            last_phase,
            error,
            source_empty: stats.reported_review_total == Some(0),
            stats,
            errors_total,
            started_at,
            finished_at,
            duration: wall,
            performance,
            api: metrics.api,
            db: metrics.db,
            cache: metrics.cache,
            circuit_breakers: metrics.breakers,
            bottlenecks,
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}
