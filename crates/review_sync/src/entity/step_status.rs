//! Progress step status, including the two terminal states.

use sea_orm::Iterable;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Status of one executed (or pending) review step.
///
/// `SentBack` and `Completed` are terminal: rows in those states are history and
/// are excluded from the `(review_id, step_id)` uniqueness predicate.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum StepStatus {
    #[sea_orm(string_value = "PENDING")]
    #[default]
    Pending,
    #[sea_orm(string_value = "CLAIMED")]
    Claimed,
    /// Source value `in_progress`.
    #[sea_orm(string_value = "OPEN")]
    Open,
    #[sea_orm(string_value = "SUBMITTED")]
    Submitted,
    #[sea_orm(string_value = "APPROVED")]
    Approved,
    #[sea_orm(string_value = "REJECTED")]
    Rejected,
    #[sea_orm(string_value = "SKIPPED")]
    Skipped,
    #[sea_orm(string_value = "SENT_BACK")]
    SentBack,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
}

/// Stored values of the terminal statuses, as used by the partial unique index.
pub const TERMINAL_STEP_STATUSES: [&str; 2] = ["SENT_BACK", "COMPLETED"];

impl StepStatus {
    /// Map a source status string. Unknown values fall back to [`StepStatus::Pending`].
    pub fn from_source(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "claimed" => Self::Claimed,
            "in_progress" | "open" => Self::Open,
            "submitted" => Self::Submitted,
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "skipped" => Self::Skipped,
            "sent_back" | "returned" => Self::SentBack,
            "completed" => Self::Completed,
            _ => Self::Pending,
        }
    }

    /// Whether rows in this status are history rather than the active step.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::SentBack | Self::Completed)
    }

    /// All statuses that count as active for the uniqueness predicate.
    pub fn active() -> Vec<StepStatus> {
        Self::iter().filter(|s| !s.is_terminal()).collect()
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Claimed => "CLAIMED",
            StepStatus::Open => "OPEN",
            StepStatus::Submitted => "SUBMITTED",
            StepStatus::Approved => "APPROVED",
            StepStatus::Rejected => "REJECTED",
            StepStatus::Skipped => "SKIPPED",
            StepStatus::SentBack => "SENT_BACK",
            StepStatus::Completed => "COMPLETED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_progress_maps_to_open() {
        assert_eq!(StepStatus::from_source("in_progress"), StepStatus::Open);
    }

    #[test]
    fn terminal_statuses_match_index_predicate() {
        let terminal: Vec<String> = StepStatus::iter()
            .filter(|s| s.is_terminal())
            .map(|s| s.to_string())
            .collect();
        assert_eq!(terminal, TERMINAL_STEP_STATUSES.to_vec());
    }

    #[test]
    fn active_excludes_terminal_statuses() {
        let active = StepStatus::active();
        assert!(!active.contains(&StepStatus::Completed));
        assert!(!active.contains(&StepStatus::SentBack));
        assert_eq!(active.len(), 7);
    }

    #[test]
    fn unknown_status_defaults_to_pending() {
        assert_eq!(StepStatus::from_source("waiting"), StepStatus::Pending);
    }
}
