//! Lifecycle status of a workflow template.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Workflow status (normalized from the source's lowercase values).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum WorkflowStatus {
    #[sea_orm(string_value = "ACTIVE")]
    #[default]
    Active,
    #[sea_orm(string_value = "INACTIVE")]
    Inactive,
    #[sea_orm(string_value = "DRAFT")]
    Draft,
    #[sea_orm(string_value = "ARCHIVED")]
    Archived,
}

impl WorkflowStatus {
    /// Map a source status string. Unknown values fall back to [`WorkflowStatus::Active`].
    pub fn from_source(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "inactive" => Self::Inactive,
            "draft" => Self::Draft,
            "archived" => Self::Archived,
            _ => Self::Active,
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Active => write!(f, "ACTIVE"),
            WorkflowStatus::Inactive => write!(f, "INACTIVE"),
            WorkflowStatus::Draft => write!(f, "DRAFT"),
            WorkflowStatus::Archived => write!(f, "ARCHIVED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_source_is_case_insensitive() {
        assert_eq!(WorkflowStatus::from_source("Draft"), WorkflowStatus::Draft);
        assert_eq!(WorkflowStatus::from_source("ARCHIVED"), WorkflowStatus::Archived);
        assert_eq!(WorkflowStatus::from_source("inactive"), WorkflowStatus::Inactive);
    }

    #[test]
    fn unknown_status_defaults_to_active() {
        assert_eq!(WorkflowStatus::from_source("paused"), WorkflowStatus::Active);
        assert_eq!(WorkflowStatus::from_source(""), WorkflowStatus::Active);
    }
}
