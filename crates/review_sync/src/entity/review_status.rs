//! Review status enum.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum ReviewStatus {
    #[sea_orm(string_value = "OPEN")]
    #[default]
    Open,
    #[sea_orm(string_value = "CLOSED")]
    Closed,
    #[sea_orm(string_value = "VOID")]
    Void,
    #[sea_orm(string_value = "FAILED")]
    Failed,
    #[sea_orm(string_value = "DRAFT")]
    Draft,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

impl ReviewStatus {
    /// Map a source status string, defaulting to [`ReviewStatus::Open`].
    pub fn from_source(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "closed" => Self::Closed,
            "void" => Self::Void,
            "failed" => Self::Failed,
            "draft" => Self::Draft,
            "cancelled" => Self::Cancelled,
            _ => Self::Open,
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReviewStatus::Open => "OPEN",
            ReviewStatus::Closed => "CLOSED",
            ReviewStatus::Void => "VOID",
            ReviewStatus::Failed => "FAILED",
            ReviewStatus::Draft => "DRAFT",
            ReviewStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}
