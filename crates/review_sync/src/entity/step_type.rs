//! Workflow step role.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum StepType {
    #[sea_orm(string_value = "REVIEWER")]
    #[default]
    Reviewer,
    #[sea_orm(string_value = "APPROVER")]
    Approver,
    #[sea_orm(string_value = "INITIATOR")]
    Initiator,
    #[sea_orm(string_value = "FINAL")]
    Final,
}

impl StepType {
    pub fn from_source(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "approver" => Self::Approver,
            "initiator" => Self::Initiator,
            "final" => Self::Final,
            _ => Self::Reviewer,
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepType::Reviewer => write!(f, "REVIEWER"),
            StepType::Approver => write!(f, "APPROVER"),
            StepType::Initiator => write!(f, "INITIATOR"),
            StepType::Final => write!(f, "FINAL"),
        }
    }
}
