//! Approval status of a file version within a review.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Normalized approval status.
///
/// The raw id/value/label triple from the source is stored alongside this
/// value so nothing is lost by the normalization.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum ApprovalStatus {
    #[sea_orm(string_value = "PENDING")]
    #[default]
    Pending,
    #[sea_orm(string_value = "APPROVED")]
    Approved,
    #[sea_orm(string_value = "REJECTED")]
    Rejected,
    #[sea_orm(string_value = "IN_REVIEW")]
    InReview,
}

impl ApprovalStatus {
    /// Map a source status value, defaulting to [`ApprovalStatus::Pending`].
    pub fn from_source(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "in_review" => Self::InReview,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalStatus::Pending => write!(f, "PENDING"),
            ApprovalStatus::Approved => write!(f, "APPROVED"),
            ApprovalStatus::Rejected => write!(f, "REJECTED"),
            ApprovalStatus::InReview => write!(f, "IN_REVIEW"),
        }
    }
}
