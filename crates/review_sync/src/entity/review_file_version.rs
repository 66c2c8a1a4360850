//! ReviewFileVersion entity - approval state of one file version inside a review.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::approval_status::ApprovalStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "review_file_versions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    // ─── Composite Key ───────────────────────────────────────────────────────
    /// External id of the owning review.
    pub review_id: String,
    /// Version URN of the file under review.
    pub file_version_urn: String,

    // ─── File ────────────────────────────────────────────────────────────────
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub file_extension: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub file_path: Option<String>,
    pub version_number: Option<i32>,

    // ─── Approval ────────────────────────────────────────────────────────────
    pub approval_status: ApprovalStatus,
    /// Raw status id as reported by the source.
    pub approval_status_id: Option<String>,
    /// Raw status value as reported by the source.
    pub approval_status_value: Option<String>,
    pub approval_label: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub approval_comments: Option<String>,

    // ─── Payloads ────────────────────────────────────────────────────────────
    #[sea_orm(column_type = "Json")]
    pub review_content: serde_json::Value,
    #[sea_orm(column_type = "Json")]
    pub custom_attributes: serde_json::Value,
    pub copied_file_version_urn: Option<String>,

    pub synced_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
