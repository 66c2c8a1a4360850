//! Review entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::review_status::ReviewStatus;

/// A review instance running through a workflow.
///
/// `workflow_id` holds the owning workflow's external id. It is intentionally not a
/// foreign key: a workflow deleted upstream leaves a dangling reference that later
/// syncs resolve or report.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reviews")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    // ─── Source Identity ─────────────────────────────────────────────────────
    /// External review id (natural key).
    #[sea_orm(unique)]
    pub review_id: String,
    pub project_id: Option<String>,
    pub sequence_id: Option<i64>,

    // ─── Content ─────────────────────────────────────────────────────────────
    pub name: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub status: ReviewStatus,

    // ─── Workflow Position ───────────────────────────────────────────────────
    pub workflow_id: Option<String>,
    pub current_step_id: Option<String>,
    pub current_step_name: Option<String>,
    pub current_step_due_date: Option<DateTimeWithTimeZone>,

    // ─── Actors ──────────────────────────────────────────────────────────────
    #[sea_orm(column_type = "Json")]
    pub created_by: serde_json::Value,
    #[sea_orm(column_type = "Json")]
    pub assigned_to: serde_json::Value,
    #[sea_orm(column_type = "Json")]
    pub next_action_by: serde_json::Value,

    // ─── Archival ────────────────────────────────────────────────────────────
    #[sea_orm(default_value = false)]
    pub archived: bool,
    #[sea_orm(column_type = "Json")]
    pub archived_by: serde_json::Value,
    pub archived_at: Option<DateTimeWithTimeZone>,
    #[sea_orm(column_type = "Text", nullable)]
    pub archived_reason: Option<String>,

    // ─── Timestamps ──────────────────────────────────────────────────────────
    pub created_at: Option<DateTimeWithTimeZone>,
    pub updated_at: Option<DateTimeWithTimeZone>,
    pub started_at: Option<DateTimeWithTimeZone>,
    pub finished_at: Option<DateTimeWithTimeZone>,

    // ─── Tracking ────────────────────────────────────────────────────────────
    pub synced_at: DateTimeWithTimeZone,
    pub sync_status: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
