//! Workflow entity - review workflow templates keyed by their external id.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::workflow_status::WorkflowStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "review_workflows")]
pub struct Model {
    /// Internal UUID primary key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    // ─── Source Identity ─────────────────────────────────────────────────────
    /// External workflow id (natural key).
    #[sea_orm(unique)]
    pub workflow_id: String,
    /// Project the workflow belongs to.
    pub project_id: Option<String>,

    // ─── Content ─────────────────────────────────────────────────────────────
    pub name: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub status: WorkflowStatus,
    /// Ordered step descriptors (JSON array).
    #[sea_orm(column_type = "Json")]
    pub steps: serde_json::Value,
    #[sea_orm(column_type = "Json")]
    pub created_by: serde_json::Value,

    // ─── Options ─────────────────────────────────────────────────────────────
    #[sea_orm(column_type = "Json")]
    pub additional_options: serde_json::Value,
    #[sea_orm(column_type = "Json")]
    pub approval_status_options: serde_json::Value,
    #[sea_orm(column_type = "Json")]
    pub copy_files_options: serde_json::Value,
    #[sea_orm(column_type = "Json")]
    pub attached_attributes: serde_json::Value,
    #[sea_orm(column_type = "Json")]
    pub update_attributes_options: serde_json::Value,

    // ─── Timestamps ──────────────────────────────────────────────────────────
    /// When the workflow was created at the source.
    pub created_at: Option<DateTimeWithTimeZone>,
    /// When the workflow was last updated at the source.
    pub updated_at: Option<DateTimeWithTimeZone>,

    // ─── Tracking ────────────────────────────────────────────────────────────
    /// When this record was last written by a sync run.
    pub synced_at: DateTimeWithTimeZone,
    pub sync_status: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Ids of the steps declared by this workflow, in declaration order.
    pub fn step_ids(&self) -> Vec<&str> {
        self.steps
            .as_array()
            .map(|steps| {
                steps
                    .iter()
                    .filter_map(|s| s.get("id").and_then(|v| v.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }
}
