//! ReviewProgressStep entity - execution history of workflow steps.
//!
//! Uniqueness on `(review_id, step_id)` is conditional: only one *active* row
//! (status not `SENT_BACK`/`COMPLETED`) may exist per key, while any number of
//! terminal rows are kept as history. The migration creates a partial unique
//! index for this, so the entity itself declares no unique constraint.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::step_status::StepStatus;
use crate::entity::step_type::StepType;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "review_progress_steps")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    // ─── Identity ────────────────────────────────────────────────────────────
    pub review_id: String,
    /// Runtime step id reported by the source.
    pub step_id: String,
    /// Id of the matching step in the workflow template (matched by order).
    pub template_step_id: Option<String>,

    // ─── Step ────────────────────────────────────────────────────────────────
    pub step_name: Option<String>,
    pub step_type: StepType,
    pub step_order: i32,
    pub status: StepStatus,

    // ─── Actors ──────────────────────────────────────────────────────────────
    #[sea_orm(column_type = "Json")]
    pub assigned_to: serde_json::Value,
    #[sea_orm(column_type = "Json")]
    pub claimed_by: serde_json::Value,
    #[sea_orm(column_type = "Json")]
    pub completed_by: serde_json::Value,
    #[sea_orm(column_type = "Json")]
    pub action_by: serde_json::Value,
    /// Candidate set: `{users, roles, companies}`.
    #[sea_orm(column_type = "Json")]
    pub candidates: serde_json::Value,

    // ─── Outcome ─────────────────────────────────────────────────────────────
    pub decision: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub comments: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,

    // ─── Timestamps ──────────────────────────────────────────────────────────
    pub due_date: Option<DateTimeWithTimeZone>,
    pub started_at: Option<DateTimeWithTimeZone>,
    pub completed_at: Option<DateTimeWithTimeZone>,
    pub end_time: Option<DateTimeWithTimeZone>,

    pub synced_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether this row is the active (non-history) row for its key.
    #[inline]
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}
