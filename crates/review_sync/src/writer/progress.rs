//! Progress-step writes.
//!
//! `(review_id, step_id)` is unique only among active rows, so there is no
//! single `ON CONFLICT` target. Each row is matched inside the caller's
//! transaction instead:
//!
//! - a terminal row carrying `completed_at` (or `end_time`) first matches
//!   stored history with the same timestamp, then the active row (which it
//!   transitions), else it is inserted;
//! - a terminal row without either timestamp transitions the active row
//!   first, and only then falls back to untimed history not yet matched in
//!   this batch;
//! - an active row matches the active row, else it is inserted.
//!
//! Either kind may also adopt the `PENDING` placeholder created for its
//! template step. The partial unique index rejects anything that slips past.

use sea_orm::{
    ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::entity::review_progress_step::{ActiveModel, Column, Entity, Model};
use crate::entity::step_status::StepStatus;

use super::errors::Result;
use super::types::UpsertCounts;

const TERMINAL: [StepStatus; 2] = [StepStatus::SentBack, StepStatus::Completed];

fn active_model(row: Model) -> ActiveModel {
    ActiveModel {
        id: NotSet,
        review_id: Set(row.review_id),
        step_id: Set(row.step_id),
        template_step_id: Set(row.template_step_id),
        step_name: Set(row.step_name),
        step_type: Set(row.step_type),
        step_order: Set(row.step_order),
        status: Set(row.status),
        assigned_to: Set(row.assigned_to),
        claimed_by: Set(row.claimed_by),
        completed_by: Set(row.completed_by),
        action_by: Set(row.action_by),
        candidates: Set(row.candidates),
        decision: Set(row.decision),
        comments: Set(row.comments),
        notes: Set(row.notes),
        due_date: Set(row.due_date),
        started_at: Set(row.started_at),
        completed_at: Set(row.completed_at),
        end_time: Set(row.end_time),
        synced_at: Set(row.synced_at),
    }
}

fn same_key(row: &Model) -> Condition {
    Condition::all()
        .add(Column::ReviewId.eq(row.review_id.as_str()))
        .add(Column::StepId.eq(row.step_id.as_str()))
}

async fn find_history<C: ConnectionTrait>(
    conn: &C,
    row: &Model,
    timestamp: Condition,
    claimed: &[Uuid],
) -> Result<Option<Model>> {
    Ok(Entity::find()
        .filter(same_key(row))
        .filter(Column::Status.is_in(TERMINAL))
        .filter(timestamp)
        .filter(Column::Id.is_not_in(claimed.iter().copied()))
        .one(conn)
        .await?)
}

/// Stored row `row` should be written onto, if any. Rows already written in
/// this batch are in `claimed`.
async fn find_target<C: ConnectionTrait>(
    conn: &C,
    row: &Model,
    claimed: &[Uuid],
) -> Result<Option<Model>> {
    let terminal = !row.is_active();
    let timestamp = match (row.completed_at, row.end_time) {
        (Some(ts), _) => Some(Condition::all().add(Column::CompletedAt.eq(ts))),
        (None, Some(ts)) => Some(
            Condition::all()
                .add(Column::CompletedAt.is_null())
                .add(Column::EndTime.eq(ts)),
        ),
        (None, None) => None,
    };

    if terminal && let Some(timestamp) = timestamp.clone() {
        let history = find_history(conn, row, timestamp, claimed).await?;
        if history.is_some() {
            return Ok(history);
        }
    }

    let active = Entity::find()
        .filter(same_key(row))
        .filter(Column::Status.is_in(StepStatus::active()))
        .one(conn)
        .await?;
    if active.is_some() {
        return Ok(active);
    }

    if terminal && timestamp.is_none() {
        let untimed = Condition::all()
            .add(Column::CompletedAt.is_null())
            .add(Column::EndTime.is_null());
        let history = find_history(conn, row, untimed, claimed).await?;
        if history.is_some() {
            return Ok(history);
        }
    }

    // Placeholder rows use the template step id as their step id.
    match row.template_step_id.as_deref() {
        Some(template) if template != row.step_id => Ok(Entity::find()
            .filter(Column::ReviewId.eq(row.review_id.as_str()))
            .filter(Column::StepId.eq(template))
            .filter(Column::Status.eq(StepStatus::Pending))
            .one(conn)
            .await?),
        _ => Ok(None),
    }
}

/// Write progress rows one by one. Must run inside the caller's transaction.
pub(crate) async fn upsert_progress<C: ConnectionTrait>(
    conn: &C,
    mut rows: Vec<Model>,
) -> Result<UpsertCounts> {
    // Terminal rows go first so a transition never consumes the active row
    // that a later record in the same batch matches.
    rows.sort_by_key(Model::is_active);

    let mut counts = UpsertCounts::default();
    let mut claimed: Vec<Uuid> = Vec::with_capacity(rows.len());
    for row in rows {
        match find_target(conn, &row, &claimed).await? {
            Some(existing) => {
                Entity::update_many()
                    .set(active_model(row))
                    .filter(Column::Id.eq(existing.id))
                    .exec(conn)
                    .await?;
                claimed.push(existing.id);
                counts.updated += 1;
            }
            None => {
                let id = Uuid::new_v4();
                let mut model = active_model(row);
                model.id = Set(id);
                Entity::insert(model).exec_without_returning(conn).await?;
                claimed.push(id);
                counts.inserted += 1;
            }
        }
    }

    Ok(counts)
}
