use std::collections::HashMap;

use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    IntoActiveModel, QueryFilter, Set, sea_query::OnConflict,
};
use uuid::Uuid;

use crate::entity::{review, review_file_version, workflow};

use super::errors::{Result, WriterError};
use super::types::UpsertCounts;

/// An entity written with `INSERT ... ON CONFLICT (natural key) DO UPDATE`.
pub(crate) trait Upsertable:
    Clone + Send + Sync + Sized + IntoActiveModel<Self::Active> + 'static
{
    type Entity: EntityTrait<Model = Self>;
    type Active: ActiveModelTrait<Entity = Self::Entity> + ActiveModelBehavior + Send;

    /// Entity name for logs and progress events.
    const NAME: &'static str;

    fn natural_key(&self) -> String;
    fn surrogate_id(&self) -> Uuid;
    /// Active model with every column set and the given surrogate id.
    fn into_active(self, id: Uuid) -> Self::Active;
    fn on_conflict() -> OnConflict;
    /// Condition selecting (at least) the stored rows for `rows`.
    fn key_condition(rows: &[Self]) -> Condition;
}

// ─── Workflows ───────────────────────────────────────────────────────────────

impl Upsertable for workflow::Model {
    type Entity = workflow::Entity;
    type Active = workflow::ActiveModel;

    const NAME: &'static str = "workflows";

    fn natural_key(&self) -> String {
        self.workflow_id.clone()
    }

    fn surrogate_id(&self) -> Uuid {
        self.id
    }

    fn into_active(self, id: Uuid) -> Self::Active {
        workflow::ActiveModel {
            id: Set(id),
            workflow_id: Set(self.workflow_id),
            project_id: Set(self.project_id),
            name: Set(self.name),
            description: Set(self.description),
            notes: Set(self.notes),
            status: Set(self.status),
            steps: Set(self.steps),
            created_by: Set(self.created_by),
            additional_options: Set(self.additional_options),
            approval_status_options: Set(self.approval_status_options),
            copy_files_options: Set(self.copy_files_options),
            attached_attributes: Set(self.attached_attributes),
            update_attributes_options: Set(self.update_attributes_options),
            created_at: Set(self.created_at),
            updated_at: Set(self.updated_at),
            synced_at: Set(self.synced_at),
            sync_status: Set(self.sync_status),
        }
    }

    fn on_conflict() -> OnConflict {
        use workflow::Column;

        OnConflict::column(Column::WorkflowId)
            .update_columns([
                Column::ProjectId,
                Column::Name,
                Column::Description,
                Column::Notes,
                Column::Status,
                Column::Steps,
                Column::CreatedBy,
                Column::AdditionalOptions,
                Column::ApprovalStatusOptions,
                Column::CopyFilesOptions,
                Column::AttachedAttributes,
                Column::UpdateAttributesOptions,
                Column::UpdatedAt,
                Column::SyncedAt,
                Column::SyncStatus,
            ])
            .to_owned()
    }

    fn key_condition(rows: &[Self]) -> Condition {
        Condition::all().add(
            workflow::Column::WorkflowId.is_in(rows.iter().map(|r| r.workflow_id.clone())),
        )
    }
}

// ─── Reviews ─────────────────────────────────────────────────────────────────

impl Upsertable for review::Model {
    type Entity = review::Entity;
    type Active = review::ActiveModel;

    const NAME: &'static str = "reviews";

    fn natural_key(&self) -> String {
        self.review_id.clone()
    }

    fn surrogate_id(&self) -> Uuid {
        self.id
    }

    fn into_active(self, id: Uuid) -> Self::Active {
        review::ActiveModel {
            id: Set(id),
            review_id: Set(self.review_id),
            project_id: Set(self.project_id),
            sequence_id: Set(self.sequence_id),
            name: Set(self.name),
            description: Set(self.description),
            notes: Set(self.notes),
            status: Set(self.status),
            workflow_id: Set(self.workflow_id),
            current_step_id: Set(self.current_step_id),
            current_step_name: Set(self.current_step_name),
            current_step_due_date: Set(self.current_step_due_date),
            created_by: Set(self.created_by),
            assigned_to: Set(self.assigned_to),
            next_action_by: Set(self.next_action_by),
            archived: Set(self.archived),
            archived_by: Set(self.archived_by),
            archived_at: Set(self.archived_at),
            archived_reason: Set(self.archived_reason),
            created_at: Set(self.created_at),
            updated_at: Set(self.updated_at),
            started_at: Set(self.started_at),
            finished_at: Set(self.finished_at),
            synced_at: Set(self.synced_at),
            sync_status: Set(self.sync_status),
        }
    }

    fn on_conflict() -> OnConflict {
        use review::Column;

        OnConflict::column(Column::ReviewId)
            .update_columns([
                Column::ProjectId,
                Column::SequenceId,
                Column::Name,
                Column::Description,
                Column::Notes,
                Column::Status,
                Column::WorkflowId,
                Column::CurrentStepId,
                Column::CurrentStepName,
                Column::CurrentStepDueDate,
                Column::CreatedBy,
                Column::AssignedTo,
                Column::NextActionBy,
                Column::Archived,
                Column::ArchivedBy,
                Column::ArchivedAt,
                Column::ArchivedReason,
                Column::UpdatedAt,
                Column::StartedAt,
                Column::FinishedAt,
                Column::SyncedAt,
                Column::SyncStatus,
            ])
            .to_owned()
    }

    fn key_condition(rows: &[Self]) -> Condition {
        Condition::all()
            .add(review::Column::ReviewId.is_in(rows.iter().map(|r| r.review_id.clone())))
    }
}

// ─── File Versions ───────────────────────────────────────────────────────────

impl Upsertable for review_file_version::Model {
    type Entity = review_file_version::Entity;
    type Active = review_file_version::ActiveModel;

    const NAME: &'static str = "file_versions";

    fn natural_key(&self) -> String {
        format!("{}\u{1f}{}", self.review_id, self.file_version_urn)
    }

    fn surrogate_id(&self) -> Uuid {
        self.id
    }

    fn into_active(self, id: Uuid) -> Self::Active {
        review_file_version::ActiveModel {
            id: Set(id),
            review_id: Set(self.review_id),
            file_version_urn: Set(self.file_version_urn),
            file_name: Set(self.file_name),
            file_size: Set(self.file_size),
            file_extension: Set(self.file_extension),
            file_path: Set(self.file_path),
            version_number: Set(self.version_number),
            approval_status: Set(self.approval_status),
            approval_status_id: Set(self.approval_status_id),
            approval_status_value: Set(self.approval_status_value),
            approval_label: Set(self.approval_label),
            approval_comments: Set(self.approval_comments),
            review_content: Set(self.review_content),
            custom_attributes: Set(self.custom_attributes),
            copied_file_version_urn: Set(self.copied_file_version_urn),
            synced_at: Set(self.synced_at),
        }
    }

    fn on_conflict() -> OnConflict {
        use review_file_version::Column;

        OnConflict::columns([Column::ReviewId, Column::FileVersionUrn])
            .update_columns([
                Column::FileName,
                Column::FileSize,
                Column::FileExtension,
                Column::FilePath,
                Column::VersionNumber,
                Column::ApprovalStatus,
                Column::ApprovalStatusId,
                Column::ApprovalStatusValue,
                Column::ApprovalLabel,
                Column::ApprovalComments,
                Column::ReviewContent,
                Column::CustomAttributes,
                Column::CopiedFileVersionUrn,
                Column::SyncedAt,
            ])
            .to_owned()
    }

    // Selects the cross product of reviews and urns; callers match on the
    // full key.
    fn key_condition(rows: &[Self]) -> Condition {
        use review_file_version::Column;

        Condition::all()
            .add(Column::ReviewId.is_in(rows.iter().map(|r| r.review_id.clone())))
            .add(Column::FileVersionUrn.is_in(rows.iter().map(|r| r.file_version_urn.clone())))
    }
}

// ─── Upsert ──────────────────────────────────────────────────────────────────

/// Drop earlier duplicates of a natural key, keeping the last occurrence.
pub(crate) fn dedup_by_key<M: Upsertable>(rows: Vec<M>) -> Vec<M> {
    let mut last: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        last.insert(row.natural_key(), idx);
    }
    rows.into_iter()
        .enumerate()
        .filter(|(idx, row)| last.get(&row.natural_key()) == Some(idx))
        .map(|(_, row)| row)
        .collect()
}

/// Upsert one chunk and classify each row from the stored surrogate ids.
///
/// Every row is written with a fresh id; the conflict clause never updates
/// `id`, so a stored id equal to the generated one means the row was
/// inserted. Must run inside the caller's transaction.
pub(crate) async fn upsert_chunk<M, C>(conn: &C, rows: Vec<M>) -> Result<UpsertCounts>
where
    M: Upsertable,
    C: ConnectionTrait,
{
    if rows.is_empty() {
        return Ok(UpsertCounts::default());
    }

    let condition = M::key_condition(&rows);
    let mut generated: Vec<(String, Uuid)> = Vec::with_capacity(rows.len());
    let models: Vec<M::Active> = rows
        .into_iter()
        .map(|row| {
            let id = Uuid::new_v4();
            generated.push((row.natural_key(), id));
            row.into_active(id)
        })
        .collect();

    M::Entity::insert_many(models)
        .on_conflict(M::on_conflict())
        .exec_without_returning(conn)
        .await?;

    let stored: HashMap<String, Uuid> = M::Entity::find()
        .filter(condition)
        .all(conn)
        .await?
        .into_iter()
        .map(|row| (row.natural_key(), row.surrogate_id()))
        .collect();

    let mut counts = UpsertCounts::default();
    let mut missing = 0usize;
    for (key, id) in &generated {
        match stored.get(key) {
            Some(stored_id) if stored_id == id => counts.inserted += 1,
            Some(_) => counts.updated += 1,
            None => missing += 1,
        }
    }

    if missing > 0 {
        return Err(WriterError::partial_failure(counts.total(), missing));
    }

    Ok(counts)
}
