use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};

use crate::entity::prelude::*;
use crate::entity::{review, review_progress_step, workflow};

use super::errors::{Result, WriterError};
use super::types::EntityKind;

// ─── Query Operations ────────────────────────────────────────────────────────

/// Find a workflow by its external id.
pub async fn find_workflow(
    db: &DatabaseConnection,
    workflow_id: &str,
) -> Result<Option<workflow::Model>> {
    Workflow::find()
        .filter(WorkflowColumn::WorkflowId.eq(workflow_id))
        .one(db)
        .await
        .map_err(WriterError::from)
}

/// Find a review by its external id.
pub async fn find_review(db: &DatabaseConnection, review_id: &str) -> Result<Option<review::Model>> {
    Review::find()
        .filter(ReviewColumn::ReviewId.eq(review_id))
        .one(db)
        .await
        .map_err(WriterError::from)
}

/// All progress rows of a review, history included, in step order.
pub async fn find_progress(
    db: &DatabaseConnection,
    review_id: &str,
) -> Result<Vec<review_progress_step::Model>> {
    ReviewProgressStep::find()
        .filter(ReviewProgressStepColumn::ReviewId.eq(review_id))
        .order_by_asc(ReviewProgressStepColumn::StepOrder)
        .order_by_asc(ReviewProgressStepColumn::CompletedAt)
        .all(db)
        .await
        .map_err(WriterError::from)
}

/// Count stored rows of one kind.
pub async fn count(db: &DatabaseConnection, kind: EntityKind) -> Result<u64> {
    let count = match kind {
        EntityKind::Workflows => Workflow::find().count(db).await?,
        EntityKind::Reviews => Review::find().count(db).await?,
        EntityKind::FileVersions => ReviewFileVersion::find().count(db).await?,
        EntityKind::ProgressSteps => ReviewProgressStep::find().count(db).await?,
    };
    Ok(count)
}
