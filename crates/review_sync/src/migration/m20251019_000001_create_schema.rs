//! Initial migration: workflows, reviews, file versions and progress steps.

use sea_orm_migration::prelude::*;

/// Name of the partial unique index over active progress rows.
pub(crate) const ACTIVE_STEP_INDEX: &str = "idx_progress_steps_active";

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_workflows(manager).await?;
        self.create_reviews(manager).await?;
        self.create_file_versions(manager).await?;
        self.create_progress_steps(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ReviewProgressSteps::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ReviewFileVersions::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Reviews::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ReviewWorkflows::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}

/// JSON column defaulting to the given literal (`'{}'` or `'[]'`).
fn json_col(col: impl IntoIden, default: &str) -> ColumnDef {
    ColumnDef::new(col)
        .json()
        .not_null()
        .default(Expr::cust(default))
        .to_owned()
}

impl Migration {
    async fn create_workflows(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ReviewWorkflows::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReviewWorkflows::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    // Source identity
                    .col(
                        ColumnDef::new(ReviewWorkflows::WorkflowId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ReviewWorkflows::ProjectId).string().null())
                    // Content
                    .col(ColumnDef::new(ReviewWorkflows::Name).string().not_null())
                    .col(ColumnDef::new(ReviewWorkflows::Description).text().null())
                    .col(ColumnDef::new(ReviewWorkflows::Notes).text().null())
                    .col(
                        ColumnDef::new(ReviewWorkflows::Status)
                            .string()
                            .not_null()
                            .default("ACTIVE"),
                    )
                    .col(json_col(ReviewWorkflows::Steps, "'[]'"))
                    .col(json_col(ReviewWorkflows::CreatedBy, "'{}'"))
                    // Options
                    .col(json_col(ReviewWorkflows::AdditionalOptions, "'{}'"))
                    .col(json_col(ReviewWorkflows::ApprovalStatusOptions, "'[]'"))
                    .col(json_col(ReviewWorkflows::CopyFilesOptions, "'{}'"))
                    .col(json_col(ReviewWorkflows::AttachedAttributes, "'[]'"))
                    .col(json_col(ReviewWorkflows::UpdateAttributesOptions, "'{}'"))
                    // Timestamps
                    .col(
                        ColumnDef::new(ReviewWorkflows::CreatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReviewWorkflows::UpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    // Tracking
                    .col(
                        ColumnDef::new(ReviewWorkflows::SyncedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReviewWorkflows::SyncStatus)
                            .string()
                            .not_null()
                            .default("SYNCED"),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_workflows_workflow_id")
                    .table(ReviewWorkflows::Table)
                    .col(ReviewWorkflows::WorkflowId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_workflows_project")
                    .table(ReviewWorkflows::Table)
                    .col(ReviewWorkflows::ProjectId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_reviews(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Reviews::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Reviews::Id).uuid().not_null().primary_key())
                    // Source identity
                    .col(ColumnDef::new(Reviews::ReviewId).string().not_null())
                    .col(ColumnDef::new(Reviews::ProjectId).string().null())
                    .col(ColumnDef::new(Reviews::SequenceId).big_integer().null())
                    // Content
                    .col(ColumnDef::new(Reviews::Name).string().not_null())
                    .col(ColumnDef::new(Reviews::Description).text().null())
                    .col(ColumnDef::new(Reviews::Notes).text().null())
                    .col(
                        ColumnDef::new(Reviews::Status)
                            .string()
                            .not_null()
                            .default("OPEN"),
                    )
                    // Workflow position; workflow_id is not a foreign key
                    .col(ColumnDef::new(Reviews::WorkflowId).string().null())
                    .col(ColumnDef::new(Reviews::CurrentStepId).string().null())
                    .col(ColumnDef::new(Reviews::CurrentStepName).string().null())
                    .col(
                        ColumnDef::new(Reviews::CurrentStepDueDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    // Actors
                    .col(json_col(Reviews::CreatedBy, "'{}'"))
                    .col(json_col(Reviews::AssignedTo, "'[]'"))
                    .col(json_col(Reviews::NextActionBy, "'{}'"))
                    // Archival
                    .col(
                        ColumnDef::new(Reviews::Archived)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(json_col(Reviews::ArchivedBy, "'{}'"))
                    .col(
                        ColumnDef::new(Reviews::ArchivedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Reviews::ArchivedReason).text().null())
                    // Timestamps
                    .col(
                        ColumnDef::new(Reviews::CreatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Reviews::UpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Reviews::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Reviews::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    // Tracking
                    .col(
                        ColumnDef::new(Reviews::SyncedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Reviews::SyncStatus)
                            .string()
                            .not_null()
                            .default("SYNCED"),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_reviews_review_id")
                    .table(Reviews::Table)
                    .col(Reviews::ReviewId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_reviews_workflow")
                    .table(Reviews::Table)
                    .col(Reviews::WorkflowId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_reviews_status")
                    .table(Reviews::Table)
                    .col(Reviews::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_file_versions(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ReviewFileVersions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReviewFileVersions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    // Composite key
                    .col(
                        ColumnDef::new(ReviewFileVersions::ReviewId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReviewFileVersions::FileVersionUrn)
                            .string()
                            .not_null(),
                    )
                    // File
                    .col(ColumnDef::new(ReviewFileVersions::FileName).string().null())
                    .col(
                        ColumnDef::new(ReviewFileVersions::FileSize)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReviewFileVersions::FileExtension)
                            .string()
                            .null(),
                    )
                    .col(ColumnDef::new(ReviewFileVersions::FilePath).text().null())
                    .col(
                        ColumnDef::new(ReviewFileVersions::VersionNumber)
                            .integer()
                            .null(),
                    )
                    // Approval
                    .col(
                        ColumnDef::new(ReviewFileVersions::ApprovalStatus)
                            .string()
                            .not_null()
                            .default("PENDING"),
                    )
                    .col(
                        ColumnDef::new(ReviewFileVersions::ApprovalStatusId)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReviewFileVersions::ApprovalStatusValue)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReviewFileVersions::ApprovalLabel)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReviewFileVersions::ApprovalComments)
                            .text()
                            .null(),
                    )
                    // Payloads
                    .col(json_col(ReviewFileVersions::ReviewContent, "'{}'"))
                    .col(json_col(ReviewFileVersions::CustomAttributes, "'[]'"))
                    .col(
                        ColumnDef::new(ReviewFileVersions::CopiedFileVersionUrn)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReviewFileVersions::SyncedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_file_versions_review_urn")
                    .table(ReviewFileVersions::Table)
                    .col(ReviewFileVersions::ReviewId)
                    .col(ReviewFileVersions::FileVersionUrn)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_progress_steps(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ReviewProgressSteps::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReviewProgressSteps::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    // Identity
                    .col(
                        ColumnDef::new(ReviewProgressSteps::ReviewId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReviewProgressSteps::StepId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReviewProgressSteps::TemplateStepId)
                            .string()
                            .null(),
                    )
                    // Step
                    .col(ColumnDef::new(ReviewProgressSteps::StepName).string().null())
                    .col(
                        ColumnDef::new(ReviewProgressSteps::StepType)
                            .string()
                            .not_null()
                            .default("REVIEWER"),
                    )
                    .col(
                        ColumnDef::new(ReviewProgressSteps::StepOrder)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReviewProgressSteps::Status)
                            .string()
                            .not_null()
                            .default("PENDING"),
                    )
                    // Actors
                    .col(json_col(ReviewProgressSteps::AssignedTo, "'[]'"))
                    .col(json_col(ReviewProgressSteps::ClaimedBy, "'{}'"))
                    .col(json_col(ReviewProgressSteps::CompletedBy, "'{}'"))
                    .col(json_col(ReviewProgressSteps::ActionBy, "'{}'"))
                    .col(json_col(ReviewProgressSteps::Candidates, "'{}'"))
                    // Outcome
                    .col(ColumnDef::new(ReviewProgressSteps::Decision).string().null())
                    .col(ColumnDef::new(ReviewProgressSteps::Comments).text().null())
                    .col(ColumnDef::new(ReviewProgressSteps::Notes).text().null())
                    // Timestamps
                    .col(
                        ColumnDef::new(ReviewProgressSteps::DueDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReviewProgressSteps::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReviewProgressSteps::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReviewProgressSteps::EndTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReviewProgressSteps::SyncedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_progress_steps_review")
                    .table(ReviewProgressSteps::Table)
                    .col(ReviewProgressSteps::ReviewId)
                    .col(ReviewProgressSteps::StepOrder)
                    .to_owned(),
            )
            .await?;

        // Partial unique index: one active row per (review_id, step_id). The
        // index builder has no WHERE clause, so this one is written by hand.
        // SQLite and PostgreSQL accept the same statement.
        manager
            .get_connection()
            .execute_unprepared(&format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {ACTIVE_STEP_INDEX} \
                 ON review_progress_steps (review_id, step_id) \
                 WHERE status NOT IN ('SENT_BACK', 'COMPLETED')"
            ))
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
#[sea_orm(iden = "review_workflows")]
enum ReviewWorkflows {
    Table,
    Id,
    WorkflowId,
    ProjectId,
    Name,
    Description,
    Notes,
    Status,
    Steps,
    CreatedBy,
    AdditionalOptions,
    ApprovalStatusOptions,
    CopyFilesOptions,
    AttachedAttributes,
    UpdateAttributesOptions,
    CreatedAt,
    UpdatedAt,
    SyncedAt,
    SyncStatus,
}

#[derive(DeriveIden)]
enum Reviews {
    Table,
    Id,
    ReviewId,
    ProjectId,
    SequenceId,
    Name,
    Description,
    Notes,
    Status,
    WorkflowId,
    CurrentStepId,
    CurrentStepName,
    CurrentStepDueDate,
    CreatedBy,
    AssignedTo,
    NextActionBy,
    Archived,
    ArchivedBy,
    ArchivedAt,
    ArchivedReason,
    CreatedAt,
    UpdatedAt,
    StartedAt,
    FinishedAt,
    SyncedAt,
    SyncStatus,
}

#[derive(DeriveIden)]
enum ReviewFileVersions {
    Table,
    Id,
    ReviewId,
    FileVersionUrn,
    FileName,
    FileSize,
    FileExtension,
    FilePath,
    VersionNumber,
    ApprovalStatus,
    ApprovalStatusId,
    ApprovalStatusValue,
    ApprovalLabel,
    ApprovalComments,
    ReviewContent,
    CustomAttributes,
    CopiedFileVersionUrn,
    SyncedAt,
}

#[derive(DeriveIden)]
enum ReviewProgressSteps {
    Table,
    Id,
    ReviewId,
    StepId,
    TemplateStepId,
    StepName,
    StepType,
    StepOrder,
    Status,
    AssignedTo,
    ClaimedBy,
    CompletedBy,
    ActionBy,
    Candidates,
    Decision,
    Comments,
    Notes,
    DueDate,
    StartedAt,
    CompletedAt,
    EndTime,
    SyncedAt,
}
