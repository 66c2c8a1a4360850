//! Common re-exports for convenient entity usage.

pub use super::approval_status::ApprovalStatus;
pub use super::review::{
    ActiveModel as ReviewActiveModel, Column as ReviewColumn, Entity as Review,
    Model as ReviewModel,
};
pub use super::review_file_version::{
    ActiveModel as ReviewFileVersionActiveModel, Column as ReviewFileVersionColumn,
    Entity as ReviewFileVersion, Model as ReviewFileVersionModel,
};
pub use super::review_progress_step::{
    ActiveModel as ReviewProgressStepActiveModel, Column as ReviewProgressStepColumn,
    Entity as ReviewProgressStep, Model as ReviewProgressStepModel,
};
pub use super::review_status::ReviewStatus;
pub use super::step_status::StepStatus;
pub use super::step_type::StepType;
pub use super::workflow::{
    ActiveModel as WorkflowActiveModel, Column as WorkflowColumn, Entity as Workflow,
    Model as WorkflowModel,
};
pub use super::workflow_status::WorkflowStatus;
