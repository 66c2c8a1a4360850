//! SeaORM entity definitions for the review sync schema.

pub mod approval_status;
pub mod prelude;
pub mod review;
pub mod review_file_version;
pub mod review_progress_step;
pub mod review_status;
pub mod step_status;
pub mod step_type;
pub mod workflow;
pub mod workflow_status;

/// Value written to `sync_status` by a successful sync pass.
pub const SYNC_STATUS_SYNCED: &str = "SYNCED";
