//! Sync engine: configuration, record shaping, phase orchestration and
//! reporting.
//!
//! # Module Structure
//!
//! - `types` - Scope, phases, statistics and constants
//! - `config` - `SyncConfig` and its presets
//! - `progress` - Progress reporting: `SyncProgress`, `ProgressCallback`, `emit()`
//! - [`transform`] - Source records to entity models
//! - [`orchestrator`] - `SyncOrchestrator`, the phase driver
//! - [`report`] - `SyncReport` and bottleneck detection
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use review_sync::sync::{SyncConfig, SyncOrchestrator, SyncScope};
//!
//! let orchestrator = SyncOrchestrator::new(source, tokens, db, SyncConfig::production());
//! let report = orchestrator.run(&SyncScope::project("p-1"), "task-1", None).await;
//! println!("{} reviews written", report.stats.reviews.written());
//! ```

mod config;
mod errors;
pub mod orchestrator;
mod progress;
pub mod report;
pub mod transform;
mod types;

pub use config::{DEFAULT_CALL_TIMEOUT_SECS, Preset, SyncConfig};
pub use errors::{Result, SyncError};
pub use orchestrator::SyncOrchestrator;
pub use progress::{ProgressCallback, SyncProgress, emit};
pub use report::{
    Bottleneck, BottleneckKind, Performance, RunMetrics, RunOutcome, Severity, SyncReport,
    identify_bottlenecks,
};
pub use types::{CancelFlag, EntityCounts, SyncPhase, SyncScope, SyncStats};

pub use types::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONCURRENT, DEFAULT_PAGE_SIZE, ERROR_SAMPLE_SIZE,
    INITIAL_BACKOFF_MS, MAX_BACKOFF_MS,
};
