//! Review Sync - keeps a relational store in step with a paginated review API.
//!
//! The engine pulls workflow templates and reviews (with their file versions
//! and progress steps) from a [`source::PagedSource`], and upserts them through
//! a [`writer::BatchUpsertWriter`]. Remote calls are bounded in concurrency,
//! cached, retried, and guarded by a [`circuit_breaker::CircuitBreaker`].
//!
//! # Features
//!
//! - `migrate` - Enables database migration support. When enabled, you can use
//!   [`connect_and_migrate`] to create the schema on connection.
//! - `http` - The reqwest-backed transport for [`source::HttpSource`].
//! - `sqlite` / `postgres` - Database backends.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use review_sync::{connect_and_migrate, SyncConfig, SyncOrchestrator, SyncScope};
//!
//! let db = connect_and_migrate("sqlite://review-sync.db?mode=rwc").await?;
//! let orchestrator = Arc::new(SyncOrchestrator::new(source, tokens, db, SyncConfig::default()));
//!
//! let task_id = orchestrator.start_sync(SyncScope::project("p-1"));
//! let status = orchestrator.get_status(&task_id);
//! ```

pub mod cache;
pub mod circuit_breaker;
pub mod db;
pub mod entity;
pub mod fetcher;
pub mod http;
pub mod retry;
pub mod source;
pub mod sync;
pub mod tasks;
pub mod writer;

#[cfg(feature = "migrate")]
pub mod migration;

pub use cache::{CacheLayer, CacheStats};
pub use circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitOpenError, CircuitState};
pub use db::connect;
#[cfg(feature = "migrate")]
pub use db::{connect_and_migrate, reset_schema};
pub use entity::prelude::*;
pub use fetcher::{ApiMetricsSnapshot, RateLimitedFetcher};
pub use source::{PagedSource, ResourceKind, SourceError, TokenProvider};
pub use sync::{
    CancelFlag, Preset, SyncConfig, SyncError, SyncOrchestrator, SyncPhase, SyncProgress,
    SyncReport, SyncScope, SyncStats,
};
pub use tasks::{TaskLifecycleManager, TaskSnapshot, TaskState};
pub use writer::{BatchUpsertWriter, EntityBatch, EntityKind, UpsertCounts, WriterError};
