use thiserror::Error;

use crate::source::SourceError;
use crate::writer::WriterError;

use super::types::SyncPhase;

/// Errors that end a sync run.
///
/// Per-item failures never surface here; they are collected in
/// [`SyncStats::errors`](super::SyncStats::errors) and the run continues.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The store is unusable (missing schema, failed reset).
    #[error("Setup failed: {message}")]
    FatalSetup { message: String },

    /// The credential is missing or was rejected.
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// A list fetch failed, so the phase cannot continue.
    #[error("{phase} failed to fetch from source: {source}")]
    Source {
        phase: SyncPhase,
        source: SourceError,
    },

    /// A batch write failed and was rolled back.
    #[error("{phase} failed to persist: {source}")]
    Persistence {
        phase: SyncPhase,
        source: WriterError,
    },

    #[error("Sync cancelled during {phase}")]
    Cancelled { phase: SyncPhase },
}

impl SyncError {
    #[inline]
    pub fn fatal_setup(message: impl Into<String>) -> Self {
        Self::FatalSetup {
            message: message.into(),
        }
    }

    #[inline]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Classify a source failure; auth errors end the run as such.
    pub fn source(phase: SyncPhase, source: SourceError) -> Self {
        match source {
            SourceError::Auth { message } => Self::Auth { message },
            source => Self::Source { phase, source },
        }
    }

    #[inline]
    pub fn persistence(phase: SyncPhase, source: WriterError) -> Self {
        Self::Persistence { phase, source }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Result type for sync runs.
pub type Result<T> = std::result::Result<T, SyncError>;
