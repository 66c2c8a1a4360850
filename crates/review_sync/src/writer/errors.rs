use sea_orm::DbErr;
use thiserror::Error;

/// Errors surfaced by batch writes. A failed batch is always rolled back.
#[derive(Debug, Error)]
pub enum WriterError {
    /// Database error from sea-orm.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// A record could not be written as given.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Some rows of a batch were neither inserted nor updated.
    #[error("Batch write failed: {succeeded} succeeded, {failed} failed")]
    PartialFailure { succeeded: usize, failed: usize },
}

impl WriterError {
    #[inline]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    #[inline]
    pub fn partial_failure(succeeded: usize, failed: usize) -> Self {
        Self::PartialFailure { succeeded, failed }
    }

    /// Whether retrying the whole batch may succeed (lock contention, dropped
    /// connections, timeouts).
    pub fn is_transient(&self) -> bool {
        match self {
            WriterError::Database(db_err) => is_transient_db_error(db_err),
            _ => false,
        }
    }
}

fn is_transient_db_error(err: &DbErr) -> bool {
    match err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => true,
        DbErr::Exec(_) | DbErr::Query(_) => {
            let err_str = err.to_string().to_lowercase();
            // SQLite reports "database is locked"/"busy"; Postgres reports
            // connection resets and pool exhaustion.
            err_str.contains("locked")
                || err_str.contains("busy")
                || err_str.contains("timeout")
                || err_str.contains("connection")
                || err_str.contains("temporarily unavailable")
        }
        _ => false,
    }
}

/// Result type alias for writer operations.
pub type Result<T> = std::result::Result<T, WriterError>;
