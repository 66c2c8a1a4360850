use thiserror::Error;

use crate::circuit_breaker::CircuitOpenError;

/// Errors raised while talking to the remote review source.
///
/// Only [`SourceError::Transient`] is retried. Everything else either means
/// the request itself is wrong or the caller must not retry it yet.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Timeouts, transport failures, 5xx and 429 responses.
    #[error("Transient source error: {message}")]
    Transient { message: String },

    /// Non-retryable 4xx responses.
    #[error("Source rejected request{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Permanent { status: Option<u16>, message: String },

    /// The circuit breaker for this dependency is open; no call was made.
    #[error("Circuit open for dependency '{dependency}'")]
    CircuitOpen { dependency: String },

    /// Credential missing or rejected (401/403).
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// Payload could not be decoded.
    #[error("Malformed source payload: {message}")]
    Decode { message: String },
}

impl SourceError {
    #[inline]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    #[inline]
    pub fn permanent(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Permanent {
            status,
            message: message.into(),
        }
    }

    #[inline]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// A per-call deadline elapsed.
    #[inline]
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::transient(format!("call timed out after {}ms", after.as_millis()))
    }

    /// Whether a retry may succeed.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    #[inline]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Whether this error should count against the circuit breaker.
    ///
    /// Permanent and decode errors are caused by the request, not the
    /// dependency's health.
    #[inline]
    pub fn is_dependency_failure(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Auth { .. })
    }
}

impl From<CircuitOpenError> for SourceError {
    fn from(e: CircuitOpenError) -> Self {
        Self::CircuitOpen {
            dependency: e.dependency,
        }
    }
}

/// First line of an error's message, for progress output and error samples.
#[inline]
pub fn short_error_message(e: &impl std::error::Error) -> String {
    let full = e.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}

/// Result type for source operations.
pub type Result<T> = std::result::Result<T, SourceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(SourceError::transient("reset").is_transient());
        assert!(SourceError::timeout(Duration::from_secs(10)).is_transient());
        assert!(!SourceError::permanent(Some(404), "gone").is_transient());
        assert!(!SourceError::auth("expired").is_transient());
        assert!(!SourceError::decode("eof").is_transient());
        assert!(
            !SourceError::from(CircuitOpenError::new("reviews")).is_transient(),
            "circuit-open must not be retried"
        );
    }

    #[test]
    fn permanent_display_includes_status_when_known() {
        let with = SourceError::permanent(Some(404), "no such review");
        assert_eq!(with.to_string(), "Source rejected request (404): no such review");

        let without = SourceError::permanent(None, "bad filter");
        assert_eq!(without.to_string(), "Source rejected request: bad filter");
    }

    #[test]
    fn timeout_message_names_deadline() {
        let err = SourceError::timeout(Duration::from_millis(1500));
        assert!(err.to_string().contains("1500ms"));
    }

    #[test]
    fn circuit_open_conversion_keeps_dependency() {
        let err = SourceError::from(CircuitOpenError::new("review_detail"));
        assert!(err.is_circuit_open());
        assert!(err.to_string().contains("review_detail"));
    }

    #[test]
    fn short_error_message_takes_first_line() {
        let err = std::io::Error::other("first line\nsecond line");
        assert_eq!(short_error_message(&err), "first line");
    }
}
