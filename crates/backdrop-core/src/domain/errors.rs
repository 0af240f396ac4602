//! Errors - operation failure classification.
//!
//! Processors report failures as [`OperationError`]. The retry loop only
//! looks at [`ErrorKind`] to decide whether another attempt is worth making.

use thiserror::Error;

/// Operational classification of a processing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Might succeed on another attempt (timeouts, flaky dependencies).
    Transient,
    /// Will fail the same way every time (bad input, programmer error).
    Permanent,
}

/// Failure reported by an operation processor.
#[derive(Debug, Clone, Error)]
#[error("{kind:?} operation error: {message}")]
pub struct OperationError {
    kind: ErrorKind,
    message: String,
}

impl OperationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// A failure that skips the remaining attempts.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

impl From<String> for OperationError {
    fn from(message: String) -> Self {
        Self::transient(message)
    }
}

impl From<&str> for OperationError {
    fn from(message: &str) -> Self {
        Self::transient(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(OperationError::transient("timeout").is_retryable());
        assert!(!OperationError::permanent("bad payload").is_retryable());
    }

    #[test]
    fn plain_strings_default_to_transient() {
        let err: OperationError = "connection reset".into();
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(err.message(), "connection reset");
        assert!(err.to_string().contains("connection reset"));
    }
}
