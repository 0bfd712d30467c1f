//! Error types for orchestrate-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid issue identifier: {0}")]
    IdentifierInvalid(String),

    #[error("authentication required: {0}")]
    AuthRequired(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("external call failed ({transient}): {message}")]
    ExternalCallFailed { transient: bool, message: String },

    #[error("generator failed: {0}")]
    GeneratorFailed(String),

    #[error("validation failed at step {step}: {message}")]
    ValidationFailed { step: String, message: String },

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True when the operation is worth retrying locally with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ExternalCallFailed { transient: true, .. })
    }

    pub fn external(transient: bool, message: impl Into<String>) -> Self {
        Error::ExternalCallFailed { transient, message: message.into() }
    }

    pub fn validation(step: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ValidationFailed { step: step.into(), message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_external_call_is_retryable() {
        let err = Error::external(true, "rate limited");
        assert!(err.is_transient());
    }

    #[test]
    fn permanent_external_call_is_not_retryable() {
        let err = Error::external(false, "not found");
        assert!(!err.is_transient());
    }

    #[test]
    fn cancelled_is_distinct_from_internal() {
        let err = Error::Cancelled;
        assert_eq!(err.to_string(), "cancelled");
    }
}
