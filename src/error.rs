//! Error taxonomy for the harvesting engine.
//!
//! Errors are split by blast radius:
//!
//! | Type | Scope | Effect |
//! |------|-------|--------|
//! | [`FieldError`] | one field | field degrades to [`Field::Unavailable`](crate::models::Field) |
//! | [`TaskError`] | one work item | a [`FailureRecord`](crate::models::FailureRecord) is written |
//! | [`ResponseShapeError`] | one batch | one whole-batch retry, then degraded records |
//! | [`HarvestError`] | the run | the run aborts |

use crate::models::FieldName;
use std::time::Duration;
use thiserror::Error;

/// A single field could not be extracted. Never fails the task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct FieldError {
    pub field: FieldName,
    pub message: String,
}

impl FieldError {
    pub fn missing(field: FieldName) -> Self {
        Self {
            field,
            message: "no matching element".to_string(),
        }
    }
}

/// Terminal failure of one task (or of one input row before scheduling).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("extractor failed: {0}")]
    Extractor(String),
}

impl TaskError {
    /// Stable reason code written to the failure log.
    pub fn reason(&self) -> &'static str {
        match self {
            TaskError::InvalidInput(_) => "invalid-input",
            TaskError::Navigation(_) => "navigation",
            TaskError::Timeout(_) => "timeout",
            TaskError::Extractor(_) => "extractor",
        }
    }
}

/// Body and decode failures mean the page arrived but could not be read.
/// Timeouts are classified by [`Session::request_error`](crate::identity::Session::request_error),
/// which knows the configured limit.
impl From<reqwest::Error> for TaskError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() || e.is_body() {
            TaskError::Extractor(e.to_string())
        } else {
            TaskError::Navigation(e.to_string())
        }
    }
}

/// A batch-level structured response did not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseShapeError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("response is not valid JSON: {0}")]
    Unparseable(String),

    #[error("expected a JSON array, got {0}")]
    NotAnArray(&'static str),

    #[error("expected {expected} entries, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Transport-level failures talking to the structured-inference API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("api response had no message content")]
    EmptyCompletion,
}

/// Fatal errors. Anything here stops the run.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing credential: {0} is not set")]
    MissingCredential(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_stable() {
        assert_eq!(TaskError::InvalidInput("x".into()).reason(), "invalid-input");
        assert_eq!(TaskError::Navigation("x".into()).reason(), "navigation");
        assert_eq!(TaskError::Timeout(Duration::from_secs(1)).reason(), "timeout");
        assert_eq!(TaskError::Extractor("x".into()).reason(), "extractor");
    }

    #[test]
    fn test_shape_error_display() {
        let e = ResponseShapeError::LengthMismatch {
            expected: 5,
            actual: 4,
        };
        assert_eq!(e.to_string(), "expected 5 entries, got 4");
    }
}
