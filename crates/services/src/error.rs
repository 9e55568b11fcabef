//! Shared error types for the services crate.

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use quiz_core::model::StepId;
use quiz_core::{FieldError, GraphError};

/// Errors emitted by a `SubmissionClient`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubmissionError {
    /// Transport failure, timeout or an overloaded endpoint. Safe to retry.
    #[error("could not reach the submission service: {0}")]
    Network(String),
    /// The endpoint refused the answers; messages are keyed by field name.
    #[error("some answers need attention")]
    Rejected { field_errors: BTreeMap<String, String> },
    #[error("unexpected response from the submission service: {0}")]
    Unknown(String),
}

impl SubmissionError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmissionError::Network(_))
    }
}

/// Errors emitted by `QuizEngine` operations.
///
/// Every runtime variant is also reflected in the session's error state, so
/// observers see the same failure the caller does.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("{} field(s) need attention", .0.len())]
    Invalid(Vec<FieldError>),
    #[error("the final step is completed by submitting")]
    SubmissionRequired,
    #[error("step {0} does not submit the quiz")]
    NotFinalStep(StepId),
    #[error("answer for step {got} arrived while step {expected} is active")]
    StaleStep { expected: StepId, got: StepId },
    #[error("a submission is in progress")]
    Busy,
    #[error("quiz is already finished")]
    Finished,
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

/// Errors emitted while loading quiz configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("could not read quiz config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid quiz config: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("invalid submission endpoint `{raw}`: {source}")]
    InvalidEndpoint {
        raw: String,
        #[source]
        source: url::ParseError,
    },
    #[error("no submission endpoint configured")]
    MissingEndpoint,
    #[error("invalid submission timeout `{0}`; expected a positive number of seconds")]
    InvalidTimeout(String),
}
