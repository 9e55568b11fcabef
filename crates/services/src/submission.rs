use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use quiz_core::model::{Answers, QuizId};

use crate::config::SubmissionConfig;
use crate::error::{ConfigError, SubmissionError};

/// Header carrying the quiz id so the endpoint can drop duplicate retries.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Payload posted when a quiz is submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub quiz_id: QuizId,
    pub answers: Answers,
    pub submitted_at: DateTime<Utc>,
}

/// Acknowledgement of an accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub quiz_id: QuizId,
}

/// The one side-effecting boundary of a quiz.
///
/// Implementations must be safe to call again for the same `quiz_id` after a
/// failure without recording the lead twice.
#[async_trait]
pub trait SubmissionClient: Send + Sync {
    /// Deliver the answers to the receiving service.
    ///
    /// # Errors
    ///
    /// `Network` for transient failures, `Rejected` when the service refuses
    /// specific fields, `Unknown` for anything it cannot interpret.
    async fn submit(&self, request: &SubmissionRequest) -> Result<Ack, SubmissionError>;
}

//
// ─── HTTP CLIENT ───────────────────────────────────────────────────────────────
//

/// Posts submissions as JSON to a form endpoint.
#[derive(Clone)]
pub struct HttpSubmissionClient {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpSubmissionClient {
    #[must_use]
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key: None,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Build a client from the submission section of a quiz config.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEndpoint` when no endpoint is configured.
    pub fn from_config(config: &SubmissionConfig) -> Result<Self, ConfigError> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or(ConfigError::MissingEndpoint)?;
        let client = Self::new(endpoint);
        Ok(match config.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => client.with_api_key(key),
            _ => client,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl SubmissionClient for HttpSubmissionClient {
    async fn submit(&self, request: &SubmissionRequest) -> Result<Ack, SubmissionError> {
        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .header(IDEMPOTENCY_KEY_HEADER, request.quiz_id.to_string())
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SubmissionError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SubmissionError::Network(format!("service responded with {status}")));
        }
        if !status.is_success() && !status.is_client_error() {
            return Err(SubmissionError::Unknown(format!("unexpected status {status}")));
        }

        let body: AckBody = response
            .json()
            .await
            .map_err(|e| SubmissionError::Unknown(format!("{status}: {e}")))?;
        body.into_result(request.quiz_id, status)
    }
}

//
// ─── WIRE FORMAT ───────────────────────────────────────────────────────────────
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AckBody {
    accepted: bool,
    #[serde(default)]
    field_errors: BTreeMap<String, String>,
}

impl AckBody {
    fn into_result(self, quiz_id: QuizId, status: StatusCode) -> Result<Ack, SubmissionError> {
        match (self.accepted, status.is_success()) {
            (true, true) => Ok(Ack { quiz_id }),
            (true, false) => Err(SubmissionError::Unknown(format!(
                "accepted body with status {status}"
            ))),
            (false, _) => Err(SubmissionError::Rejected {
                field_errors: self.field_errors,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::time::fixed_now;

    #[test]
    fn request_serializes_in_camel_case() {
        let quiz_id = QuizId::new();
        let request = SubmissionRequest {
            quiz_id,
            answers: [("category", "face")].into_iter().collect(),
            submitted_at: fixed_now(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["quizId"], quiz_id.to_string());
        assert_eq!(json["answers"]["category"], "face");
        assert_eq!(json["submittedAt"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn accepted_body_is_an_ack() {
        let quiz_id = QuizId::new();
        let body: AckBody = serde_json::from_str(r#"{"accepted": true}"#).unwrap();
        assert_eq!(body.into_result(quiz_id, StatusCode::OK), Ok(Ack { quiz_id }));
    }

    #[test]
    fn rejection_carries_field_messages() {
        let body: AckBody = serde_json::from_str(
            r#"{"accepted": false, "fieldErrors": {"email": "already registered"}}"#,
        )
        .unwrap();
        let err = body
            .into_result(QuizId::new(), StatusCode::UNPROCESSABLE_ENTITY)
            .unwrap_err();
        let SubmissionError::Rejected { field_errors } = err else {
            panic!("expected rejection");
        };
        assert_eq!(field_errors["email"], "already registered");
    }

    #[test]
    fn accepted_with_error_status_is_unknown() {
        let body: AckBody = serde_json::from_str(r#"{"accepted": true}"#).unwrap();
        let err = body
            .into_result(QuizId::new(), StatusCode::BAD_REQUEST)
            .unwrap_err();
        assert!(matches!(err, SubmissionError::Unknown(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn config_without_endpoint_is_rejected() {
        let err = HttpSubmissionClient::from_config(&SubmissionConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::MissingEndpoint));
    }
}
