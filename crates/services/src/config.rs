use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use quiz_core::model::{StepDefinition, StepId};
use quiz_core::{Clock, GraphError, StepGraph, ValidationSettings};

use crate::error::ConfigError;
use crate::quiz::EngineConfig;

pub const ENV_SUBMIT_URL: &str = "QUIZ_SUBMIT_URL";
pub const ENV_SUBMIT_TIMEOUT_SECS: &str = "QUIZ_SUBMIT_TIMEOUT_SECS";
pub const ENV_SUBMIT_API_KEY: &str = "QUIZ_SUBMIT_API_KEY";

const DEFAULT_TIMEOUT_SECS: u64 = 15;

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Where and how completed quizzes are delivered.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubmissionConfig {
    #[serde(default)]
    pub endpoint: Option<Url>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            api_key: None,
        }
    }
}

impl SubmissionConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Everything needed to run one quiz: the step graph, validation knobs and the
/// submission target.
///
/// Loaded from JSON; `start` defaults to the first listed step.
#[derive(Debug, Clone, Deserialize)]
pub struct QuizConfig {
    #[serde(default)]
    pub start: Option<StepId>,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub validation: ValidationSettings,
    #[serde(default)]
    pub submission: SubmissionConfig,
}

impl QuizConfig {
    /// Read a quiz config from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read and
    /// `ConfigError::Json` if it does not parse.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parse a quiz config from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Json` if the text does not parse.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Apply `QUIZ_SUBMIT_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when an override cannot be parsed.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. Blank values are ignored.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEndpoint` or `ConfigError::InvalidTimeout`
    /// for unparseable values.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(raw) = var(ENV_SUBMIT_URL) {
            let endpoint = Url::parse(raw.trim())
                .map_err(|source| ConfigError::InvalidEndpoint { raw: raw.clone(), source })?;
            self.submission.endpoint = Some(endpoint);
        }
        if let Some(raw) = var(ENV_SUBMIT_TIMEOUT_SECS) {
            let secs = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| ConfigError::InvalidTimeout(raw.clone()))?;
            self.submission.timeout_secs = secs;
        }
        if let Some(key) = var(ENV_SUBMIT_API_KEY) {
            self.submission.api_key = Some(key);
        }
        Ok(self)
    }

    /// The explicit start step, or the first listed step.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Empty` when no steps are listed.
    pub fn start_step(&self) -> Result<StepId, GraphError> {
        self.start
            .or_else(|| self.steps.first().map(|s| s.id))
            .ok_or(GraphError::Empty)
    }

    /// Validate and build the step graph.
    ///
    /// # Errors
    ///
    /// Returns the first `GraphError` found.
    pub fn build_graph(&self) -> Result<StepGraph, GraphError> {
        StepGraph::new(self.steps.clone(), self.start_step()?)
    }

    /// Build the engine configuration, failing fast on a broken graph.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Graph` for graph defects and
    /// `ConfigError::InvalidTimeout` for a zero timeout.
    pub fn engine_config(&self, clock: Clock) -> Result<EngineConfig, ConfigError> {
        if self.submission.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("0".into()));
        }
        let graph = Arc::new(self.build_graph()?);
        Ok(EngineConfig {
            graph,
            validation: self.validation,
            submit_timeout: self.submission.timeout(),
            clock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const QUIZ: &str = r#"{
        "steps": [
            {
                "id": 1,
                "question": "What would you like to improve?",
                "kind": "choice",
                "field": "category",
                "options": [{"value": "face", "label": "Face"}],
                "next": {"fixed": 2}
            },
            {
                "id": 2,
                "question": "How can we reach you?",
                "kind": "form",
                "fields": [{"name": "phone", "type": "tel", "required": true}],
                "next": {"fixed": 3}
            },
            {"id": 3, "question": "Thank you!", "kind": "terminal"}
        ],
        "validation": {"min_phone_digits": 10},
        "submission": {"endpoint": "https://example.com/quiz"}
    }"#;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn parses_and_defaults() {
        let config = QuizConfig::from_json(QUIZ).unwrap();
        assert_eq!(config.start_step(), Ok(StepId::new(1)));
        assert_eq!(config.validation.min_phone_digits, 10);
        assert_eq!(config.submission.timeout_secs, 15);
        assert_eq!(
            config.submission.endpoint.as_ref().map(Url::as_str),
            Some("https://example.com/quiz")
        );
        let graph = config.build_graph().unwrap();
        assert_eq!(graph.steps().len(), 3);
    }

    #[test]
    fn overrides_replace_submission_settings() {
        let config = QuizConfig::from_json(QUIZ)
            .unwrap()
            .with_overrides(lookup(&[
                (ENV_SUBMIT_URL, "http://localhost:8080/leads"),
                (ENV_SUBMIT_TIMEOUT_SECS, "3"),
                (ENV_SUBMIT_API_KEY, "secret"),
            ]))
            .unwrap();
        assert_eq!(
            config.submission.endpoint.unwrap().as_str(),
            "http://localhost:8080/leads"
        );
        assert_eq!(config.submission.timeout_secs, 3);
        assert_eq!(config.submission.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn blank_overrides_are_ignored() {
        let config = QuizConfig::from_json(QUIZ)
            .unwrap()
            .with_overrides(lookup(&[(ENV_SUBMIT_URL, "  ")]))
            .unwrap();
        assert!(config.submission.endpoint.is_some());
    }

    #[test]
    fn bad_overrides_are_errors() {
        let err = QuizConfig::from_json(QUIZ)
            .unwrap()
            .with_overrides(lookup(&[(ENV_SUBMIT_TIMEOUT_SECS, "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimeout(_)));

        let err = QuizConfig::from_json(QUIZ)
            .unwrap()
            .with_overrides(lookup(&[(ENV_SUBMIT_URL, "not a url")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEndpoint { .. }));
    }

    #[test]
    fn broken_graph_fails_engine_config() {
        let raw = QUIZ.replace(r#""next": {"fixed": 3}"#, r#""next": {"fixed": 9}"#);
        let err = QuizConfig::from_json(&raw)
            .unwrap()
            .engine_config(Clock::system())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ConfigError::Graph(GraphError::DanglingTarget { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = QuizConfig::from_path("/nonexistent/quiz.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
