use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::graph::{GraphError, StepGraph};
use crate::model::{Answers, FieldDefinition, FieldType, StepDefinition, StepId, StepKind};

/// Lax address check: something, `@`, then a domain with at least one inner dot.
static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@.]+(\.[^\s@.]+)+$").expect("email pattern should compile")
});

/// Digits plus the usual formatting characters.
static PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9+\-(). ]+$").expect("phone pattern should compile"));

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FieldErrorKind {
    #[error("this field is required")]
    Required,

    #[error("enter a valid email address")]
    InvalidEmail,

    #[error("enter a phone number with at least {min_digits} digits")]
    InvalidPhone { min_digits: usize },

    #[error("choose one of the listed options")]
    InvalidChoice,

    /// Message returned by the submission endpoint.
    #[error("{0}")]
    Rejected(String),
}

/// A validation failure attached to one field.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{field}: {kind}")]
pub struct FieldError {
    pub field: String,
    pub kind: FieldErrorKind,
}

impl FieldError {
    #[must_use]
    pub fn new(field: impl Into<String>, kind: FieldErrorKind) -> Self {
        Self {
            field: field.into(),
            kind,
        }
    }
}

//
// ─── SETTINGS ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSettings {
    #[serde(default = "default_min_phone_digits")]
    pub min_phone_digits: usize,
}

fn default_min_phone_digits() -> usize {
    7
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            min_phone_digits: default_min_phone_digits(),
        }
    }
}

//
// ─── VALIDATOR ─────────────────────────────────────────────────────────────────
//

/// Stateless rule evaluation over a step graph.
#[derive(Debug, Clone)]
pub struct Validator {
    graph: Arc<StepGraph>,
    settings: ValidationSettings,
}

impl Validator {
    #[must_use]
    pub fn new(graph: Arc<StepGraph>, settings: ValidationSettings) -> Self {
        Self { graph, settings }
    }

    /// Validate the fields of `step` against `answers`.
    ///
    /// Errors come back in field declaration order; an empty list means the
    /// step may be left.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::UnknownStep` if `step` is not in the graph.
    pub fn validate_step(
        &self,
        step: StepId,
        answers: &Answers,
    ) -> Result<Vec<FieldError>, GraphError> {
        let definition = self.graph.step(step).ok_or(GraphError::UnknownStep(step))?;
        Ok(self.validate_definition(definition, answers))
    }

    #[must_use]
    pub fn validate_definition(&self, step: &StepDefinition, answers: &Answers) -> Vec<FieldError> {
        match &step.kind {
            StepKind::Choice { field, options } => {
                let kind = match answers.filled(field) {
                    None => Some(FieldErrorKind::Required),
                    Some(value) if !options.iter().any(|o| o.value == value) => {
                        Some(FieldErrorKind::InvalidChoice)
                    }
                    Some(_) => None,
                };
                kind.map(|k| FieldError::new(field.clone(), k))
                    .into_iter()
                    .collect()
            }
            StepKind::Form { fields } => fields
                .iter()
                .filter(|f| f.is_visible(answers))
                .filter_map(|f| {
                    self.check_field(f, answers.filled(&f.name))
                        .map(|kind| FieldError::new(f.name.clone(), kind))
                })
                .collect(),
            StepKind::Terminal => Vec::new(),
        }
    }

    fn check_field(&self, field: &FieldDefinition, value: Option<&str>) -> Option<FieldErrorKind> {
        let Some(value) = value else {
            return field.required.then_some(FieldErrorKind::Required);
        };
        match field.field_type {
            FieldType::Text => None,
            FieldType::Email => (!is_valid_email(value)).then_some(FieldErrorKind::InvalidEmail),
            FieldType::Tel => {
                let min_digits = self.settings.min_phone_digits;
                (!is_valid_phone(value, min_digits))
                    .then_some(FieldErrorKind::InvalidPhone { min_digits })
            }
        }
    }
}

#[must_use]
pub fn is_valid_email(value: &str) -> bool {
    EMAIL.is_match(value.trim())
}

#[must_use]
pub fn is_valid_phone(value: &str, min_digits: usize) -> bool {
    let value = value.trim();
    PHONE.is_match(value) && value.chars().filter(char::is_ascii_digit).count() >= min_digits
}
