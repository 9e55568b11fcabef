use chrono::{DateTime, Utc};

use crate::model::{Answers, QuizId, StepId};
use crate::validation::FieldError;

/// Lifecycle of a quiz session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionStatus {
    #[default]
    InProgress,
    Submitting,
    Submitted,
    Failed,
}

impl SessionStatus {
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(self, SessionStatus::Submitting)
    }

    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, SessionStatus::Submitted)
    }
}

/// Errors the presentation layer should currently show.
///
/// Field errors render inline; the banner carries a single non-field message
/// such as a failed submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionErrors {
    pub fields: Vec<FieldError>,
    pub banner: Option<String>,
}

impl SessionErrors {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.banner.is_none()
    }

    /// First error recorded for `field`, if any.
    #[must_use]
    pub fn for_field(&self, field: &str) -> Option<&FieldError> {
        self.fields.iter().find(|e| e.field == field)
    }
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// Mutable state of one rendered quiz.
///
/// `history` is a stack of visited steps whose top is always the current
/// step. Answers survive back-navigation so revisited steps resume where the
/// user left off.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizSession {
    quiz_id: QuizId,
    answers: Answers,
    history: Vec<StepId>,
    status: SessionStatus,
    errors: SessionErrors,
    started_at: DateTime<Utc>,
}

impl QuizSession {
    /// Start a session at `start` with no answers.
    #[must_use]
    pub fn new(quiz_id: QuizId, start: StepId, started_at: DateTime<Utc>) -> Self {
        Self {
            quiz_id,
            answers: Answers::new(),
            history: vec![start],
            status: SessionStatus::InProgress,
            errors: SessionErrors::default(),
            started_at,
        }
    }

    #[must_use]
    pub fn quiz_id(&self) -> QuizId {
        self.quiz_id
    }

    #[must_use]
    pub fn current_step(&self) -> StepId {
        // history is never empty: `new` seeds it and `step_back` keeps one entry
        self.history[self.history.len() - 1]
    }

    #[must_use]
    pub fn answers(&self) -> &Answers {
        &self.answers
    }

    #[must_use]
    pub fn history(&self) -> &[StepId] {
        &self.history
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn errors(&self) -> &SessionErrors {
        &self.errors
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn can_go_back(&self) -> bool {
        self.history.len() > 1
    }

    /// Merge an answer and drop any error previously shown for that field.
    ///
    /// Editing after a failed submission puts the session back in
    /// `InProgress`; the failure banner stays until the next successful
    /// transition or submission.
    pub fn record(&mut self, field: impl Into<String>, value: impl Into<String>) {
        let field = field.into();
        self.errors.fields.retain(|e| e.field != field);
        self.answers.set(field, value);
        if self.status == SessionStatus::Failed {
            self.status = SessionStatus::InProgress;
        }
    }

    /// Commit a forward transition.
    pub fn enter(&mut self, step: StepId) {
        self.history.push(step);
    }

    /// Pop the current step. Returns the new current step, or `None` when
    /// already at the first step.
    pub fn step_back(&mut self) -> Option<StepId> {
        if !self.can_go_back() {
            return None;
        }
        self.history.pop();
        Some(self.current_step())
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    pub fn set_field_errors(&mut self, fields: Vec<FieldError>) {
        self.errors.fields = fields;
    }

    pub fn set_banner(&mut self, banner: Option<String>) {
        self.errors.banner = banner;
    }

    pub fn clear_errors(&mut self) {
        self.errors = SessionErrors::default();
    }
}
