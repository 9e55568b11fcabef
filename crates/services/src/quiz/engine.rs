use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use quiz_core::model::{Answers, QuizId, QuizSession, SessionStatus, StepDefinition, StepId};
use quiz_core::{Clock, FieldError, FieldErrorKind, GraphError, StepGraph, ValidationSettings, Validator};

use super::observer::{Observers, SessionSnapshot, Subscription};
use super::progress::QuizProgress;
use crate::error::{EngineError, SubmissionError};
use crate::submission::{Ack, SubmissionClient, SubmissionRequest};

const INTERRUPTED: &str = "submission was interrupted";

/// Construction-time settings for a `QuizEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub graph: Arc<StepGraph>,
    pub validation: ValidationSettings,
    /// Upper bound on one submission attempt.
    pub submit_timeout: Duration,
    pub clock: Clock,
}

impl EngineConfig {
    #[must_use]
    pub fn new(
        graph: Arc<StepGraph>,
        validation: ValidationSettings,
        submit_timeout: Duration,
    ) -> Self {
        Self {
            graph,
            validation,
            submit_timeout,
            clock: Clock::system(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

type SubmitOutcome = Result<Ack, EngineError>;

struct EngineState {
    session: QuizSession,
    /// Present while a submission is awaiting the client.
    in_flight: Option<watch::Receiver<Option<SubmitOutcome>>>,
}

enum Begin {
    Join(watch::Receiver<Option<SubmitOutcome>>),
    Refused(EngineError, SessionSnapshot),
    Send {
        request: SubmissionRequest,
        terminal: StepId,
        tx: watch::Sender<Option<SubmitOutcome>>,
        snapshot: SessionSnapshot,
    },
}

//
// ─── ENGINE ────────────────────────────────────────────────────────────────────
//

/// State machine behind one rendered quiz.
///
/// Owns a single `QuizSession` and is the only thing that mutates it. Every
/// committed change is published to subscribers as a `SessionSnapshot`; the
/// engine itself renders nothing.
///
/// Methods take `&self` so the presentation layer can share the engine. The
/// session lock is never held across an await or while listeners run.
pub struct QuizEngine {
    graph: Arc<StepGraph>,
    validator: Validator,
    client: Arc<dyn SubmissionClient>,
    clock: Clock,
    submit_timeout: Duration,
    state: Mutex<EngineState>,
    observers: Arc<Observers>,
}

impl QuizEngine {
    #[must_use]
    pub fn new(config: EngineConfig, client: Arc<dyn SubmissionClient>) -> Self {
        let EngineConfig {
            graph,
            validation,
            submit_timeout,
            clock,
        } = config;
        let session = QuizSession::new(QuizId::new(), graph.start(), clock.now());
        debug!(quiz_id = %session.quiz_id(), step = %session.current_step(), "quiz session started");

        Self {
            validator: Validator::new(Arc::clone(&graph), validation),
            graph,
            client,
            clock,
            submit_timeout,
            state: Mutex::new(EngineState {
                session,
                in_flight: None,
            }),
            observers: Arc::new(Observers::default()),
        }
    }

    #[must_use]
    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    #[must_use]
    pub fn quiz_id(&self) -> QuizId {
        self.lock().session.quiz_id()
    }

    #[must_use]
    pub fn current_step(&self) -> StepId {
        self.lock().session.current_step()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.lock().session.status()
    }

    /// A copy of the current session.
    #[must_use]
    pub fn session(&self) -> QuizSession {
        self.lock().session.clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        self.snapshot_of(&state.session)
    }

    /// Register a listener for committed changes.
    pub fn subscribe(
        &self,
        listener: impl Fn(&SessionSnapshot) + Send + Sync + 'static,
    ) -> Subscription {
        self.observers.subscribe(Arc::new(listener))
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.observers.len()
    }

    /// Merge an answer for the active step.
    ///
    /// On a choice step this also advances, so a single click commits the
    /// selection. Returns the step that is active afterwards.
    ///
    /// # Errors
    ///
    /// `StaleStep` if `step` is not the active step, `Busy` while submitting,
    /// `Finished` after submission, and any `advance` error for choice steps.
    pub fn record_answer(
        &self,
        step: StepId,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<StepId, EngineError> {
        let (result, snapshot) = {
            let mut state = self.lock();
            let session = &mut state.session;
            ensure_idle(session)?;
            let current = session.current_step();
            if current != step {
                return Err(EngineError::StaleStep {
                    expected: current,
                    got: step,
                });
            }

            let field = field.into();
            debug!(quiz_id = %session.quiz_id(), %step, %field, "answer recorded");
            session.record(field, value);

            let result = if self.graph.step(step).is_some_and(StepDefinition::is_choice) {
                self.advance_session(session)
            } else {
                Ok(step)
            };
            (result, self.snapshot_of(session))
        };
        self.observers.notify(&snapshot);
        result
    }

    /// Validate the active step and move to the next one.
    ///
    /// # Errors
    ///
    /// `Invalid` with the field errors when validation fails (the step does
    /// not change), `SubmissionRequired` on the final form step, `Busy` while
    /// submitting, `Finished` on a terminal step, `Graph` when no route exists.
    pub fn advance(&self) -> Result<StepId, EngineError> {
        let (result, snapshot) = {
            let mut state = self.lock();
            ensure_idle(&state.session)?;
            let result = self.advance_session(&mut state.session);
            (result, self.snapshot_of(&state.session))
        };
        self.observers.notify(&snapshot);
        result
    }

    /// Return to the previous step. Answers are kept for when the user comes
    /// back.
    ///
    /// Returns the new active step, or `None` when there is nowhere to go
    /// back to or the session is submitting or submitted.
    pub fn back(&self) -> Option<StepId> {
        let (step, snapshot) = {
            let mut state = self.lock();
            let session = &mut state.session;
            if ensure_idle(session).is_err() {
                return None;
            }
            let step = session.step_back()?;
            session.clear_errors();
            session.set_status(SessionStatus::InProgress);
            debug!(quiz_id = %session.quiz_id(), %step, "stepped back");
            (step, self.snapshot_of(session))
        };
        self.observers.notify(&snapshot);
        Some(step)
    }

    /// Replace the session with a fresh one ("take the quiz again").
    ///
    /// # Errors
    ///
    /// Returns `Busy` while a submission is in flight.
    pub fn reset(&self) -> Result<QuizId, EngineError> {
        let (quiz_id, snapshot) = {
            let mut state = self.lock();
            if state.session.status().is_busy() {
                return Err(EngineError::Busy);
            }
            let previous = state.session.quiz_id();
            state.session = QuizSession::new(QuizId::new(), self.graph.start(), self.clock.now());
            let quiz_id = state.session.quiz_id();
            debug!(%previous, %quiz_id, "quiz reset");
            (quiz_id, self.snapshot_of(&state.session))
        };
        self.observers.notify(&snapshot);
        Ok(quiz_id)
    }

    /// Submit the quiz from its final form step.
    ///
    /// Calls made while a submission is already in flight do not reach the
    /// client again; they wait for and return the in-flight result. After a
    /// failure the session keeps every answer and `submit` may be retried.
    ///
    /// # Errors
    ///
    /// `NotFinalStep` outside the final form step, `Invalid` when its fields
    /// fail validation, `Finished` once submitted, and `Submission` when the
    /// client fails or does not answer within the configured timeout.
    pub async fn submit(&self) -> Result<Ack, EngineError> {
        let begun = {
            let mut state = self.lock();
            if let Some(in_flight) = state.in_flight.clone() {
                Begin::Join(in_flight)
            } else {
                let result = self.begin_submit(&mut state.session);
                let snapshot = self.snapshot_of(&state.session);
                match result {
                    Ok((request, terminal)) => {
                        let (tx, rx) = watch::channel(None);
                        state.in_flight = Some(rx);
                        Begin::Send {
                            request,
                            terminal,
                            tx,
                            snapshot,
                        }
                    }
                    Err(err) => Begin::Refused(err, snapshot),
                }
            }
        };

        let (request, terminal, tx) = match begun {
            Begin::Join(rx) => return join_in_flight(rx).await,
            Begin::Refused(err, snapshot) => {
                // only validation and graph failures leave new errors behind
                if matches!(err, EngineError::Invalid(_) | EngineError::Graph(_)) {
                    self.observers.notify(&snapshot);
                }
                return Err(err);
            }
            Begin::Send {
                request,
                terminal,
                tx,
                snapshot,
            } => {
                self.observers.notify(&snapshot);
                (request, terminal, tx)
            }
        };

        let mut guard = InFlightGuard {
            engine: self,
            done: false,
        };
        info!(quiz_id = %request.quiz_id, answers = request.answers.len(), "submitting quiz");

        let result =
            match tokio::time::timeout(self.submit_timeout, self.client.submit(&request)).await {
                Ok(result) => result,
                Err(_) => {
                    let timeout = self.submit_timeout;
                    warn!(quiz_id = %request.quiz_id, ?timeout, "submission timed out");
                    Err(SubmissionError::Network(format!(
                        "no response within {timeout:?}"
                    )))
                }
            };

        let (outcome, snapshot) = {
            let mut state = self.lock();
            state.in_flight = None;
            let outcome = self.finish_submit(&mut state.session, terminal, result);
            (outcome, self.snapshot_of(&state.session))
        };
        guard.done = true;

        tx.send_replace(Some(outcome.clone()));
        self.observers.notify(&snapshot);
        outcome
    }

    //
    // ─── INTERNALS ─────────────────────────────────────────────────────────────
    //

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot_of(&self, session: &QuizSession) -> SessionSnapshot {
        let status = session.status();
        SessionSnapshot {
            quiz_id: session.quiz_id(),
            current_step: session.current_step(),
            answers: self.path_answers(session),
            status,
            errors: session.errors().clone(),
            progress: QuizProgress::of(session, &self.graph),
            can_go_back: session.can_go_back() && !status.is_busy() && !status.is_finished(),
        }
    }

    fn advance_session(&self, session: &mut QuizSession) -> Result<StepId, EngineError> {
        let current = session.current_step();
        if self.graph.is_terminal(current) {
            return Err(EngineError::Finished);
        }

        let answers = self.path_answers(session);
        let errors = self.validate(session, &answers)?;
        if !errors.is_empty() {
            debug!(quiz_id = %session.quiz_id(), step = %current, count = errors.len(), "step rejected by validation");
            session.set_field_errors(errors.clone());
            return Err(EngineError::Invalid(errors));
        }

        // errors from a failed submission stay visible until the retry
        if self.is_final_form(session, &answers)? {
            return Err(EngineError::SubmissionRequired);
        }
        let next = self.resolve_next(session, &answers)?;
        session.clear_errors();
        session.enter(next);
        debug!(quiz_id = %session.quiz_id(), from = %current, to = %next, "advanced");
        Ok(next)
    }

    fn begin_submit(
        &self,
        session: &mut QuizSession,
    ) -> Result<(SubmissionRequest, StepId), EngineError> {
        if session.status().is_finished() {
            return Err(EngineError::Finished);
        }
        let current = session.current_step();
        if !self.graph.step(current).is_some_and(StepDefinition::is_form) {
            return Err(EngineError::NotFinalStep(current));
        }

        let answers = self.path_answers(session);
        let errors = self.validate(session, &answers)?;
        if !errors.is_empty() {
            debug!(quiz_id = %session.quiz_id(), step = %current, count = errors.len(), "submission blocked by validation");
            session.set_field_errors(errors.clone());
            return Err(EngineError::Invalid(errors));
        }
        if !self.is_final_form(session, &answers)? {
            return Err(EngineError::NotFinalStep(current));
        }

        let terminal = self.resolve_next(session, &answers)?;
        session.clear_errors();
        session.set_status(SessionStatus::Submitting);
        let request = SubmissionRequest {
            quiz_id: session.quiz_id(),
            answers,
            submitted_at: self.clock.now(),
        };
        Ok((request, terminal))
    }

    fn finish_submit(
        &self,
        session: &mut QuizSession,
        terminal: StepId,
        result: Result<Ack, SubmissionError>,
    ) -> SubmitOutcome {
        match result {
            Ok(ack) => {
                session.set_status(SessionStatus::Submitted);
                session.clear_errors();
                session.enter(terminal);
                info!(quiz_id = %ack.quiz_id, "quiz submitted");
                Ok(ack)
            }
            Err(err) => {
                warn!(quiz_id = %session.quiz_id(), error = %err, retryable = err.is_retryable(), "submission failed");
                session.set_status(SessionStatus::Failed);
                session.set_banner(Some(err.to_string()));
                if let SubmissionError::Rejected { field_errors } = &err {
                    session.set_field_errors(
                        field_errors
                            .iter()
                            .map(|(field, message)| {
                                FieldError::new(field.clone(), FieldErrorKind::Rejected(message.clone()))
                            })
                            .collect(),
                    );
                }
                Err(EngineError::Submission(err))
            }
        }
    }

    /// Validation errors for the active step. Graph failures land in the banner.
    fn validate(
        &self,
        session: &mut QuizSession,
        answers: &Answers,
    ) -> Result<Vec<FieldError>, EngineError> {
        self.validator
            .validate_step(session.current_step(), answers)
            .map_err(|err| graph_failure(session, err))
    }

    fn resolve_next(
        &self,
        session: &mut QuizSession,
        answers: &Answers,
    ) -> Result<StepId, EngineError> {
        self.graph
            .resolve_next(session.current_step(), answers)
            .map_err(|err| graph_failure(session, err))
    }

    fn is_final_form(
        &self,
        session: &mut QuizSession,
        answers: &Answers,
    ) -> Result<bool, EngineError> {
        self.graph
            .is_final_form(session.current_step(), answers)
            .map_err(|err| graph_failure(session, err))
    }

    /// Answers for fields declared on the visited path only. Values left on an
    /// abandoned branch take no part in validation, routing or the payload.
    fn path_answers(&self, session: &QuizSession) -> Answers {
        let declared = self.graph.declared_fields(session.history());
        session.answers().filtered(|name| declared.contains(name))
    }
}

fn graph_failure(session: &mut QuizSession, err: GraphError) -> EngineError {
    warn!(quiz_id = %session.quiz_id(), step = %session.current_step(), error = %err, "quiz graph could not route");
    session.set_banner(Some(err.to_string()));
    err.into()
}

fn ensure_idle(session: &QuizSession) -> Result<(), EngineError> {
    match session.status() {
        SessionStatus::Submitting => Err(EngineError::Busy),
        SessionStatus::Submitted => Err(EngineError::Finished),
        SessionStatus::InProgress | SessionStatus::Failed => Ok(()),
    }
}

async fn join_in_flight(mut rx: watch::Receiver<Option<SubmitOutcome>>) -> SubmitOutcome {
    debug!("joining in-flight submission");
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome).clone().unwrap_or(Err(EngineError::Busy)),
        Err(_) => Err(EngineError::Submission(SubmissionError::Unknown(
            INTERRUPTED.into(),
        ))),
    }
}

/// Marks the session failed if a submission future is dropped before the
/// client answers.
struct InFlightGuard<'a> {
    engine: &'a QuizEngine,
    done: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let snapshot = {
            let mut state = self.engine.lock();
            state.in_flight = None;
            state.session.set_status(SessionStatus::Failed);
            state.session.set_banner(Some(INTERRUPTED.into()));
            self.engine.snapshot_of(&state.session)
        };
        warn!(quiz_id = %snapshot.quiz_id, "submission dropped before completion");
        self.engine.observers.notify(&snapshot);
    }
}
