use std::error::Error;
use std::io::{self, Write};

use quiz_core::GraphError;
use quiz_core::model::{FieldDefinition, OptionDefinition, StepDefinition, StepKind};
use services::{EngineError, QuizEngine};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Back,
    Reset,
    Quit,
    Answer(String),
}

impl Input {
    fn parse(line: &str) -> Self {
        match line.trim() {
            "back" | ":b" => Self::Back,
            "reset" => Self::Reset,
            "quit" | "exit" | ":q" => Self::Quit,
            other => Self::Answer(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// How a terminal session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A terminal step was reached.
    Completed,
    /// The user quit or input ran out.
    Quit,
}

/// Drives a `QuizEngine` from line-based input.
///
/// Choice steps take an option number or value. Form steps prompt for each
/// visible field in turn; an empty line keeps the previous value.
pub struct Runner<'a, R, W> {
    engine: &'a QuizEngine,
    lines: Lines<R>,
    out: W,
}

impl<'a, R, W> Runner<'a, R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(engine: &'a QuizEngine, input: R, out: W) -> Self {
        Self {
            engine,
            lines: input.lines(),
            out,
        }
    }

    pub async fn run(mut self) -> Result<Outcome, Box<dyn Error>> {
        let engine = self.engine;
        loop {
            let snapshot = engine.snapshot();
            let step = engine
                .graph()
                .step(snapshot.current_step)
                .ok_or(GraphError::UnknownStep(snapshot.current_step))?;

            if step.is_terminal() {
                writeln!(self.out, "\n{}", step.question)?;
                return Ok(Outcome::Completed);
            }

            let progress = snapshot.progress;
            writeln!(
                self.out,
                "\n[{}/{}] {}",
                progress.answered + 1,
                progress.total,
                step.question
            )?;

            let flow = match &step.kind {
                StepKind::Choice { field, options } => self.choice(step, field, options).await?,
                StepKind::Form { fields } => self.form(step, fields).await?,
                StepKind::Terminal => Flow::Continue,
            };
            if flow == Flow::Quit {
                return Ok(Outcome::Quit);
            }
        }
    }

    async fn choice(
        &mut self,
        step: &StepDefinition,
        field: &str,
        options: &[OptionDefinition],
    ) -> Result<Flow, Box<dyn Error>> {
        for (i, option) in options.iter().enumerate() {
            writeln!(self.out, "  {}) {}", i + 1, option.label)?;
        }
        let answer = match self.read("> ").await? {
            Some(Input::Answer(answer)) => answer,
            Some(command) => return Ok(self.command(command)?),
            None => return Ok(Flow::Quit),
        };

        let value = answer
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| options.get(i))
            .map_or(answer.clone(), |option| option.value.clone());
        if let Err(err) = self.engine.record_answer(step.id, field, value) {
            self.report(&err)?;
        }
        Ok(Flow::Continue)
    }

    async fn form(
        &mut self,
        step: &StepDefinition,
        fields: &[FieldDefinition],
    ) -> Result<Flow, Box<dyn Error>> {
        for field in fields {
            // visibility can depend on the field just entered
            let answers = self.engine.snapshot().answers;
            if !field.is_visible(&answers) {
                continue;
            }
            let prompt = match answers.filled(&field.name) {
                Some(current) => format!("{} [{current}]: ", field.display_label()),
                None => format!("{}: ", field.display_label()),
            };
            match self.read(&prompt).await? {
                Some(Input::Answer(value)) if value.is_empty() => {}
                Some(Input::Answer(value)) => {
                    if let Err(err) = self.engine.record_answer(step.id, field.name.clone(), value) {
                        self.report(&err)?;
                    }
                }
                Some(command) => return Ok(self.command(command)?),
                None => return Ok(Flow::Quit),
            }
        }

        let result = match self.engine.advance() {
            Err(EngineError::SubmissionRequired) => {
                writeln!(self.out, "Submitting...")?;
                self.engine.submit().await.map(|_| step.id)
            }
            other => other,
        };
        if let Err(err) = result {
            self.report(&err)?;
        }
        Ok(Flow::Continue)
    }

    fn command(&mut self, input: Input) -> io::Result<Flow> {
        match input {
            Input::Back => {
                if self.engine.back().is_none() {
                    writeln!(self.out, "  (nothing to go back to)")?;
                }
            }
            Input::Reset => {
                if let Err(err) = self.engine.reset() {
                    self.report(&err)?;
                }
            }
            Input::Quit => return Ok(Flow::Quit),
            Input::Answer(_) => {}
        }
        Ok(Flow::Continue)
    }

    /// Prints the session's error state, falling back to the error itself
    /// for failures that leave the session untouched.
    fn report(&mut self, err: &EngineError) -> io::Result<()> {
        let errors = self.engine.snapshot().errors;
        if errors.is_empty() {
            return writeln!(self.out, "  ! {err}");
        }
        if let Some(banner) = &errors.banner {
            writeln!(self.out, "  ! {banner}")?;
        }
        for error in &errors.fields {
            writeln!(self.out, "  ! {}: {}", error.field, error.kind)?;
        }
        Ok(())
    }

    async fn read(&mut self, prompt: &str) -> io::Result<Option<Input>> {
        write!(self.out, "{prompt}")?;
        self.out.flush()?;
        Ok(self
            .lines
            .next_line()
            .await?
            .map(|line| Input::parse(&line)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use quiz_core::model::SessionStatus;
    use quiz_core::time::fixed_now;
    use services::{Clock, QuizConfig};

    use crate::dry_run::DryRunClient;

    const QUIZ: &str = include_str!("../quizzes/treatment_finder.json");

    fn engine() -> (QuizEngine, Arc<DryRunClient>) {
        let config = QuizConfig::from_json(QUIZ)
            .unwrap()
            .engine_config(Clock::fixed(fixed_now()))
            .unwrap();
        let client = Arc::new(DryRunClient::default());
        (QuizEngine::new(config, client.clone()), client)
    }

    async fn drive(engine: &QuizEngine, script: &str) -> (Outcome, String) {
        let mut out = Vec::new();
        let outcome = Runner::new(engine, script.as_bytes(), &mut out)
            .run()
            .await
            .unwrap();
        (outcome, String::from_utf8(out).unwrap())
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Input::parse(" back "), Input::Back);
        assert_eq!(Input::parse(":q"), Input::Quit);
        assert_eq!(Input::parse("reset"), Input::Reset);
        assert_eq!(Input::parse("2"), Input::Answer("2".into()));
    }

    #[tokio::test]
    async fn completes_the_treatment_finder() {
        let (engine, client) = engine();
        let (outcome, out) = drive(&engine, "1\n3\n2\nJane\njane@x.com\n\n").await;

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(engine.status(), SessionStatus::Submitted);
        assert_eq!(client.accepted(), 1);
        assert!(out.contains("Thank you!"));

        let answers = engine.session().answers().clone();
        assert_eq!(answers.get("category"), Some("face"));
        assert_eq!(answers.get("area"), Some("lips"));
        assert_eq!(answers.get("age"), Some("30-44"));
    }

    #[tokio::test]
    async fn shows_errors_and_reprompts() {
        let (engine, client) = engine();
        let (outcome, out) =
            drive(&engine, "skin\nacne\n60+\n\nJane\nnot-an-email\n\n\njane@x.com\n12\n\n\n555 010 1234\n").await;

        assert!(out.contains("this field is required"), "{out}");
        assert!(out.contains("enter a valid email address"), "{out}");
        assert!(out.contains("enter a phone number with at least 7 digits"), "{out}");
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(client.accepted(), 1);
    }

    #[tokio::test]
    async fn back_and_quit() {
        let (engine, client) = engine();
        let (outcome, out) = drive(&engine, "back\n2\nback\n1\nquit\n").await;

        assert!(out.contains("nothing to go back to"));
        assert!(out.contains("Which area of your face?"));
        assert_eq!(outcome, Outcome::Quit);
        assert_eq!(engine.session().answers().get("category"), Some("face"));
        assert_eq!(client.accepted(), 0);
    }

    #[tokio::test]
    async fn end_of_input_quits() {
        let (engine, _client) = engine();
        let (outcome, _) = drive(&engine, "1\n").await;
        assert_eq!(outcome, Outcome::Quit);
        assert_eq!(engine.current_step(), quiz_core::model::StepId::new(2));
    }
}
