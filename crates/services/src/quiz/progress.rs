use quiz_core::StepGraph;
use quiz_core::model::QuizSession;

/// Aggregated view of quiz progress, useful for a progress bar.
///
/// `total` is estimated from the longest path through the graph and shrinks
/// to the actual path length once the quiz reaches a terminal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizProgress {
    pub total: usize,
    pub answered: usize,
    pub remaining: usize,
    pub is_complete: bool,
}

impl QuizProgress {
    pub(crate) fn of(session: &QuizSession, graph: &StepGraph) -> Self {
        // every step below the top of the history has been answered and left
        let answered = session.history().len() - 1;
        let is_complete = graph.is_terminal(session.current_step());
        let total = if is_complete {
            answered
        } else {
            graph.max_depth().max(answered + 1)
        };
        Self {
            total,
            answered,
            remaining: total - answered,
            is_complete,
        }
    }

    /// Completion in whole percent.
    #[must_use]
    pub fn percent(&self) -> u8 {
        if self.is_complete || self.total == 0 {
            return 100;
        }
        u8::try_from(self.answered * 100 / self.total).unwrap_or(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::{FieldDefinition, NextRule, OptionDefinition, QuizId, StepDefinition, StepId};
    use quiz_core::time::fixed_now;

    fn graph() -> StepGraph {
        StepGraph::new(
            vec![
                StepDefinition::choice(
                    StepId::new(1),
                    "Pick",
                    "category",
                    vec![OptionDefinition::new("a", "A")],
                )
                .with_next(NextRule::fixed(StepId::new(2))),
                StepDefinition::form(StepId::new(2), "Contact", vec![FieldDefinition::text("name")])
                    .with_next(NextRule::fixed(StepId::new(3))),
                StepDefinition::terminal(StepId::new(3), "Thanks"),
            ],
            StepId::new(1),
        )
        .unwrap()
    }

    #[test]
    fn progress_tracks_the_history() {
        let graph = graph();
        let mut session = QuizSession::new(QuizId::new(), StepId::new(1), fixed_now());

        let start = QuizProgress::of(&session, &graph);
        assert_eq!(
            start,
            QuizProgress {
                total: 2,
                answered: 0,
                remaining: 2,
                is_complete: false
            }
        );
        assert_eq!(start.percent(), 0);

        session.enter(StepId::new(2));
        assert_eq!(QuizProgress::of(&session, &graph).percent(), 50);

        session.enter(StepId::new(3));
        let done = QuizProgress::of(&session, &graph);
        assert!(done.is_complete);
        assert_eq!(done.remaining, 0);
        assert_eq!(done.percent(), 100);
    }
}
