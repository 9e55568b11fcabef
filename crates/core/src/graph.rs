use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::model::{Answers, NextRule, StepDefinition, StepId, StepKind};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// A misconfigured quiz graph, or a query it cannot answer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GraphError {
    #[error("quiz has no steps")]
    Empty,

    #[error("step {0} is defined more than once")]
    DuplicateStep(StepId),

    #[error("start step {0} is not defined")]
    UnknownStart(StepId),

    #[error("step {0} is not defined")]
    UnknownStep(StepId),

    #[error("choice step {0} has no options")]
    NoOptions(StepId),

    #[error("step {step} lists option `{value}` more than once")]
    DuplicateOption { step: StepId, value: String },

    #[error("step {step} declares field `{field}` more than once")]
    DuplicateField { step: StepId, field: String },

    #[error("step {0} has no next rule")]
    MissingNext(StepId),

    #[error("step {from} points at undefined step {to}")]
    DanglingTarget { from: StepId, to: StepId },

    #[error("branch on step {0} does not name a field to branch on")]
    BranchFieldMissing(StepId),

    #[error("option `{value}` on step {step} has no route and the branch has no default")]
    UncoveredOption { step: StepId, value: String },

    #[error("no route from step {step} for answer {value:?}")]
    UnresolvedBranch { step: StepId, value: Option<String> },

    #[error("step {0} is terminal")]
    TerminalStep(StepId),

    #[error("quiz has no terminal step")]
    NoTerminal,
}

//
// ─── GRAPH ─────────────────────────────────────────────────────────────────────
//

/// Validated, immutable quiz topology.
///
/// Construction checks every invariant up front, so a graph that exists can
/// always resolve the next step for any option a user can pick.
#[derive(Debug, Clone)]
pub struct StepGraph {
    steps: Vec<StepDefinition>,
    index: HashMap<StepId, usize>,
    start: StepId,
    depth: usize,
}

impl StepGraph {
    /// Build a graph from step definitions.
    ///
    /// # Errors
    ///
    /// Returns the first `GraphError` found while checking ids, options,
    /// fields and next rules.
    pub fn new(steps: Vec<StepDefinition>, start: StepId) -> Result<Self, GraphError> {
        if steps.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut index = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.id, i).is_some() {
                return Err(GraphError::DuplicateStep(step.id));
            }
        }
        if !index.contains_key(&start) {
            return Err(GraphError::UnknownStart(start));
        }
        if !steps.iter().any(StepDefinition::is_terminal) {
            return Err(GraphError::NoTerminal);
        }

        for step in &steps {
            check_step(step, &index)?;
        }

        let mut graph = Self {
            steps,
            index,
            start,
            depth: 0,
        };
        for step in &graph.steps {
            graph.check_coverage(step)?;
        }
        graph.depth = graph.longest_path(start, &mut HashSet::new());
        Ok(graph)
    }

    #[must_use]
    pub fn start(&self) -> StepId {
        self.start
    }

    #[must_use]
    pub fn step(&self, id: StepId) -> Option<&StepDefinition> {
        self.index.get(&id).map(|&i| &self.steps[i])
    }

    #[must_use]
    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    #[must_use]
    pub fn contains(&self, id: StepId) -> bool {
        self.index.contains_key(&id)
    }

    #[must_use]
    pub fn is_terminal(&self, id: StepId) -> bool {
        self.step(id).is_some_and(StepDefinition::is_terminal)
    }

    /// Number of non-terminal steps on the longest simple path from the start.
    ///
    /// Computed rules count as leaves, so this is an estimate for graphs that
    /// use them.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.depth
    }

    /// Resolve the step that follows `id` given the full answer set.
    ///
    /// # Errors
    ///
    /// `UnknownStep` if `id` is not defined, `TerminalStep` for terminal steps,
    /// `UnresolvedBranch` when a branch has no route for the answer and no
    /// default, and `DanglingTarget` when a computed rule returns an undefined
    /// step.
    pub fn resolve_next(&self, id: StepId, answers: &Answers) -> Result<StepId, GraphError> {
        let step = self.step(id).ok_or(GraphError::UnknownStep(id))?;
        if step.is_terminal() {
            return Err(GraphError::TerminalStep(id));
        }
        let rule = step.next.as_ref().ok_or(GraphError::MissingNext(id))?;

        let next = match rule {
            NextRule::Fixed(to) => *to,
            NextRule::Branch(branch) => {
                let field = branch
                    .on
                    .as_deref()
                    .or(step.choice_field())
                    .ok_or(GraphError::BranchFieldMissing(id))?;
                let value = answers.filled(field);
                branch
                    .route(value)
                    .ok_or_else(|| GraphError::UnresolvedBranch {
                        step: id,
                        value: value.map(str::to_owned),
                    })?
            }
            NextRule::Computed(computed) => computed.resolve(answers),
        };

        if !self.contains(next) {
            return Err(GraphError::DanglingTarget { from: id, to: next });
        }
        Ok(next)
    }

    /// True when `id` is a form step whose successor is terminal, i.e. the
    /// step that submits the quiz.
    ///
    /// # Errors
    ///
    /// Propagates `resolve_next` failures for form steps.
    pub fn is_final_form(&self, id: StepId, answers: &Answers) -> Result<bool, GraphError> {
        let step = self.step(id).ok_or(GraphError::UnknownStep(id))?;
        if !step.is_form() {
            return Ok(false);
        }
        let next = self.resolve_next(id, answers)?;
        Ok(self.is_terminal(next))
    }

    /// Steps that declare `field`, in definition order.
    #[must_use]
    pub fn owner_of(&self, field: &str) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|step| step.declared_fields().any(|name| name == field))
            .map(|step| step.id)
            .collect()
    }

    /// Every answer key declared by the given steps.
    #[must_use]
    pub fn declared_fields<'a>(&'a self, path: &[StepId]) -> HashSet<&'a str> {
        path.iter()
            .filter_map(|id| self.step(*id))
            .flat_map(StepDefinition::declared_fields)
            .collect()
    }

    fn longest_path(&self, id: StepId, on_path: &mut HashSet<StepId>) -> usize {
        let Some(step) = self.step(id) else {
            return 0;
        };
        if step.is_terminal() || !on_path.insert(id) {
            return 0;
        }
        let below = step
            .next
            .as_ref()
            .map(NextRule::static_targets)
            .unwrap_or_default()
            .into_iter()
            .map(|to| self.longest_path(to, on_path))
            .max()
            .unwrap_or(0);
        on_path.remove(&id);
        below + 1
    }

    /// A branch without a default must route every option of every choice
    /// step declaring the field it branches on, wherever that step sits.
    fn check_coverage(&self, step: &StepDefinition) -> Result<(), GraphError> {
        let Some(NextRule::Branch(branch)) = &step.next else {
            return Ok(());
        };
        if step.is_terminal() || branch.default.is_some() {
            return Ok(());
        }
        let Some(field) = branch.on.as_deref().or(step.choice_field()) else {
            return Ok(());
        };

        let uncovered = self
            .owner_of(field)
            .into_iter()
            .filter_map(|owner| self.step(owner))
            .flat_map(|owner| owner.options())
            .find(|option| !branch.routes.contains_key(&option.value));
        match uncovered {
            Some(option) => Err(GraphError::UncoveredOption {
                step: step.id,
                value: option.value.clone(),
            }),
            None => Ok(()),
        }
    }
}

fn check_step(step: &StepDefinition, index: &HashMap<StepId, usize>) -> Result<(), GraphError> {
    match &step.kind {
        StepKind::Choice { options, .. } => {
            if options.is_empty() {
                return Err(GraphError::NoOptions(step.id));
            }
            let mut seen = HashSet::new();
            for option in options {
                if !seen.insert(option.value.as_str()) {
                    return Err(GraphError::DuplicateOption {
                        step: step.id,
                        value: option.value.clone(),
                    });
                }
            }
        }
        StepKind::Form { fields } => {
            let mut seen = HashSet::new();
            for field in fields {
                if !seen.insert(field.name.as_str()) {
                    return Err(GraphError::DuplicateField {
                        step: step.id,
                        field: field.name.clone(),
                    });
                }
            }
        }
        StepKind::Terminal => return Ok(()),
    }

    let rule = step.next.as_ref().ok_or(GraphError::MissingNext(step.id))?;
    for to in rule.static_targets() {
        if !index.contains_key(&to) {
            return Err(GraphError::DanglingTarget { from: step.id, to });
        }
    }

    if let NextRule::Branch(branch) = rule {
        if branch.on.is_none() && step.choice_field().is_none() {
            return Err(GraphError::BranchFieldMissing(step.id));
        }
    }

    Ok(())
}
