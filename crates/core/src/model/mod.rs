mod answers;
mod ids;
mod predicate;
mod session;
mod step;

pub use answers::Answers;
pub use ids::{QuizId, StepId};
pub use predicate::Predicate;
pub use session::{QuizSession, SessionErrors, SessionStatus};
pub use step::{
    BranchRule, ComputedRule, FieldDefinition, FieldType, NextRule, OptionDefinition,
    StepDefinition, StepKind,
};
