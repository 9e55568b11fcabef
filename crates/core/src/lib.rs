#![forbid(unsafe_code)]

pub mod graph;
pub mod model;
pub mod time;
pub mod validation;

pub use graph::{GraphError, StepGraph};
pub use time::Clock;
pub use validation::{FieldError, FieldErrorKind, ValidationSettings, Validator};
