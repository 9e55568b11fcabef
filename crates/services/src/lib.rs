#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod quiz;
pub mod submission;

pub use quiz_core::Clock;

pub use config::{QuizConfig, SubmissionConfig};
pub use error::{ConfigError, EngineError, SubmissionError};
pub use quiz::{EngineConfig, QuizEngine, QuizProgress, SessionSnapshot, Subscription};
pub use submission::{Ack, HttpSubmissionClient, SubmissionClient, SubmissionRequest};
