mod engine;
mod observer;
mod progress;

// Public API of the quiz subsystem.
pub use crate::error::EngineError;
pub use engine::{EngineConfig, QuizEngine};
pub use observer::{SessionSnapshot, Subscription};
pub use progress::QuizProgress;
