//! Runtime error taxonomy.
//!
//! Every operation surfaces one of these variants; the HTTP layer maps them
//! onto status codes in one place.

use reverie_domain::ExecutionStatus;

use crate::infrastructure::ports::{GenError, RepoError};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("{entity_type} '{id}' not found")]
    NotFound { entity_type: &'static str, id: String },

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Choice '{choice_id}' is no longer available")]
    StaleChoice { choice_id: String },

    /// Every choice on the node was gated out and no default target exists.
    /// Carries the world's player-facing fallback line.
    #[error("No available choice")]
    NoAvailableChoice { fallback_line: String },

    #[error("Execution state is being resumed by another call")]
    ConcurrentResume,

    #[error("Call stack overflow at depth {depth}")]
    CallStackOverflow { depth: usize },

    #[error("Step budget of {budget} exhausted; program likely loops without suspending")]
    StepBudgetExhausted { budget: u32 },

    #[error("Operation not valid while execution is {status:?}")]
    WrongState { status: ExecutionStatus },

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl RuntimeError {
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }
}

impl From<GenError> for RuntimeError {
    fn from(err: GenError) -> Self {
        Self::Generation(err.to_string())
    }
}
