use kestrel_smt::solver::SolverError;
use thiserror::Error;

use crate::reached::LocationId;

/// Failures of a BMC / k-induction run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Solver error: {0}")]
    Solver(SolverError),
    #[error("Transfer error at {location}: {message}")]
    Transfer {
        location: LocationId,
        message: String,
    },
    #[error("Interrupted: {0}")]
    Interrupted(String),
    #[error("Invariant generation failed: {0}")]
    InvariantGeneration(String),
    #[error("Analysis error: {0}")]
    Analysis(String),
}

impl EngineError {
    pub fn transfer(location: LocationId, message: impl Into<String>) -> Self {
        EngineError::Transfer {
            location,
            message: message.into(),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, EngineError::Interrupted(_))
    }
}

impl From<SolverError> for EngineError {
    fn from(err: SolverError) -> Self {
        match err {
            SolverError::Interrupted(reason) => EngineError::Interrupted(reason),
            other => EngineError::Solver(other),
        }
    }
}
