use thiserror::Error;

use crate::types::Float;

/// Failures reported by the external kinematics/dynamics model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("singular configuration: {0}")]
    Singular(String),

    #[error("model evaluation failed: {0}")]
    Evaluation(String),
}

/// Failures reported by the external QP routine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QpError {
    #[error("infeasible: {0}")]
    Infeasible(String),

    #[error("numerical failure: {0}")]
    NumericalFailure(String),

    #[error("invalid problem setup: {0}")]
    Setup(String),
}

/// Top-level error type of the stack of tasks.
#[derive(Debug, Error)]
pub enum SotError {
    #[error("model evaluation failed for `{id}` at q = {q:?}: {source}")]
    ModelEvaluation {
        id: String,
        q: Vec<Float>,
        #[source]
        source: ModelError,
    },

    #[error("dimension mismatch in {context}: expected {expected:?}, got {got:?}")]
    DimensionMismatch {
        context: String,
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("QP infeasible at priority level {level} (`{id}`): {reason}")]
    SolveInfeasible {
        level: usize,
        id: String,
        reason: String,
    },

    #[error("QP numerical failure at priority level {level} (`{id}`): {reason}")]
    SolveNumericalFailure {
        level: usize,
        id: String,
        reason: String,
    },
}

impl SotError {
    pub fn model(id: &str, q: &na::DVector<Float>, source: ModelError) -> Self {
        SotError::ModelEvaluation {
            id: id.to_string(),
            q: q.iter().cloned().collect(),
            source,
        }
    }

    pub fn dimension(context: &str, expected: (usize, usize), got: (usize, usize)) -> Self {
        SotError::DimensionMismatch {
            context: context.to_string(),
            expected,
            got,
        }
    }

    /// Priority level the failure is tagged with, if it came from a cascade solve.
    pub fn level(&self) -> Option<usize> {
        match self {
            SotError::SolveInfeasible { level, .. }
            | SotError::SolveNumericalFailure { level, .. } => Some(*level),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SotError>;
