//! Error types for buffer placement.

use std::fmt;

use elastic_analysis::AnalysisError;
use elastic_core::GraphError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a placement could not be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfeasibilityKind {
    /// No assignment satisfies the constraints.
    Structural,
    /// The solver ran out of nodes or time before finding any assignment.
    Budget,
}

impl fmt::Display for InfeasibilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfeasibilityKind::Structural => write!(f, "structurally infeasible"),
            InfeasibilityKind::Budget => write!(f, "solve budget exceeded"),
        }
    }
}

/// Errors produced by the buffer placer and the manual override.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BufferError {
    #[error("buffer placement {kind}: {reason}")]
    Infeasible {
        kind: InfeasibilityKind,
        reason: String,
    },

    /// A bad reference or value in an externally supplied request.
    #[error("invalid buffer request: {0}")]
    Config(String),

    /// A placement that passed the solver fails re-analysis.
    #[error("placement verification failed: {0}")]
    Verification(String),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl BufferError {
    pub(crate) fn structural(reason: impl Into<String>) -> Self {
        BufferError::Infeasible {
            kind: InfeasibilityKind::Structural,
            reason: reason.into(),
        }
    }

    pub(crate) fn budget(reason: impl Into<String>) -> Self {
        BufferError::Infeasible {
            kind: InfeasibilityKind::Budget,
            reason: reason.into(),
        }
    }
}
