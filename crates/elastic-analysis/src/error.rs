//! Error types for the cycle and timing analyzer.

use elastic_core::GraphError;
use thiserror::Error;

/// Errors produced while analyzing a circuit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// The timing configuration is unusable.
    #[error("invalid timing configuration: {0}")]
    InvalidConfig(String),

    /// Elementary cycle enumeration hit the configured cap.
    #[error("circuit has more than {cap} elementary cycles (raise max_cycles)")]
    TooManyCycles { cap: usize },

    /// The input graph violates a structural invariant.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl AnalysisError {
    /// Returns `true` for errors caused by configuration values rather than
    /// by the circuit itself.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            AnalysisError::InvalidConfig(_) | AnalysisError::TooManyCycles { .. }
        )
    }
}
