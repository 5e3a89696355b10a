//! Error types for speculation planning and region annotation.

use elastic_core::GraphError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpeculationError {
    /// A position names an operation or port that does not exist.
    #[error("invalid position '{reference}': {reason}")]
    Config { reference: String, reason: String },

    /// The position list could not be parsed.
    #[error("malformed position list: {0}")]
    Malformed(String),

    /// No legal single-entry/single-exit region for this speculator.
    #[error("illegal speculative region at '{speculator}': {reason}")]
    Legality { speculator: String, reason: String },

    /// The annotator found a region the planner should have rejected.
    #[error("inconsistent speculative region of '{speculator}': {reason}")]
    Inconsistent { speculator: String, reason: String },

    #[error(transparent)]
    Graph(#[from] GraphError),
}
