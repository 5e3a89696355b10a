//! Pipeline error type and the error taxonomy every failure maps into.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use elastic_analysis::AnalysisError;
use elastic_buffers::{BufferError, InfeasibilityKind};
use elastic_core::GraphError;
use elastic_speculation::SpeculationError;

/// Classification of a failure, independent of the pass that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Structural,
    Configuration,
    Infeasibility(InfeasibilityKind),
    RegionLegality,
    InternalConsistency,
}

impl ErrorKind {
    /// Process exit code reported by the CLI.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Structural => 1,
            ErrorKind::Configuration => 2,
            ErrorKind::Infeasibility(_) => 3,
            ErrorKind::RegionLegality => 4,
            ErrorKind::InternalConsistency => 5,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Structural => write!(f, "structural error"),
            ErrorKind::Configuration => write!(f, "configuration error"),
            ErrorKind::Infeasibility(kind) => write!(f, "infeasible ({})", kind),
            ErrorKind::RegionLegality => write!(f, "region legality error"),
            ErrorKind::InternalConsistency => write!(f, "internal consistency error"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Buffers(#[from] BufferError),

    #[error(transparent)]
    Speculation(#[from] SpeculationError),

    /// The graph file does not describe a circuit.
    #[error("malformed circuit graph in {path}: {reason}")]
    GraphFormat { path: PathBuf, reason: String },

    /// The options file could not be parsed.
    #[error("malformed options in {path}: {reason}")]
    OptionsFormat { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Graph(_) | PipelineError::GraphFormat { .. } => ErrorKind::Structural,
            PipelineError::Analysis(e) => analysis_kind(e),
            PipelineError::Buffers(e) => match e {
                BufferError::Infeasible { kind, .. } => ErrorKind::Infeasibility(*kind),
                BufferError::Config(_) => ErrorKind::Configuration,
                BufferError::Verification(_) => ErrorKind::InternalConsistency,
                BufferError::Analysis(e) => analysis_kind(e),
                BufferError::Graph(_) => ErrorKind::Structural,
            },
            PipelineError::Speculation(e) => match e {
                SpeculationError::Config { .. } | SpeculationError::Malformed(_) => {
                    ErrorKind::Configuration
                }
                SpeculationError::Legality { .. } => ErrorKind::RegionLegality,
                SpeculationError::Inconsistent { .. } => ErrorKind::InternalConsistency,
                SpeculationError::Graph(_) => ErrorKind::Structural,
            },
            PipelineError::OptionsFormat { .. } | PipelineError::Io { .. } => {
                ErrorKind::Configuration
            }
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }
}

fn analysis_kind(e: &AnalysisError) -> ErrorKind {
    if e.is_config() {
        ErrorKind::Configuration
    } else {
        ErrorKind::Structural
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elastic_core::OpId;

    #[test]
    fn every_source_maps_to_a_kind() {
        let graph: PipelineError = GraphError::OpNotFound { id: OpId(3) }.into();
        assert_eq!(graph.kind(), ErrorKind::Structural);

        let config: PipelineError = AnalysisError::InvalidConfig("period".into()).into();
        assert_eq!(config.exit_code(), 2);

        let budget: PipelineError = BufferError::Infeasible {
            kind: InfeasibilityKind::Budget,
            reason: "nodes".into(),
        }
        .into();
        assert_eq!(budget.kind(), ErrorKind::Infeasibility(InfeasibilityKind::Budget));
        assert_eq!(budget.exit_code(), 3);

        let legality: PipelineError = SpeculationError::Legality {
            speculator: "x:0".into(),
            reason: "no commit position".into(),
        }
        .into();
        assert_eq!(legality.exit_code(), 4);

        let inconsistent: PipelineError = BufferError::Verification("loop".into()).into();
        assert_eq!(inconsistent.exit_code(), 5);
    }

    #[test]
    fn nested_analysis_errors_keep_their_kind() {
        let err: PipelineError = BufferError::Analysis(AnalysisError::TooManyCycles { cap: 4 }).into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        let err: PipelineError =
            BufferError::Analysis(AnalysisError::Graph(GraphError::OpNotFound { id: OpId(0) }))
                .into();
        assert_eq!(err.kind(), ErrorKind::Structural);
    }
}
