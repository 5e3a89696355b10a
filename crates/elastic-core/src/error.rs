//! Core error types for elastic-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering every
//! way a graph mutation or query can violate the circuit invariants. All of
//! them describe structural problems; callers that resolve user-supplied
//! references translate the not-found variants into configuration errors.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{BlockId, ChannelId, OpId};
use crate::types::DataType;

/// Which side of an operation a port lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::Input => write!(f, "input"),
            PortDirection::Output => write!(f, "output"),
        }
    }
}

/// Errors produced by the circuit graph model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// An operation index was not found in the graph.
    #[error("operation not found: OpId({id})", id = id.0)]
    OpNotFound { id: OpId },

    /// A channel index was not found in the graph.
    #[error("channel not found: ChannelId({id})", id = id.0)]
    ChannelNotFound { id: ChannelId },

    /// A basic block was not found in the block table.
    #[error("basic block not found: BlockId({id})", id = id.0)]
    BlockNotFound { id: BlockId },

    /// Operation names must be unique within a graph.
    #[error("duplicate operation name: '{name}'")]
    DuplicateName { name: String },

    /// A port index beyond the operation's arity.
    #[error("operation '{op}' has no {direction} port {port} (arity {arity})")]
    PortOutOfRange {
        op: String,
        port: u16,
        direction: PortDirection,
        arity: usize,
    },

    /// A port already driven by (or driving) another channel.
    #[error("{direction} port {port} of operation '{op}' is already connected")]
    PortAlreadyConnected {
        op: String,
        port: u16,
        direction: PortDirection,
    },

    /// A port left without a channel.
    #[error("{direction} port {port} of operation '{op}' is dangling")]
    DanglingPort {
        op: String,
        port: u16,
        direction: PortDirection,
    },

    /// A channel type that differs from the port type it attaches to.
    #[error("type mismatch on {direction} port {port} of '{op}': expected {expected}, got {actual}")]
    TypeMismatch {
        op: String,
        port: u16,
        direction: PortDirection,
        expected: DataType,
        actual: DataType,
    },

    /// A sized-operation-with-single-type invariant was violated.
    #[error("SOST violation on '{op}': {reason}")]
    SostViolation { op: String, reason: String },

    /// Declared port lists disagree with the kind's arity.
    #[error("arity mismatch on '{op}': {reason}")]
    InvalidArity { op: String, reason: String },

    /// Splice and removal only accept single-input single-output operations.
    #[error("operation '{op}' is not a single-input single-output passthrough")]
    NotPassthrough { op: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_operation() {
        let err = GraphError::PortOutOfRange {
            op: "fork0".into(),
            port: 3,
            direction: PortDirection::Output,
            arity: 2,
        };
        assert_eq!(
            err.to_string(),
            "operation 'fork0' has no output port 3 (arity 2)"
        );

        let err = GraphError::TypeMismatch {
            op: "add1".into(),
            port: 0,
            direction: PortDirection::Input,
            expected: DataType::I32,
            actual: DataType::Control,
        };
        assert_eq!(
            err.to_string(),
            "type mismatch on input port 0 of 'add1': expected i32, got none"
        );
    }

    #[test]
    fn not_found_messages() {
        assert_eq!(
            GraphError::OpNotFound { id: OpId(4) }.to_string(),
            "operation not found: OpId(4)"
        );
        assert_eq!(
            GraphError::ChannelNotFound { id: ChannelId(2) }.to_string(),
            "channel not found: ChannelId(2)"
        );
    }
}
