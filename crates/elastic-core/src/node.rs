//! Operation nodes of the circuit graph.
//!
//! An [`Operation`] wraps an [`OpKind`] with its port types, its name, the
//! basic block it was lowered from, and the speculative-region marker written
//! by the region annotator.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::GraphError;
use crate::id::BlockId;
use crate::ops::{BufferTiming, MemRef, OpKind};
use crate::types::DataType;

/// Port type list. Most operations have at most four ports per side.
pub type PortTypes = SmallVec<[DataType; 4]>;

/// A node in the circuit graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique name, used by external position lists to address the op.
    pub name: String,
    /// The operation kind and its payload.
    pub kind: OpKind,
    /// Basic block this operation was lowered from.
    pub block: BlockId,
    /// Types of the input ports, in port order.
    pub inputs: PortTypes,
    /// Types of the output ports, in port order.
    pub outputs: PortTypes,
    /// Set by the region annotator for members of a speculative region.
    #[serde(default)]
    pub speculative: bool,
}

impl Operation {
    /// Creates an operation with explicit port types.
    pub fn new(
        name: impl Into<String>,
        kind: OpKind,
        block: BlockId,
        inputs: impl IntoIterator<Item = DataType>,
        outputs: impl IntoIterator<Item = DataType>,
    ) -> Self {
        Operation {
            name: name.into(),
            kind,
            block,
            inputs: inputs.into_iter().collect(),
            outputs: outputs.into_iter().collect(),
            speculative: false,
        }
    }

    /// Creates a single-input single-output operation of type `ty`
    /// (buffers, speculation units, branches, casts between equal types).
    pub fn passthrough(name: impl Into<String>, kind: OpKind, block: BlockId, ty: DataType) -> Self {
        Operation::new(name, kind, block, [ty], [ty])
    }

    /// Creates a buffer with the given slot count and timing.
    pub fn buffer(
        name: impl Into<String>,
        block: BlockId,
        ty: DataType,
        slots: u32,
        timing: BufferTiming,
    ) -> Self {
        Operation::passthrough(name, OpKind::Buffer { slots, timing }, block, ty)
    }

    /// Creates a fork replicating `ty` onto `size` outputs.
    pub fn fork(name: impl Into<String>, block: BlockId, ty: DataType, size: u32) -> Self {
        Operation::new(
            name,
            OpKind::Fork { size },
            block,
            [ty],
            std::iter::repeat(ty).take(size as usize),
        )
    }

    /// Creates a merge of `size` inputs of type `ty`.
    pub fn merge(name: impl Into<String>, block: BlockId, ty: DataType, size: u32) -> Self {
        Operation::new(
            name,
            OpKind::Merge { size },
            block,
            std::iter::repeat(ty).take(size as usize),
            [ty],
        )
    }

    /// Returns `true` if every port carries the no-payload control type.
    pub fn is_control(&self) -> bool {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .all(DataType::is_control)
    }

    /// Returns `true` if the operation has exactly one input and one output
    /// of the same type.
    pub fn is_passthrough(&self) -> bool {
        self.inputs.len() == 1 && self.outputs.len() == 1 && self.inputs[0] == self.outputs[0]
    }

    /// The memory reference of memory kinds.
    pub fn memref(&self) -> Option<&MemRef> {
        self.kind.memref()
    }

    /// Checks arity against the kind and the SOST invariant.
    pub fn validate(&self) -> Result<(), GraphError> {
        let arity = self.kind.arity();
        if self.inputs.len() != arity.inputs || self.outputs.len() != arity.outputs {
            return Err(GraphError::InvalidArity {
                op: self.name.clone(),
                reason: format!(
                    "{} expects {} inputs / {} outputs, declared {} / {}",
                    self.kind.name(),
                    arity.inputs,
                    arity.outputs,
                    self.inputs.len(),
                    self.outputs.len()
                ),
            });
        }

        if self.kind.is_sost() {
            self.validate_sost()?;
        }
        Ok(())
    }

    fn validate_sost(&self) -> Result<(), GraphError> {
        let size = self.kind.size().unwrap_or(0);
        if size < 1 {
            return Err(GraphError::SostViolation {
                op: self.name.clone(),
                reason: format!("{} size must be at least 1, got {}", self.kind.name(), size),
            });
        }

        // The index result of a control merge carries its own type.
        let data_outputs = match self.kind {
            OpKind::ControlMerge { .. } => &self.outputs[..1],
            _ => &self.outputs[..],
        };
        let mut ports = self.inputs.iter().chain(data_outputs.iter());
        if let Some(first) = ports.next() {
            if let Some(other) = ports.find(|ty| *ty != first) {
                return Err(GraphError::SostViolation {
                    op: self.name.clone(),
                    reason: format!("ports mix types {} and {}", first, other),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::ArithOp;

    const BB: BlockId = BlockId(0);

    #[test]
    fn fork_helper_builds_valid_sost() {
        let fork = Operation::fork("f", BB, DataType::I32, 3);
        assert_eq!(fork.outputs.len(), 3);
        assert!(fork.validate().is_ok());
    }

    #[test]
    fn zero_sized_merge_is_rejected() {
        let merge = Operation::merge("m", BB, DataType::I32, 0);
        match merge.validate() {
            Err(GraphError::SostViolation { op, .. }) => assert_eq!(op, "m"),
            other => panic!("expected SostViolation, got {:?}", other),
        }
    }

    #[test]
    fn zero_slot_buffer_is_rejected() {
        let buf = Operation::buffer("b", BB, DataType::I32, 0, BufferTiming::Opaque);
        assert!(matches!(
            buf.validate(),
            Err(GraphError::SostViolation { .. })
        ));
    }

    #[test]
    fn mixed_type_fork_is_rejected() {
        let fork = Operation::new(
            "f",
            OpKind::Fork { size: 2 },
            BB,
            [DataType::I32],
            [DataType::I32, DataType::F32],
        );
        let err = fork.validate().unwrap_err();
        assert!(err.to_string().contains("mix types i32 and f32"));
    }

    #[test]
    fn control_merge_index_may_differ() {
        let cmerge = Operation::new(
            "cm",
            OpKind::ControlMerge { size: 2 },
            BB,
            [DataType::Control, DataType::Control],
            [DataType::Control, DataType::I1],
        );
        assert!(cmerge.validate().is_ok());
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let add = Operation::new(
            "a",
            OpKind::Arith { op: ArithOp::Add },
            BB,
            [DataType::I32],
            [DataType::I32],
        );
        assert!(matches!(
            add.validate(),
            Err(GraphError::InvalidArity { .. })
        ));
    }

    #[test]
    fn control_flag_requires_all_ports_control() {
        let fork = Operation::fork("f", BB, DataType::Control, 2);
        assert!(fork.is_control());
        let data = Operation::fork("g", BB, DataType::I32, 2);
        assert!(!data.is_control());
    }

    #[test]
    fn passthrough_detection() {
        let save = Operation::passthrough("s", OpKind::Save, BB, DataType::I32);
        assert!(save.is_passthrough());
        let fork = Operation::fork("f", BB, DataType::I32, 2);
        assert!(!fork.is_passthrough());
    }
}
