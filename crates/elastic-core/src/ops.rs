//! Operation kinds for the circuit graph.
//!
//! Every operation is a tagged variant ([`OpKind`]) with a kind-specific
//! payload. Kind-specific behaviour (port arity, "is this a SOST op", "is this
//! an observation point") is dispatched through small pure functions keyed on
//! the tag rather than through trait objects.
//!
//! # Port conventions
//!
//! | kind            | inputs                         | outputs                       |
//! |-----------------|--------------------------------|-------------------------------|
//! | `start`         | none                           | control token                 |
//! | `argument`      | none                           | value                         |
//! | `source`        | none                           | control token                 |
//! | `constant`      | control trigger                | value                         |
//! | `sink`          | value                          | none                          |
//! | `end`           | `size` values                  | none                          |
//! | `fork`          | value                          | `size` copies                 |
//! | `merge`         | `size` values                  | value                         |
//! | `control_merge` | `size` values                  | value, index                  |
//! | `mux`           | select, `size` values          | value                         |
//! | `branch`        | value                          | value                         |
//! | `cond_branch`   | condition, value               | true value, false value       |
//! | `buffer`        | value                          | value                         |
//! | `load`          | address, data from memory      | address to memory, data       |
//! | `store`         | address, data                  | address to memory, data to memory |
//! | `mem_interface` | `inputs` port requests         | `outputs` responses           |
//! | speculation     | value                          | value                         |
//! | arithmetic      | 1 or 2 operands                | result                        |
//! | `cmp`           | lhs, rhs                       | `i1` result                   |
//! | `select`        | condition, true, false         | value                         |
//! | `cast`          | value                          | value                         |

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Sub-enums
// ---------------------------------------------------------------------------

/// Timing behaviour of buffer slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferTiming {
    /// Slots that always delay a token by one cycle. The only element that
    /// breaks a combinational cycle.
    Opaque,
    /// Slots that may pass a token through in the same cycle.
    Transparent,
}

impl fmt::Display for BufferTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferTiming::Opaque => write!(f, "opaque"),
            BufferTiming::Transparent => write!(f, "transparent"),
        }
    }
}

impl std::str::FromStr for BufferTiming {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opaque" | "o" => Ok(BufferTiming::Opaque),
            "transparent" | "t" => Ok(BufferTiming::Transparent),
            other => Err(format!(
                "invalid buffer timing '{}', expected opaque/transparent",
                other
            )),
        }
    }
}

/// Generic arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Neg,
    Not,
}

impl ArithOp {
    /// Number of operands.
    pub fn operand_count(&self) -> usize {
        match self {
            ArithOp::Neg | ArithOp::Not => 1,
            _ => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Rem => "rem",
            ArithOp::And => "and",
            ArithOp::Or => "or",
            ArithOp::Xor => "xor",
            ArithOp::Shl => "shl",
            ArithOp::Shr => "shr",
            ArithOp::Neg => "neg",
            ArithOp::Not => "not",
        }
    }
}

/// Comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpPredicate {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Reference to a memory region accessed by load/store ports and memory
/// interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemRef(pub String);

impl fmt::Display for MemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Operation kinds
// ---------------------------------------------------------------------------

/// The fixed catalog of operation kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpKind {
    // -- Circuit boundary --
    /// Entry control token of the function.
    Start,
    /// Function argument entering the circuit.
    Argument { index: u32 },
    /// Infinite token source.
    Source,
    /// Constant value, emitted once per control trigger.
    Constant { value: i64 },
    /// Discards tokens.
    Sink,
    /// Function exit: collects the results and memory completion tokens.
    End { size: u32 },

    // -- Dataflow steering --
    /// Eager fork: replicates one token onto `size` outputs.
    Fork { size: u32 },
    /// Nondeterministic merge of `size` inputs.
    Merge { size: u32 },
    /// Merge that also reports which input fired.
    ControlMerge { size: u32 },
    /// Selects one of `size` data inputs by an index input.
    Mux { size: u32 },
    /// Unconditional branch (passes the token to the successor block).
    Branch,
    /// Conditional branch: steers a token to the true or false output.
    CondBranch,

    // -- Storage --
    /// Elastic buffer with `slots` slots of the given timing.
    Buffer { slots: u32, timing: BufferTiming },

    // -- Memory --
    /// Load port connected to a memory interface.
    Load { memref: MemRef },
    /// Store port connected to a memory interface.
    Store { memref: MemRef },
    /// Memory controller / LSQ boundary for a memory region.
    MemInterface {
        memref: MemRef,
        inputs: u32,
        outputs: u32,
    },

    // -- Speculation --
    /// Root of a speculative region.
    Speculator,
    /// Preserves state needed to roll back.
    Save,
    /// Validates and releases a speculative result.
    Commit,

    // -- Computation --
    Arith { op: ArithOp },
    Cmp { predicate: CmpPredicate },
    Select,
    Cast,
}

/// Input/output port counts of an operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub inputs: usize,
    pub outputs: usize,
}

impl OpKind {
    /// Short lowercase name, also the key into delay tables.
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Start => "start",
            OpKind::Argument { .. } => "argument",
            OpKind::Source => "source",
            OpKind::Constant { .. } => "constant",
            OpKind::Sink => "sink",
            OpKind::End { .. } => "end",
            OpKind::Fork { .. } => "fork",
            OpKind::Merge { .. } => "merge",
            OpKind::ControlMerge { .. } => "control_merge",
            OpKind::Mux { .. } => "mux",
            OpKind::Branch => "branch",
            OpKind::CondBranch => "cond_branch",
            OpKind::Buffer { .. } => "buffer",
            OpKind::Load { .. } => "load",
            OpKind::Store { .. } => "store",
            OpKind::MemInterface { .. } => "mem_interface",
            OpKind::Speculator => "speculator",
            OpKind::Save => "save",
            OpKind::Commit => "commit",
            OpKind::Arith { op } => op.name(),
            OpKind::Cmp { .. } => "cmp",
            OpKind::Select => "select",
            OpKind::Cast => "cast",
        }
    }

    /// Port counts implied by the kind and its payload.
    pub fn arity(&self) -> Arity {
        let (inputs, outputs) = match self {
            OpKind::Start | OpKind::Argument { .. } | OpKind::Source => (0, 1),
            OpKind::Constant { .. } => (1, 1),
            OpKind::Sink => (1, 0),
            OpKind::End { size } => (*size as usize, 0),
            OpKind::Fork { size } => (1, *size as usize),
            OpKind::Merge { size } => (*size as usize, 1),
            OpKind::ControlMerge { size } => (*size as usize, 2),
            OpKind::Mux { size } => (*size as usize + 1, 1),
            OpKind::Branch => (1, 1),
            OpKind::CondBranch => (2, 2),
            OpKind::Buffer { .. } => (1, 1),
            OpKind::Load { .. } | OpKind::Store { .. } => (2, 2),
            OpKind::MemInterface {
                inputs, outputs, ..
            } => (*inputs as usize, *outputs as usize),
            OpKind::Speculator | OpKind::Save | OpKind::Commit => (1, 1),
            OpKind::Arith { op } => (op.operand_count(), 1),
            OpKind::Cmp { .. } => (2, 1),
            OpKind::Select => (3, 1),
            OpKind::Cast => (1, 1),
        };
        Arity { inputs, outputs }
    }

    /// The size attribute of sized kinds (`None` for unsized kinds).
    pub fn size(&self) -> Option<u32> {
        match self {
            OpKind::Fork { size }
            | OpKind::Merge { size }
            | OpKind::ControlMerge { size }
            | OpKind::Mux { size }
            | OpKind::End { size } => Some(*size),
            OpKind::Buffer { slots, .. } => Some(*slots),
            _ => None,
        }
    }

    /// "Sized operation with a single type": size >= 1 and every data port
    /// shares one type.
    pub fn is_sost(&self) -> bool {
        matches!(
            self,
            OpKind::Fork { .. }
                | OpKind::Merge { .. }
                | OpKind::ControlMerge { .. }
                | OpKind::Buffer { .. }
        )
    }

    /// Merge-like kinds join several incoming token streams.
    pub fn is_merge_like(&self) -> bool {
        matches!(
            self,
            OpKind::Merge { .. } | OpKind::ControlMerge { .. } | OpKind::Mux { .. }
        )
    }

    /// Points where a value becomes externally visible.
    pub fn is_observation(&self) -> bool {
        matches!(
            self,
            OpKind::End { .. } | OpKind::Store { .. } | OpKind::MemInterface { .. }
        )
    }

    /// Speculator, save and commit units.
    pub fn is_speculation_unit(&self) -> bool {
        matches!(self, OpKind::Speculator | OpKind::Save | OpKind::Commit)
    }

    /// Returns `true` for buffers with opaque slots (registers).
    pub fn is_opaque_buffer(&self) -> bool {
        matches!(
            self,
            OpKind::Buffer {
                timing: BufferTiming::Opaque,
                ..
            }
        )
    }

    /// The memory reference of load/store/memory-interface kinds.
    pub fn memref(&self) -> Option<&MemRef> {
        match self {
            OpKind::Load { memref }
            | OpKind::Store { memref }
            | OpKind::MemInterface { memref, .. } => Some(memref),
            _ => None,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Buffer { slots, timing } => write!(f, "buffer[{} {}]", slots, timing),
            other => match other.size() {
                Some(size) => write!(f, "{}[{}]", other.name(), size),
                None => write!(f, "{}", other.name()),
            },
        }
    }
}
