pub mod types;
pub mod id;
pub mod ops;
pub mod error;
pub mod node;
pub mod channel;
pub mod block;
pub mod graph;
pub mod query;

// Re-export commonly used types
pub use types::DataType;
pub use id::{BlockId, ChannelId, OpId};
pub use ops::{ArithOp, Arity, BufferTiming, CmpPredicate, MemRef, OpKind};
pub use error::{GraphError, PortDirection};
pub use node::{Operation, PortTypes};
pub use channel::{BufferProps, BufferSpec, Channel};
pub use block::{Block, BlockDominators, BlockTable};
pub use graph::{ChannelEnds, CircuitGraph, Splice};
