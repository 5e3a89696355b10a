//! Buffer placement for handshake circuits.
//!
//! [`place_buffers`] assigns slot counts and timing to channels so that
//! every cycle holds an opaque buffer, every loop meets the throughput
//! target and no combinational path exceeds the clock period, then splices
//! the buffers into the graph. The integer program it builds goes through
//! the [`MilpSolver`] boundary; [`BranchAndBound`] is the built-in solver.
//!
//! [`insert_buffer_unchecked`] is the scripting override that skips all of
//! the above.

pub mod error;
pub mod formulation;
pub mod manual;
pub mod model;
pub mod placement;
pub mod solver;

pub use error::{BufferError, InfeasibilityKind};
pub use formulation::Formulation;
pub use manual::{insert_buffer_unchecked, insert_buffers_unchecked, parse_requests, BufferRequest};
pub use model::{Assignment, Model, Relation, VarId};
pub use placement::{
    place_buffers, place_buffers_with, strip_buffers, verify_placement, PlacedBuffer,
    PlacementAlgorithm, PlacementOptions, PlacementReport,
};
pub use solver::{BranchAndBound, MilpSolver, SolveBudget, SolveOutcome};
