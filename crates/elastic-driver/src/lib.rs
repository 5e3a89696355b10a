//! Batch driver for the elastic circuit passes.
//!
//! # Modules
//!
//! - [`pipeline`] -- the full analyze / buffer / speculate / annotate run
//! - [`options`] -- serde options with defaults for every field
//! - [`error`] -- the error taxonomy and its exit codes
//! - [`io`] -- JSON load and save of graphs and options

pub mod error;
pub mod io;
pub mod options;
pub mod pipeline;

pub use error::{ErrorKind, PipelineError};
pub use io::{load_graph, load_options, read_text, save_graph};
pub use options::PipelineOptions;
pub use pipeline::{run, PipelineReport};
