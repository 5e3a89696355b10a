//! Cycle and timing analysis for handshake circuits.
//!
//! - [`enumerate_cycles`]: every elementary cycle with its latency and
//!   whether an opaque buffer already breaks it.
//! - [`ArrivalTimes`]: combinational arrival times, optionally with
//!   hypothetical registers (used by the buffer placer).
//! - [`analyze`]: both of the above behind a validated [`TimingConfig`].
//!
//! Everything here reads the graph; only [`AnalysisReport::write_back`]
//! mutates it.

pub mod config;
pub mod cycles;
pub mod error;
pub mod report;
pub mod timing;

pub use config::{DelayTable, OpTiming, TimingConfig};
pub use cycles::{enumerate_cycles, Cycle};
pub use error::AnalysisError;
pub use report::{analyze, AnalysisReport, AnalysisSummary};
pub use timing::ArrivalTimes;
