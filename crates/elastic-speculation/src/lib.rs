//! Speculative execution support for handshake circuits.
//!
//! A speculator issues a predicted value early; saves checkpoint data on
//! the way through the region and commits release it once the prediction is
//! confirmed. [`insert_speculation`] places the three kinds of unit after a
//! legality check, and [`annotate_regions`] recomputes which operations sit
//! inside a region.

pub mod annotate;
pub mod error;
pub mod legality;
pub mod planner;
pub mod position;

pub use annotate::{annotate_regions, AnnotationReport, RegionSummary};
pub use error::SpeculationError;
pub use legality::{check_region, RegionPlan};
pub use planner::{describe_plan, insert_speculation, plan_speculation, SpeculationMode, SpeculationReport};
pub use position::{ChannelRef, PositionList};
