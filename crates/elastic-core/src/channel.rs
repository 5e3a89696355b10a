//! Channel weights of the circuit graph.
//!
//! A [`Channel`] is the elastic link from one producer output port to one
//! consumer input port. Fan-out is always explicit through a fork and fan-in
//! through a merge, so each port has at most one channel.

use serde::{Deserialize, Serialize};

use crate::ops::BufferTiming;
use crate::types::DataType;

/// Constraints on what the buffer placer may put on a channel, supplied by
/// the front end (e.g. channels to a memory interface must stay unbuffered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferProps {
    /// Minimum number of slots that must be placed.
    #[serde(default)]
    pub min_slots: u32,
    /// Maximum number of slots, `None` for no channel-specific limit.
    #[serde(default)]
    pub max_slots: Option<u32>,
    /// Whether opaque slots may be placed.
    #[serde(default = "yes")]
    pub allow_opaque: bool,
    /// Whether transparent slots may be placed.
    #[serde(default = "yes")]
    pub allow_transparent: bool,
}

fn yes() -> bool {
    true
}

impl Default for BufferProps {
    fn default() -> Self {
        BufferProps {
            min_slots: 0,
            max_slots: None,
            allow_opaque: true,
            allow_transparent: true,
        }
    }
}

impl BufferProps {
    /// Properties of a channel that must never receive a buffer.
    pub fn unbufferable() -> Self {
        BufferProps {
            min_slots: 0,
            max_slots: Some(0),
            allow_opaque: false,
            allow_transparent: false,
        }
    }

    /// Returns `true` if an opaque slot may be placed on the channel.
    pub fn can_break(&self) -> bool {
        self.allow_opaque && self.max_slots != Some(0)
    }
}

/// The buffering observed at a producer port: slot count and timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferSpec {
    pub slots: u32,
    pub timing: BufferTiming,
}

/// Edge weight in the circuit graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Output port index on the producer.
    pub src_port: u16,
    /// Input port index on the consumer.
    pub dst_port: u16,
    /// Type of the tokens flowing through the channel.
    pub ty: DataType,
    /// Placement constraints.
    #[serde(default)]
    pub props: BufferProps,
    /// Combinational delay accumulated at the producer output, as last
    /// computed by the timing analyzer. `None` when not yet analyzed or
    /// when the channel sits on an unbroken combinational loop.
    #[serde(default)]
    pub delay: Option<f64>,
}

impl Channel {
    pub fn new(src_port: u16, dst_port: u16, ty: DataType) -> Self {
        Channel {
            src_port,
            dst_port,
            ty,
            props: BufferProps::default(),
            delay: None,
        }
    }

    /// Payload width in bits.
    pub fn bit_width(&self) -> u16 {
        self.ty.bit_width()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_props_allow_everything() {
        let props = BufferProps::default();
        assert!(props.can_break());
        assert!(props.allow_transparent);
        assert_eq!(props.max_slots, None);
    }

    #[test]
    fn unbufferable_cannot_break() {
        assert!(!BufferProps::unbufferable().can_break());
    }

    #[test]
    fn width_follows_type() {
        assert_eq!(Channel::new(0, 0, DataType::I32).bit_width(), 32);
        assert_eq!(Channel::new(0, 0, DataType::Control).bit_width(), 0);
    }

    #[test]
    fn props_deserialize_with_defaults() {
        let props: BufferProps = serde_json::from_str(r#"{"max_slots": 0}"#).unwrap();
        assert_eq!(props.max_slots, Some(0));
        assert!(props.allow_opaque);
        assert!(!props.can_break());
    }
}
