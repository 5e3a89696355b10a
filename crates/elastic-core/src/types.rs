//! Data types carried by channels.
//!
//! A channel either carries a payload of some bit width or only a
//! synchronization token ([`DataType::Control`]). The handshake itself
//! (valid/ready) is implicit on every channel and is not part of the type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The type of the tokens flowing through a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// No payload: the token only carries the handshake.
    Control,
    /// Integer payload of the given width (signedness lives on the op).
    Int { width: u16 },
    /// Floating point payload of the given width.
    Float { width: u16 },
}

impl DataType {
    pub const I1: DataType = DataType::Int { width: 1 };
    pub const I32: DataType = DataType::Int { width: 32 };
    pub const I64: DataType = DataType::Int { width: 64 };
    pub const F32: DataType = DataType::Float { width: 32 };
    pub const F64: DataType = DataType::Float { width: 64 };

    /// Returns `true` for the no-payload control type.
    pub fn is_control(&self) -> bool {
        matches!(self, DataType::Control)
    }

    /// Payload width in bits. Control tokens have width 0.
    pub fn bit_width(&self) -> u16 {
        match self {
            DataType::Control => 0,
            DataType::Int { width } | DataType::Float { width } => *width,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Control => write!(f, "none"),
            DataType::Int { width } => write!(f, "i{}", width),
            DataType::Float { width } => write!(f, "f{}", width),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_has_no_width() {
        assert!(DataType::Control.is_control());
        assert_eq!(DataType::Control.bit_width(), 0);
    }

    #[test]
    fn payload_widths() {
        assert_eq!(DataType::I1.bit_width(), 1);
        assert_eq!(DataType::I32.bit_width(), 32);
        assert_eq!(DataType::F64.bit_width(), 64);
        assert!(!DataType::I32.is_control());
    }

    #[test]
    fn display() {
        assert_eq!(DataType::Control.to_string(), "none");
        assert_eq!(DataType::I32.to_string(), "i32");
        assert_eq!(DataType::F32.to_string(), "f32");
    }

    #[test]
    fn serde_roundtrip() {
        for ty in [DataType::Control, DataType::I1, DataType::F64] {
            let json = serde_json::to_string(&ty).unwrap();
            let back: DataType = serde_json::from_str(&json).unwrap();
            assert_eq!(ty, back);
        }
    }
}
