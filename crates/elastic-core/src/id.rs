//! Stable ID newtypes for circuit graph entities.
//!
//! All IDs are distinct newtype wrappers over `u32`, providing type safety
//! so that an `OpId` cannot be accidentally used where a `ChannelId` is expected.

use std::fmt;

use petgraph::graph::{EdgeIndex, NodeIndex};
use serde::{Deserialize, Serialize};

/// Operation identifier. Maps to a petgraph `NodeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(pub u32);

/// Channel identifier. Maps to a petgraph `EdgeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u32);

/// Basic block identity, inherited from the source control-flow structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

// Display implementations -- just print the inner value.

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Bridges between our IDs and petgraph's indices.

impl From<NodeIndex<u32>> for OpId {
    fn from(idx: NodeIndex<u32>) -> Self {
        OpId(idx.index() as u32)
    }
}

impl From<OpId> for NodeIndex<u32> {
    fn from(id: OpId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}

impl From<EdgeIndex<u32>> for ChannelId {
    fn from(idx: EdgeIndex<u32>) -> Self {
        ChannelId(idx.index() as u32)
    }
}

impl From<ChannelId> for EdgeIndex<u32> {
    fn from(id: ChannelId) -> Self {
        EdgeIndex::new(id.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_id_to_node_index_roundtrip() {
        let idx = NodeIndex::<u32>::new(42);
        let op = OpId::from(idx);
        assert_eq!(op.0, 42);

        let back: NodeIndex<u32> = op.into();
        assert_eq!(back.index(), 42);
    }

    #[test]
    fn channel_id_to_edge_index_roundtrip() {
        let idx = EdgeIndex::<u32>::new(9);
        let ch = ChannelId::from(idx);
        assert_eq!(ch, ChannelId(9));

        let back: EdgeIndex<u32> = ch.into();
        assert_eq!(back.index(), 9);
    }

    #[test]
    fn ids_display_inner_value() {
        assert_eq!(format!("{}", OpId(7)), "7");
        assert_eq!(format!("{}", ChannelId(99)), "99");
        assert_eq!(format!("{}", BlockId(0)), "0");
    }

    #[test]
    fn ids_order_by_value() {
        let mut ids = vec![OpId(3), OpId(1), OpId(2)];
        ids.sort();
        assert_eq!(ids, vec![OpId(1), OpId(2), OpId(3)]);
    }

    #[test]
    fn serde_roundtrip() {
        let ch = ChannelId(42);
        let json = serde_json::to_string(&ch).unwrap();
        let back: ChannelId = serde_json::from_str(&json).unwrap();
        assert_eq!(ch, back);
    }
}
