//! Basic block table: the control-flow grouping inherited from the source
//! program.
//!
//! Every operation belongs to exactly one block. The CFG edges between blocks
//! drive block-level dominance, which bounds where speculative regions may
//! legally span.

use petgraph::algo::dominators::{self, Dominators};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::id::BlockId;

/// A basic block and its CFG successors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub name: String,
    pub successors: Vec<BlockId>,
}

/// Table of basic blocks indexed by [`BlockId`]. Blocks are never removed,
/// so IDs stay dense. The first block added is the entry block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockTable {
    blocks: Vec<Block>,
}

impl BlockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a block and returns its ID.
    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            id,
            name: name.into(),
            successors: Vec::new(),
        });
        id
    }

    /// Records a CFG edge `from -> to`. Duplicate edges are ignored.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) -> Result<(), GraphError> {
        if !self.contains(to) {
            return Err(GraphError::BlockNotFound { id: to });
        }
        let block = self
            .blocks
            .get_mut(from.0 as usize)
            .ok_or(GraphError::BlockNotFound { id: from })?;
        if !block.successors.contains(&to) {
            block.successors.push(to);
        }
        Ok(())
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0 as usize)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        (id.0 as usize) < self.blocks.len()
    }

    /// The entry block (first block added).
    pub fn entry(&self) -> Option<BlockId> {
        self.blocks.first().map(|b| b.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Computes the dominator tree of the CFG rooted at the entry block.
    pub fn dominators(&self) -> BlockDominators {
        let mut cfg = DiGraph::<BlockId, ()>::new();
        for block in &self.blocks {
            cfg.add_node(block.id);
        }
        for block in &self.blocks {
            for succ in &block.successors {
                cfg.add_edge(node_of(block.id), node_of(*succ), ());
            }
        }
        let tree = self
            .entry()
            .map(|entry| dominators::simple_fast(&cfg, node_of(entry)));
        BlockDominators {
            len: self.blocks.len(),
            tree,
        }
    }
}

fn node_of(id: BlockId) -> NodeIndex {
    NodeIndex::new(id.0 as usize)
}

/// Block-level dominance relation.
pub struct BlockDominators {
    len: usize,
    tree: Option<Dominators<NodeIndex>>,
}

impl BlockDominators {
    /// Returns `true` if every CFG path from the entry to `b` passes
    /// through `a`. A block dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        let Some(tree) = &self.tree else {
            return false;
        };
        if a.0 as usize >= self.len || b.0 as usize >= self.len {
            return false;
        }
        match tree.dominators(node_of(b)) {
            Some(mut chain) => chain.any(|n| n == node_of(a)),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Diamond CFG: bb0 -> {bb1, bb2} -> bb3.
    fn diamond() -> (BlockTable, [BlockId; 4]) {
        let mut table = BlockTable::new();
        let b0 = table.add_block("bb0");
        let b1 = table.add_block("bb1");
        let b2 = table.add_block("bb2");
        let b3 = table.add_block("bb3");
        table.add_edge(b0, b1).unwrap();
        table.add_edge(b0, b2).unwrap();
        table.add_edge(b1, b3).unwrap();
        table.add_edge(b2, b3).unwrap();
        (table, [b0, b1, b2, b3])
    }

    #[test]
    fn entry_is_first_block() {
        let (table, [b0, ..]) = diamond();
        assert_eq!(table.entry(), Some(b0));
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn diamond_dominance() {
        let (table, [b0, b1, b2, b3]) = diamond();
        let dom = table.dominators();
        assert!(dom.dominates(b0, b3));
        assert!(dom.dominates(b0, b1));
        assert!(!dom.dominates(b1, b3));
        assert!(!dom.dominates(b2, b3));
        assert!(dom.dominates(b3, b3));
    }

    #[test]
    fn loop_header_dominates_latch() {
        let mut table = BlockTable::new();
        let entry = table.add_block("entry");
        let header = table.add_block("header");
        let latch = table.add_block("latch");
        let exit = table.add_block("exit");
        table.add_edge(entry, header).unwrap();
        table.add_edge(header, latch).unwrap();
        table.add_edge(latch, header).unwrap();
        table.add_edge(header, exit).unwrap();
        let dom = table.dominators();
        assert!(dom.dominates(header, latch));
        assert!(dom.dominates(header, exit));
        assert!(!dom.dominates(latch, header));
    }

    #[test]
    fn unknown_block_edge_errors() {
        let mut table = BlockTable::new();
        let b0 = table.add_block("bb0");
        let err = table.add_edge(b0, BlockId(7)).unwrap_err();
        assert_eq!(err, GraphError::BlockNotFound { id: BlockId(7) });
    }

    #[test]
    fn duplicate_edges_are_ignored() {
        let mut table = BlockTable::new();
        let b0 = table.add_block("bb0");
        let b1 = table.add_block("bb1");
        table.add_edge(b0, b1).unwrap();
        table.add_edge(b0, b1).unwrap();
        assert_eq!(table.get(b0).unwrap().successors, vec![b1]);
    }
}
