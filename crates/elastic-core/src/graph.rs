//! CircuitGraph: the arena holding every operation and channel of a
//! handshake circuit.
//!
//! [`CircuitGraph`] is the single entry point for constructing, querying and
//! mutating circuits. Operations and channels live in a private
//! `StableGraph`, addressed through [`OpId`] / [`ChannelId`] handles, so
//! loop feedback needs no special ownership treatment.
//!
//! # Invariants
//!
//! - every operation satisfies its kind's arity and, for SOST kinds, the
//!   single-type rule;
//! - every port carries at most one channel, and a channel's type equals the
//!   types of both ports it connects;
//! - operation names are unique.
//!
//! Every mutation method checks all of its preconditions before touching the
//! arena, so a failed call leaves the graph exactly as it was.

use std::collections::HashSet;
use std::fmt;

use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};

use crate::block::BlockTable;
use crate::channel::{BufferProps, BufferSpec, Channel};
use crate::error::{GraphError, PortDirection};
use crate::id::{BlockId, ChannelId, OpId};
use crate::node::Operation;
use crate::ops::OpKind;
use crate::types::DataType;

/// Resolved endpoints of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelEnds {
    pub src: OpId,
    pub src_port: u16,
    pub dst: OpId,
    pub dst_port: u16,
}

/// Result of splicing an operation into a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Splice {
    /// The inserted operation.
    pub op: OpId,
    /// Channel from the original producer into the inserted operation.
    pub upstream: ChannelId,
    /// Channel from the inserted operation to the original consumer.
    pub downstream: ChannelId,
}

/// The handshake circuit container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitGraph {
    /// Name of the circuit (usually the lowered function).
    name: String,
    /// Operations and channels.
    graph: StableGraph<Operation, Channel, Directed, u32>,
    /// Basic block table with CFG edges.
    pub blocks: BlockTable,
}

impl CircuitGraph {
    /// Creates an empty circuit with no blocks.
    pub fn new(name: impl Into<String>) -> Self {
        CircuitGraph {
            name: name.into(),
            graph: StableGraph::new(),
            blocks: BlockTable::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a read-only reference to the underlying arena.
    pub fn raw(&self) -> &StableGraph<Operation, Channel, Directed, u32> {
        &self.graph
    }

    /// Returns the number of operations.
    pub fn op_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of channels.
    pub fn channel_count(&self) -> usize {
        self.graph.edge_count()
    }

    // -----------------------------------------------------------------------
    // Block methods
    // -----------------------------------------------------------------------

    /// Adds a basic block. The first block added is the entry block.
    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        self.blocks.add_block(name)
    }

    /// Adds a CFG edge between two blocks.
    pub fn add_cfg_edge(&mut self, from: BlockId, to: BlockId) -> Result<(), GraphError> {
        self.blocks.add_edge(from, to)
    }

    // -----------------------------------------------------------------------
    // Operation methods
    // -----------------------------------------------------------------------

    /// Adds an operation after validating its arity, SOST rule, block and
    /// name uniqueness.
    pub fn add_operation(&mut self, op: Operation) -> Result<OpId, GraphError> {
        self.check_insertable(&op)?;
        Ok(OpId::from(self.graph.add_node(op)))
    }

    /// Looks up an operation by ID.
    pub fn operation(&self, id: OpId) -> Option<&Operation> {
        self.graph.node_weight(id.into())
    }

    /// Looks up an operation by name.
    pub fn find_op(&self, name: &str) -> Option<OpId> {
        self.graph
            .node_indices()
            .find(|&idx| self.graph[idx].name == name)
            .map(OpId::from)
    }

    /// All operation IDs in ascending order.
    pub fn op_ids(&self) -> Vec<OpId> {
        let mut ids: Vec<OpId> = self.graph.node_indices().map(OpId::from).collect();
        ids.sort();
        ids
    }

    /// Iterates over operations in ascending ID order.
    pub fn operations(&self) -> impl Iterator<Item = (OpId, &Operation)> + '_ {
        self.op_ids()
            .into_iter()
            .map(move |id| (id, &self.graph[petgraph::graph::NodeIndex::from(id)]))
    }

    /// Operations with no input ports (circuit entry points).
    pub fn entry_ops(&self) -> Vec<OpId> {
        self.operations()
            .filter(|(_, op)| op.inputs.is_empty())
            .map(|(id, _)| id)
            .collect()
    }

    /// Operations lowered from the given basic block, in ID order.
    pub fn ops_in_block(&self, block: BlockId) -> Vec<OpId> {
        self.operations()
            .filter(|(_, op)| op.block == block)
            .map(|(id, _)| id)
            .collect()
    }

    /// Returns a name of the form `{prefix}{n}` not used by any operation.
    pub fn unique_name(&self, prefix: &str) -> String {
        let taken: HashSet<&str> = self
            .graph
            .node_weights()
            .map(|op| op.name.as_str())
            .collect();
        (0..)
            .map(|n| format!("{}{}", prefix, n))
            .find(|candidate| !taken.contains(candidate.as_str()))
            .unwrap_or_else(|| prefix.to_string())
    }

    /// Sets or clears the speculative-region marker of an operation.
    pub fn set_speculative(&mut self, id: OpId, member: bool) -> Result<(), GraphError> {
        let op = self
            .graph
            .node_weight_mut(id.into())
            .ok_or(GraphError::OpNotFound { id })?;
        op.speculative = member;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Channel methods
    // -----------------------------------------------------------------------

    /// Connects `src` output `src_port` to `dst` input `dst_port` with
    /// default buffering properties.
    pub fn connect(
        &mut self,
        src: OpId,
        src_port: u16,
        dst: OpId,
        dst_port: u16,
    ) -> Result<ChannelId, GraphError> {
        self.connect_with_props(src, src_port, dst, dst_port, BufferProps::default())
    }

    /// Connects two ports with explicit buffering properties.
    pub fn connect_with_props(
        &mut self,
        src: OpId,
        src_port: u16,
        dst: OpId,
        dst_port: u16,
        props: BufferProps,
    ) -> Result<ChannelId, GraphError> {
        let ty = self.check_connectable(src, src_port, dst, dst_port, None)?;
        let channel = Channel {
            props,
            ..Channel::new(src_port, dst_port, ty)
        };
        let idx = self.graph.add_edge(src.into(), dst.into(), channel);
        Ok(ChannelId::from(idx))
    }

    /// Looks up a channel by ID.
    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.graph.edge_weight(id.into())
    }

    /// Resolves the producer and consumer of a channel.
    pub fn endpoints(&self, id: ChannelId) -> Option<ChannelEnds> {
        let (src, dst) = self.graph.edge_endpoints(id.into())?;
        let channel = &self.graph[petgraph::graph::EdgeIndex::from(id)];
        Some(ChannelEnds {
            src: src.into(),
            src_port: channel.src_port,
            dst: dst.into(),
            dst_port: channel.dst_port,
        })
    }

    /// All channel IDs in ascending order.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self.graph.edge_indices().map(ChannelId::from).collect();
        ids.sort();
        ids
    }

    /// The channel leaving output `port` of `op`, if connected.
    pub fn output_channel(&self, op: OpId, port: u16) -> Option<ChannelId> {
        self.graph
            .edges_directed(op.into(), Direction::Outgoing)
            .find(|e| e.weight().src_port == port)
            .map(|e| e.id().into())
    }

    /// The channel entering input `port` of `op`, if connected.
    pub fn input_channel(&self, op: OpId, port: u16) -> Option<ChannelId> {
        self.graph
            .edges_directed(op.into(), Direction::Incoming)
            .find(|e| e.weight().dst_port == port)
            .map(|e| e.id().into())
    }

    /// Outgoing channels of `op`, ordered by output port.
    pub fn out_channels(&self, op: OpId) -> Vec<ChannelId> {
        let mut edges: Vec<(u16, ChannelId)> = self
            .graph
            .edges_directed(op.into(), Direction::Outgoing)
            .map(|e| (e.weight().src_port, e.id().into()))
            .collect();
        edges.sort();
        edges.into_iter().map(|(_, id)| id).collect()
    }

    /// Incoming channels of `op`, ordered by input port.
    pub fn in_channels(&self, op: OpId) -> Vec<ChannelId> {
        let mut edges: Vec<(u16, ChannelId)> = self
            .graph
            .edges_directed(op.into(), Direction::Incoming)
            .map(|e| (e.weight().dst_port, e.id().into()))
            .collect();
        edges.sort();
        edges.into_iter().map(|(_, id)| id).collect()
    }

    /// Consumers of `op`'s outputs, in output port order.
    pub fn successors(&self, op: OpId) -> Vec<OpId> {
        self.out_channels(op)
            .into_iter()
            .filter_map(|ch| self.endpoints(ch).map(|ends| ends.dst))
            .collect()
    }

    /// Producers of `op`'s inputs, in input port order.
    pub fn predecessors(&self, op: OpId) -> Vec<OpId> {
        self.in_channels(op)
            .into_iter()
            .filter_map(|ch| self.endpoints(ch).map(|ends| ends.src))
            .collect()
    }

    /// Records the analyzer's delay estimate on a channel.
    pub fn set_channel_delay(&mut self, id: ChannelId, delay: Option<f64>) -> Result<(), GraphError> {
        let channel = self
            .graph
            .edge_weight_mut(id.into())
            .ok_or(GraphError::ChannelNotFound { id })?;
        channel.delay = delay;
        Ok(())
    }

    /// The buffer sitting directly on output `port` of `op`, if any.
    pub fn buffering_at(&self, op: OpId, port: u16) -> Option<BufferSpec> {
        let channel = self.output_channel(op, port)?;
        let consumer = self.endpoints(channel)?.dst;
        match self.operation(consumer)?.kind {
            OpKind::Buffer { slots, timing } => Some(BufferSpec { slots, timing }),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Mutation primitives
    // -----------------------------------------------------------------------

    /// Inserts a single-input single-output operation into `channel`,
    /// replacing it with two channels. The upstream half keeps the original
    /// buffering properties.
    pub fn splice(&mut self, channel: ChannelId, op: Operation) -> Result<Splice, GraphError> {
        let ends = self
            .endpoints(channel)
            .ok_or(GraphError::ChannelNotFound { id: channel })?;
        let original = self.graph[petgraph::graph::EdgeIndex::from(channel)].clone();

        if !op.is_passthrough() {
            return Err(GraphError::NotPassthrough { op: op.name });
        }
        if op.inputs[0] != original.ty {
            return Err(GraphError::TypeMismatch {
                op: op.name,
                port: 0,
                direction: PortDirection::Input,
                expected: op.inputs[0],
                actual: original.ty,
            });
        }
        self.check_insertable(&op)?;

        self.graph.remove_edge(channel.into());
        let new_op = self.graph.add_node(op);
        let upstream = self.graph.add_edge(
            ends.src.into(),
            new_op,
            Channel {
                dst_port: 0,
                ..original.clone()
            },
        );
        let downstream = self.graph.add_edge(
            new_op,
            ends.dst.into(),
            Channel::new(0, ends.dst_port, original.ty),
        );
        Ok(Splice {
            op: new_op.into(),
            upstream: upstream.into(),
            downstream: downstream.into(),
        })
    }

    /// Deletes a single-input single-output operation and connects its
    /// producer straight to its consumer. Returns the removed operation.
    pub fn remove_passthrough(&mut self, id: OpId) -> Result<Operation, GraphError> {
        let op = self.operation(id).ok_or(GraphError::OpNotFound { id })?;
        if !op.is_passthrough() {
            return Err(GraphError::NotPassthrough {
                op: op.name.clone(),
            });
        }
        let dangling = |direction| GraphError::DanglingPort {
            op: op.name.clone(),
            port: 0,
            direction,
        };
        let incoming = self
            .input_channel(id, 0)
            .ok_or_else(|| dangling(PortDirection::Input))?;
        let outgoing = self
            .output_channel(id, 0)
            .ok_or_else(|| dangling(PortDirection::Output))?;
        let before = self
            .endpoints(incoming)
            .ok_or(GraphError::ChannelNotFound { id: incoming })?;
        let after = self
            .endpoints(outgoing)
            .ok_or(GraphError::ChannelNotFound { id: outgoing })?;
        if before.src == id {
            // Feeding itself: nothing to reconnect to.
            return Err(GraphError::NotPassthrough {
                op: op.name.clone(),
            });
        }
        let carried = self.graph[petgraph::graph::EdgeIndex::from(incoming)].clone();

        let removed = self
            .graph
            .remove_node(id.into())
            .ok_or(GraphError::OpNotFound { id })?;
        self.graph.add_edge(
            before.src.into(),
            after.dst.into(),
            Channel {
                dst_port: after.dst_port,
                ..carried
            },
        );
        Ok(removed)
    }

    /// Moves one or both endpoints of a channel. `None` keeps the current
    /// endpoint. Returns the ID of the rewired channel.
    pub fn rewire(
        &mut self,
        channel: ChannelId,
        new_src: Option<(OpId, u16)>,
        new_dst: Option<(OpId, u16)>,
    ) -> Result<ChannelId, GraphError> {
        let ends = self
            .endpoints(channel)
            .ok_or(GraphError::ChannelNotFound { id: channel })?;
        let (src, src_port) = new_src.unwrap_or((ends.src, ends.src_port));
        let (dst, dst_port) = new_dst.unwrap_or((ends.dst, ends.dst_port));
        let ty = self.check_connectable(src, src_port, dst, dst_port, Some(channel))?;

        let old = self
            .graph
            .remove_edge(channel.into())
            .ok_or(GraphError::ChannelNotFound { id: channel })?;
        let idx = self.graph.add_edge(
            src.into(),
            dst.into(),
            Channel {
                src_port,
                dst_port,
                ty,
                ..old
            },
        );
        Ok(idx.into())
    }

    // -----------------------------------------------------------------------
    // Whole-graph validation
    // -----------------------------------------------------------------------

    /// Checks every invariant of the circuit: operation validity, known
    /// blocks, unique names, and exactly one well-typed channel per port.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut names = HashSet::new();
        for (id, op) in self.operations() {
            op.validate()?;
            if !self.blocks.contains(op.block) {
                return Err(GraphError::BlockNotFound { id: op.block });
            }
            if !names.insert(op.name.as_str()) {
                return Err(GraphError::DuplicateName {
                    name: op.name.clone(),
                });
            }
            self.check_ports(id, op, Direction::Incoming)?;
            self.check_ports(id, op, Direction::Outgoing)?;
        }
        Ok(())
    }

    fn check_ports(&self, id: OpId, op: &Operation, dir: Direction) -> Result<(), GraphError> {
        let (types, direction) = match dir {
            Direction::Incoming => (&op.inputs, PortDirection::Input),
            Direction::Outgoing => (&op.outputs, PortDirection::Output),
        };
        let mut seen = vec![0usize; types.len()];
        for edge in self.graph.edges_directed(id.into(), dir) {
            let channel = edge.weight();
            let port = match dir {
                Direction::Incoming => channel.dst_port,
                Direction::Outgoing => channel.src_port,
            };
            let expected = *types.get(port as usize).ok_or(GraphError::PortOutOfRange {
                op: op.name.clone(),
                port,
                direction,
                arity: types.len(),
            })?;
            if expected != channel.ty {
                return Err(GraphError::TypeMismatch {
                    op: op.name.clone(),
                    port,
                    direction,
                    expected,
                    actual: channel.ty,
                });
            }
            seen[port as usize] += 1;
            if seen[port as usize] > 1 {
                return Err(GraphError::PortAlreadyConnected {
                    op: op.name.clone(),
                    port,
                    direction,
                });
            }
        }
        if let Some(port) = seen.iter().position(|&count| count == 0) {
            return Err(GraphError::DanglingPort {
                op: op.name.clone(),
                port: port as u16,
                direction,
            });
        }
        Ok(())
    }

    /// Hex blake3 digest of the serialized graph. Two graphs with equal
    /// fingerprints are attribute-for-attribute identical.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    // -----------------------------------------------------------------------
    // Precondition helpers
    // -----------------------------------------------------------------------

    fn check_insertable(&self, op: &Operation) -> Result<(), GraphError> {
        op.validate()?;
        if !self.blocks.contains(op.block) {
            return Err(GraphError::BlockNotFound { id: op.block });
        }
        if self.find_op(&op.name).is_some() {
            return Err(GraphError::DuplicateName {
                name: op.name.clone(),
            });
        }
        Ok(())
    }

    /// Validates a prospective channel and returns its type. `ignoring`
    /// names a channel whose current ports count as free (for rewiring).
    fn check_connectable(
        &self,
        src: OpId,
        src_port: u16,
        dst: OpId,
        dst_port: u16,
        ignoring: Option<ChannelId>,
    ) -> Result<DataType, GraphError> {
        let src_op = self.operation(src).ok_or(GraphError::OpNotFound { id: src })?;
        let dst_op = self.operation(dst).ok_or(GraphError::OpNotFound { id: dst })?;

        let out_ty = *src_op
            .outputs
            .get(src_port as usize)
            .ok_or(GraphError::PortOutOfRange {
                op: src_op.name.clone(),
                port: src_port,
                direction: PortDirection::Output,
                arity: src_op.outputs.len(),
            })?;
        let in_ty = *dst_op
            .inputs
            .get(dst_port as usize)
            .ok_or(GraphError::PortOutOfRange {
                op: dst_op.name.clone(),
                port: dst_port,
                direction: PortDirection::Input,
                arity: dst_op.inputs.len(),
            })?;
        if out_ty != in_ty {
            return Err(GraphError::TypeMismatch {
                op: dst_op.name.clone(),
                port: dst_port,
                direction: PortDirection::Input,
                expected: in_ty,
                actual: out_ty,
            });
        }

        if let Some(existing) = self.output_channel(src, src_port) {
            if Some(existing) != ignoring {
                return Err(GraphError::PortAlreadyConnected {
                    op: src_op.name.clone(),
                    port: src_port,
                    direction: PortDirection::Output,
                });
            }
        }
        if let Some(existing) = self.input_channel(dst, dst_port) {
            if Some(existing) != ignoring {
                return Err(GraphError::PortAlreadyConnected {
                    op: dst_op.name.clone(),
                    port: dst_port,
                    direction: PortDirection::Input,
                });
            }
        }
        Ok(out_ty)
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for CircuitGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "circuit '{}' ({} ops, {} channels, {} blocks)",
            self.name,
            self.op_count(),
            self.channel_count(),
            self.blocks.len()
        )?;
        for (id, op) in self.operations() {
            let block = self
                .blocks
                .get(op.block)
                .map(|b| b.name.as_str())
                .unwrap_or("?");
            write!(f, "  {} = {} @{}", op.name, op.kind, block)?;
            if op.speculative {
                write!(f, " [spec]")?;
            }
            let consumers: Vec<String> = self
                .out_channels(id)
                .into_iter()
                .filter_map(|ch| self.endpoints(ch))
                .map(|ends| {
                    let name = self
                        .operation(ends.dst)
                        .map(|o| o.name.as_str())
                        .unwrap_or("?");
                    format!("{}:{}", name, ends.dst_port)
                })
                .collect();
            if !consumers.is_empty() {
                write!(f, " -> {}", consumers.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
