//! Elementary cycle enumeration.
//!
//! Cycles are enumerated per strongly connected component. For each start
//! operation (ascending ID) a depth-first search follows channels in port
//! order through operations with a larger ID that can still reach the start,
//! so each elementary cycle is reported exactly once, rooted at its smallest
//! operation.

use std::collections::{BTreeSet, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use serde::Serialize;
use tracing::debug;

use elastic_core::{ChannelId, CircuitGraph, OpId};

use crate::config::TimingConfig;
use crate::error::AnalysisError;

/// One elementary cycle of the circuit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cycle {
    /// Channels in traversal order, starting at the smallest operation.
    pub channels: Vec<ChannelId>,
    /// Producer of each channel, same order.
    pub ops: Vec<OpId>,
    /// Opaque buffers on the cycle plus the latency of its operations.
    pub latency: u32,
    /// Whether an opaque buffer already sits on the cycle.
    pub broken: bool,
}

impl Cycle {
    pub fn contains_channel(&self, channel: ChannelId) -> bool {
        self.channels.contains(&channel)
    }

    pub fn contains_op(&self, op: OpId) -> bool {
        self.ops.contains(&op)
    }
}

/// Enumerates every elementary cycle, failing once more than
/// `config.max_cycles` have been found.
pub fn enumerate_cycles(
    graph: &CircuitGraph,
    config: &TimingConfig,
) -> Result<Vec<Cycle>, AnalysisError> {
    let mut cycles = Vec::new();
    for component in tarjan_scc(graph.raw()) {
        let members: BTreeSet<OpId> = component.into_iter().map(OpId::from).collect();
        if members.len() == 1 {
            let only = members.iter().next().copied();
            let self_loop = only
                .map(|op| graph.successors(op).contains(&op))
                .unwrap_or(false);
            if !self_loop {
                continue;
            }
        }
        enumerate_component(graph, &members, config, &mut cycles)?;
    }
    cycles.sort_by(|a, b| (&a.ops[0], &a.channels).cmp(&(&b.ops[0], &b.channels)));
    debug!(count = cycles.len(), "enumerated elementary cycles");
    Ok(cycles)
}

struct Frame {
    op: OpId,
    outs: Vec<ChannelId>,
    next: usize,
}

fn enumerate_component(
    graph: &CircuitGraph,
    members: &BTreeSet<OpId>,
    config: &TimingConfig,
    out: &mut Vec<Cycle>,
) -> Result<(), AnalysisError> {
    for &start in members {
        let allowed: BTreeSet<OpId> = members.range(start..).copied().collect();
        let live = reaching(graph, start, &allowed);
        let outs = |op: OpId| -> Vec<ChannelId> {
            graph
                .out_channels(op)
                .into_iter()
                .filter(|&ch| {
                    graph
                        .endpoints(ch)
                        .map(|ends| live.contains(&ends.dst))
                        .unwrap_or(false)
                })
                .collect()
        };

        let mut stack = vec![Frame {
            op: start,
            outs: outs(start),
            next: 0,
        }];
        let mut path: Vec<ChannelId> = Vec::new();
        let mut on_path: HashSet<OpId> = HashSet::from([start]);

        while let Some(frame) = stack.last_mut() {
            let Some(&channel) = frame.outs.get(frame.next) else {
                let done = frame.op;
                stack.pop();
                on_path.remove(&done);
                path.pop();
                continue;
            };
            frame.next += 1;

            let Some(ends) = graph.endpoints(channel) else {
                continue;
            };
            if ends.dst == start {
                let mut channels = path.clone();
                channels.push(channel);
                out.push(build_cycle(graph, config, channels));
                if out.len() > config.max_cycles {
                    return Err(AnalysisError::TooManyCycles {
                        cap: config.max_cycles,
                    });
                }
            } else if on_path.insert(ends.dst) {
                path.push(channel);
                stack.push(Frame {
                    op: ends.dst,
                    outs: outs(ends.dst),
                    next: 0,
                });
            }
        }
    }
    Ok(())
}

/// Operations in `allowed` that can reach `target` without leaving `allowed`.
fn reaching(graph: &CircuitGraph, target: OpId, allowed: &BTreeSet<OpId>) -> HashSet<OpId> {
    let mut seen = HashSet::from([target]);
    let mut queue = VecDeque::from([target]);
    while let Some(op) = queue.pop_front() {
        for pred in graph.predecessors(op) {
            if allowed.contains(&pred) && seen.insert(pred) {
                queue.push_back(pred);
            }
        }
    }
    seen
}

fn build_cycle(graph: &CircuitGraph, config: &TimingConfig, channels: Vec<ChannelId>) -> Cycle {
    let ops: Vec<OpId> = channels
        .iter()
        .filter_map(|&ch| graph.endpoints(ch).map(|ends| ends.src))
        .collect();
    let mut latency = 0;
    let mut broken = false;
    for op in ops.iter().filter_map(|&id| graph.operation(id)) {
        if op.kind.is_opaque_buffer() {
            broken = true;
            latency += 1;
        } else {
            latency += config.delays.latency(&op.kind);
        }
    }
    Cycle {
        channels,
        ops,
        latency,
        broken,
    }
}
