//! Translation of a circuit into a buffer placement integer program.
//!
//! Per channel `c`: an integer slot count `n_c` in `[min_slots, max_slots]`
//! (the slot cap when the channel has no limit) and a binary `o_c` that is 1
//! when the slots are opaque.
//!
//! - `n_c >= o_c`: an opaque buffer has at least one slot;
//! - `n_c <= cap * o_c` when transparent slots are forbidden;
//! - `o_c` is fixed to 0 when opaque slots are forbidden;
//! - every cycle without an opaque buffer gets `sum(o_c) >= 1`;
//! - every cycle gets `sum(o_c) <= floor(1 / target) - fixed_latency`, so a
//!   token goes around it in at most `1 / target` clock cycles;
//! - timing cuts `sum(o_c over a path) >= 1` are added lazily for every
//!   combinational path found to exceed the clock period.
//!
//! The objective minimizes the total number of slots.

use std::collections::{BTreeMap, HashSet};

use elastic_analysis::{Cycle, TimingConfig};
use elastic_core::{BufferSpec, BufferTiming, ChannelId, CircuitGraph, OpId};

use crate::error::BufferError;
use crate::model::{Assignment, Model, Relation, VarId};

/// The two decision variables of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelVars {
    pub slots: VarId,
    pub opaque: VarId,
    pub can_break: bool,
}

/// A buffer placement model tied to the graph it was built from.
#[derive(Debug, Clone)]
pub struct Formulation {
    pub model: Model,
    vars: BTreeMap<ChannelId, ChannelVars>,
    cuts: HashSet<Vec<ChannelId>>,
}

impl Formulation {
    /// Builds the model for `graph` with the given cycle set. Fails early
    /// on constraints that no assignment can meet.
    pub fn build(
        graph: &CircuitGraph,
        cycles: &[Cycle],
        config: &TimingConfig,
        slot_cap: u32,
    ) -> Result<Self, BufferError> {
        let channels = graph.channel_ids();
        let mut model = Model::new();

        // Declare opaque flags first: the solver branches in declaration
        // order and register choices dominate the search.
        let mut opaque = Vec::with_capacity(channels.len());
        for &channel in &channels {
            let props = channel_props(graph, channel)?;
            let upper = if props.can_break() { 1 } else { 0 };
            opaque.push(model.add_integer(format!("o{}", channel), 0, upper));
        }

        let mut vars = BTreeMap::new();
        for (&channel, &o) in channels.iter().zip(&opaque) {
            let props = channel_props(graph, channel)?;
            let cap = props.max_slots.unwrap_or(slot_cap.max(props.min_slots));
            if props.min_slots > cap {
                return Err(BufferError::structural(format!(
                    "channel {} requires {} slots but allows at most {}",
                    describe(graph, channel),
                    props.min_slots,
                    cap
                )));
            }
            let n = model.add_integer(format!("n{}", channel), props.min_slots as i64, cap as i64);
            model.add_constraint(format!("link{}", channel), vec![(n, 1), (o, -1)], Relation::Ge, 0);
            if !props.allow_transparent {
                model.add_constraint(
                    format!("opaque_only{}", channel),
                    vec![(n, 1), (o, -(cap as i64))],
                    Relation::Le,
                    0,
                );
            }
            vars.insert(
                channel,
                ChannelVars {
                    slots: n,
                    opaque: o,
                    can_break: props.can_break(),
                },
            );
        }

        for (_, operation) in graph.operations() {
            let delay = config.delays.delay(&operation.kind);
            if delay > config.clock_period {
                return Err(BufferError::structural(format!(
                    "operation '{}' alone takes {} which exceeds the clock period {}",
                    operation.name, delay, config.clock_period
                )));
            }
        }

        let max_latency = config.max_cycle_latency() as i64;
        for (index, cycle) in cycles.iter().enumerate() {
            let terms: Vec<(VarId, i64)> = cycle
                .channels
                .iter()
                .filter_map(|ch| vars.get(ch))
                .filter(|v| v.can_break)
                .map(|v| (v.opaque, 1))
                .collect();
            let needed = if cycle.broken { 0 } else { 1 };
            let room = max_latency - cycle.latency as i64;
            if !cycle.broken && terms.is_empty() {
                return Err(BufferError::structural(format!(
                    "cycle through {} has no channel that may hold an opaque buffer",
                    describe_ops(graph, &cycle.ops)
                )));
            }
            if room < needed {
                return Err(BufferError::structural(format!(
                    "cycle through {} needs latency {} but throughput {} allows {}",
                    describe_ops(graph, &cycle.ops),
                    cycle.latency as i64 + needed,
                    config.target_throughput,
                    max_latency
                )));
            }
            if needed > 0 {
                model.add_constraint(format!("break{}", index), terms.clone(), Relation::Ge, 1);
            }
            model.add_constraint(format!("rate{}", index), terms, Relation::Le, room);
        }

        model.minimize(vars.values().map(|v| (v.slots, 1)).collect());

        Ok(Formulation {
            model,
            vars,
            cuts: HashSet::new(),
        })
    }

    pub fn vars(&self, channel: ChannelId) -> Option<&ChannelVars> {
        self.vars.get(&channel)
    }

    pub fn timing_cuts(&self) -> usize {
        self.cuts.len()
    }

    /// Requires at least one register on `path`. Returns `false` if the
    /// same cut was already present. Fails when no channel on the path may
    /// hold an opaque buffer.
    pub fn add_timing_cut(
        &mut self,
        graph: &CircuitGraph,
        late: OpId,
        path: &[ChannelId],
    ) -> Result<bool, BufferError> {
        let breakable: Vec<ChannelId> = path
            .iter()
            .copied()
            .filter(|ch| self.vars.get(ch).map(|v| v.can_break).unwrap_or(false))
            .collect();
        if breakable.is_empty() {
            let name = graph
                .operation(late)
                .map(|op| op.name.as_str())
                .unwrap_or("?");
            return Err(BufferError::structural(format!(
                "critical path into '{}' exceeds the clock period and cannot be registered",
                name
            )));
        }
        if !self.cuts.insert(breakable.clone()) {
            return Ok(false);
        }
        let terms = breakable
            .iter()
            .filter_map(|ch| self.vars.get(ch))
            .map(|v| (v.opaque, 1))
            .collect();
        let index = self.cuts.len();
        self.model
            .add_constraint(format!("timing{}", index), terms, Relation::Ge, 1);
        Ok(true)
    }

    /// Channels registered (opaque) in an assignment.
    pub fn registered(&self, assignment: &Assignment) -> HashSet<ChannelId> {
        self.vars
            .iter()
            .filter(|(_, v)| assignment.value(v.opaque) == 1)
            .map(|(&ch, _)| ch)
            .collect()
    }

    /// Buffers to insert, ascending channel ID: every channel with at least
    /// one slot.
    pub fn decode(&self, assignment: &Assignment) -> Vec<(ChannelId, BufferSpec)> {
        self.vars
            .iter()
            .filter_map(|(&channel, v)| {
                let slots = assignment.value(v.slots);
                if slots < 1 {
                    return None;
                }
                let timing = if assignment.value(v.opaque) == 1 {
                    BufferTiming::Opaque
                } else {
                    BufferTiming::Transparent
                };
                Some((
                    channel,
                    BufferSpec {
                        slots: slots as u32,
                        timing,
                    },
                ))
            })
            .collect()
    }
}

fn channel_props(
    graph: &CircuitGraph,
    channel: ChannelId,
) -> Result<elastic_core::BufferProps, BufferError> {
    graph
        .channel(channel)
        .map(|c| c.props)
        .ok_or(BufferError::Graph(elastic_core::GraphError::ChannelNotFound { id: channel }))
}

/// `producer:port -> consumer:port` for messages.
pub(crate) fn describe(graph: &CircuitGraph, channel: ChannelId) -> String {
    let name = |op: OpId| {
        graph
            .operation(op)
            .map(|o| o.name.clone())
            .unwrap_or_else(|| op.to_string())
    };
    match graph.endpoints(channel) {
        Some(ends) => format!(
            "{}:{} -> {}:{}",
            name(ends.src),
            ends.src_port,
            name(ends.dst),
            ends.dst_port
        ),
        None => format!("#{}", channel),
    }
}

fn describe_ops(graph: &CircuitGraph, ops: &[OpId]) -> String {
    ops.iter()
        .filter_map(|&op| graph.operation(op).map(|o| format!("'{}'", o.name)))
        .collect::<Vec<_>>()
        .join(", ")
}
