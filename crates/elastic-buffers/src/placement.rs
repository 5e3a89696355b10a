//! Buffer placement: solve, then splice one buffer operation per channel
//! that received slots.
//!
//! All work happens on a staged copy of the graph which replaces the
//! caller's graph only once every buffer is in place, so an error at any
//! step leaves the input untouched.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use elastic_analysis::{analyze, enumerate_cycles, AnalysisReport, ArrivalTimes, Cycle, TimingConfig};
use elastic_core::{
    BufferSpec, BufferTiming, ChannelId, CircuitGraph, GraphError, OpId, OpKind, Operation,
};

use crate::error::BufferError;
use crate::formulation::{describe, Formulation};
use crate::solver::{BranchAndBound, MilpSolver, SolveBudget, SolveOutcome};

/// Which placement strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementAlgorithm {
    /// Integer program with cycle, throughput and lazy timing constraints.
    #[default]
    Milp,
    /// One opaque slot after every merge-like operation on a cycle. Does
    /// not enforce timing.
    OnMerges,
}

impl std::str::FromStr for PlacementAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "milp" => Ok(PlacementAlgorithm::Milp),
            "on_merges" | "on-merges" => Ok(PlacementAlgorithm::OnMerges),
            other => Err(format!(
                "unknown placement algorithm '{}', expected milp or on_merges",
                other
            )),
        }
    }
}

/// Options of the buffer placer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementOptions {
    pub algorithm: PlacementAlgorithm,
    /// Remove every existing buffer before placing.
    pub strip_existing: bool,
    /// Slot limit for channels without their own `max_slots`.
    pub slot_cap: u32,
    /// Search node budget per solve.
    pub max_nodes: u64,
    /// Wall-clock budget per solve, in milliseconds.
    pub time_limit_ms: Option<u64>,
    /// Maximum number of solve / timing-cut rounds.
    pub max_timing_rounds: u32,
}

impl Default for PlacementOptions {
    fn default() -> Self {
        PlacementOptions {
            algorithm: PlacementAlgorithm::Milp,
            strip_existing: false,
            slot_cap: 4,
            max_nodes: 200_000,
            time_limit_ms: None,
            max_timing_rounds: 64,
        }
    }
}

impl PlacementOptions {
    pub fn budget(&self) -> SolveBudget {
        SolveBudget {
            max_nodes: self.max_nodes,
            time_limit: self.time_limit_ms.map(Duration::from_millis),
        }
    }
}

/// One inserted buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedBuffer {
    pub name: String,
    pub producer: String,
    pub port: u16,
    pub slots: u32,
    pub timing: BufferTiming,
}

/// Outcome of a successful placement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacementReport {
    pub algorithm: PlacementAlgorithm,
    pub buffers: Vec<PlacedBuffer>,
    pub total_slots: u32,
    /// `false` when the solver ran out of budget and its incumbent was used,
    /// and always `false` for the heuristic.
    pub proven_optimal: bool,
    pub timing_rounds: u32,
    pub stripped: usize,
}

/// Places buffers with the built-in solver.
pub fn place_buffers(
    graph: &mut CircuitGraph,
    config: &TimingConfig,
    options: &PlacementOptions,
) -> Result<PlacementReport, BufferError> {
    place_buffers_with(graph, config, options, &BranchAndBound)
}

/// Places buffers with the given solver.
pub fn place_buffers_with<S: MilpSolver + ?Sized>(
    graph: &mut CircuitGraph,
    config: &TimingConfig,
    options: &PlacementOptions,
    solver: &S,
) -> Result<PlacementReport, BufferError> {
    config.validate()?;
    graph.validate()?;

    let mut staged = graph.clone();
    let stripped = if options.strip_existing {
        strip_buffers(&mut staged)?
    } else {
        0
    };
    let cycles = enumerate_cycles(&staged, config)?;

    let (decisions, proven_optimal, timing_rounds) = match options.algorithm {
        PlacementAlgorithm::Milp => solve_milp(&staged, &cycles, config, options, solver)?,
        PlacementAlgorithm::OnMerges => (on_merges(&staged, &cycles)?, false, 0),
    };

    let buffers = insert_all(&mut staged, &decisions)?;
    *graph = staged;

    let total_slots = buffers.iter().map(|b| b.slots).sum();
    info!(
        circuit = graph.name(),
        algorithm = ?options.algorithm,
        buffers = buffers.len(),
        total_slots,
        proven_optimal,
        timing_rounds,
        "buffer placement complete"
    );
    Ok(PlacementReport {
        algorithm: options.algorithm,
        buffers,
        total_slots,
        proven_optimal,
        timing_rounds,
        stripped,
    })
}

type Decisions = Vec<(ChannelId, BufferSpec)>;

fn solve_milp<S: MilpSolver + ?Sized>(
    graph: &CircuitGraph,
    cycles: &[Cycle],
    config: &TimingConfig,
    options: &PlacementOptions,
    solver: &S,
) -> Result<(Decisions, bool, u32), BufferError> {
    let mut formulation = Formulation::build(graph, cycles, config, options.slot_cap)?;
    let budget = options.budget();

    for round in 1..=options.max_timing_rounds {
        let (assignment, optimal) = match solver.solve(&formulation.model, &budget) {
            SolveOutcome::Optimal(a) => (a, true),
            SolveOutcome::BudgetExhausted { best: Some(a) } => {
                warn!(
                    solver = solver.name(),
                    round, "solve budget exhausted, using best placement found"
                );
                (a, false)
            }
            SolveOutcome::BudgetExhausted { best: None } => {
                return Err(BufferError::budget(format!(
                    "no placement found within {} nodes",
                    budget.max_nodes
                )));
            }
            SolveOutcome::Infeasible => {
                return Err(BufferError::structural(format!(
                    "no placement meets clock period {} at throughput {}",
                    config.clock_period, config.target_throughput
                )));
            }
        };

        let registers = formulation.registered(&assignment);
        let arrivals =
            ArrivalTimes::with_registers(graph, &config.delays, |ch| registers.contains(&ch));
        let violations = arrivals.violations(config.clock_period);
        if violations.is_empty() {
            return Ok((formulation.decode(&assignment), optimal, round));
        }

        let mut added = 0;
        for (op, time) in violations {
            let path = arrivals.critical_path(graph, op);
            debug!(round, op = %op, time, path = path.len(), "timing violation");
            if formulation.add_timing_cut(graph, op, &path)? {
                added += 1;
            }
        }
        if added == 0 {
            return Err(BufferError::structural(
                "timing violations persist with every critical path already cut",
            ));
        }
    }
    Err(BufferError::budget(format!(
        "timing not met after {} solve rounds",
        options.max_timing_rounds
    )))
}

/// One opaque slot on the outgoing cycle channel of every merge-like
/// operation, then one on the first breakable channel of any cycle still
/// unbroken. Channels with `min_slots` get at least that many slots.
fn on_merges(graph: &CircuitGraph, cycles: &[Cycle]) -> Result<Decisions, BufferError> {
    let mut chosen: BTreeMap<ChannelId, BufferSpec> = BTreeMap::new();
    let opaque = BufferSpec {
        slots: 1,
        timing: BufferTiming::Opaque,
    };
    let breakable = |ch: ChannelId| {
        graph
            .channel(ch)
            .map(|c| c.props.can_break())
            .unwrap_or(false)
    };

    for cycle in cycles.iter().filter(|c| !c.broken) {
        for (&op, &channel) in cycle.ops.iter().zip(&cycle.channels) {
            let merge_like = graph
                .operation(op)
                .map(|o| o.kind.is_merge_like())
                .unwrap_or(false);
            if merge_like && breakable(channel) {
                chosen.insert(channel, opaque);
            }
        }
    }
    for cycle in cycles.iter().filter(|c| !c.broken) {
        if cycle.channels.iter().any(|ch| chosen.contains_key(ch)) {
            continue;
        }
        let Some(&channel) = cycle.channels.iter().find(|&&ch| breakable(ch)) else {
            return Err(BufferError::structural(format!(
                "cycle through {} cannot be broken",
                describe(graph, cycle.channels[0])
            )));
        };
        chosen.insert(channel, opaque);
    }

    for channel in graph.channel_ids() {
        let Some(props) = graph.channel(channel).map(|c| c.props) else {
            continue;
        };
        if props.min_slots == 0 {
            continue;
        }
        let entry = chosen.entry(channel).or_insert(BufferSpec {
            slots: props.min_slots,
            timing: if props.allow_transparent {
                BufferTiming::Transparent
            } else {
                BufferTiming::Opaque
            },
        });
        entry.slots = entry.slots.max(props.min_slots);
    }
    Ok(chosen.into_iter().collect())
}

/// Splices the decided buffers, each in its producer's block.
fn insert_all(
    graph: &mut CircuitGraph,
    decisions: &[(ChannelId, BufferSpec)],
) -> Result<Vec<PlacedBuffer>, BufferError> {
    let mut placed = Vec::with_capacity(decisions.len());
    for &(channel, spec) in decisions {
        let ends = graph
            .endpoints(channel)
            .ok_or(GraphError::ChannelNotFound { id: channel })?;
        let producer = graph
            .operation(ends.src)
            .ok_or(GraphError::OpNotFound { id: ends.src })?;
        let block = producer.block;
        let producer_name = producer.name.clone();
        let ty = graph
            .channel(channel)
            .map(|c| c.ty)
            .ok_or(GraphError::ChannelNotFound { id: channel })?;

        let name = graph.unique_name("buffer");
        graph.splice(
            channel,
            Operation::buffer(name.clone(), block, ty, spec.slots, spec.timing),
        )?;
        debug!(buffer = %name, producer = %producer_name, port = ends.src_port, slots = spec.slots, timing = %spec.timing, "inserted buffer");
        placed.push(PlacedBuffer {
            name,
            producer: producer_name,
            port: ends.src_port,
            slots: spec.slots,
            timing: spec.timing,
        });
    }
    Ok(placed)
}

/// Removes every buffer operation, reconnecting its neighbours. Returns the
/// number removed.
pub fn strip_buffers(graph: &mut CircuitGraph) -> Result<usize, BufferError> {
    let buffers: Vec<OpId> = graph
        .operations()
        .filter(|(_, op)| matches!(op.kind, OpKind::Buffer { .. }))
        .map(|(id, _)| id)
        .collect();
    for &id in &buffers {
        graph.remove_passthrough(id)?;
    }
    debug!(count = buffers.len(), "stripped existing buffers");
    Ok(buffers.len())
}

/// Re-analyzes a placed circuit: every cycle must hold an opaque buffer,
/// every cycle must meet the throughput target and no operation may settle
/// after the clock period.
pub fn verify_placement(
    graph: &CircuitGraph,
    config: &TimingConfig,
) -> Result<AnalysisReport, BufferError> {
    let report = analyze(graph, config)?;
    if let Some(cycle) = report.unbroken_cycles().next() {
        return Err(BufferError::Verification(format!(
            "cycle through {} has no opaque buffer",
            describe(graph, cycle.channels[0])
        )));
    }
    let max_latency = config.max_cycle_latency();
    if let Some(cycle) = report.cycles.iter().find(|c| c.latency > max_latency) {
        return Err(BufferError::Verification(format!(
            "cycle through {} has latency {} above {}",
            describe(graph, cycle.channels[0]),
            cycle.latency,
            max_latency
        )));
    }
    if let Some(&(op, time)) = report.timing_violations().first() {
        let name = graph
            .operation(op)
            .map(|o| o.name.clone())
            .unwrap_or_default();
        return Err(BufferError::Verification(format!(
            "operation '{}' settles at {} after the clock period {}",
            name, time, config.clock_period
        )));
    }
    Ok(report)
}
