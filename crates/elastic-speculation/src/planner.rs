//! Speculator, save and commit placement.
//!
//! Explicit mode takes the three position lists as given. Automatic mode
//! derives the saves and commits from the speculator alone:
//!
//! - saves go on the channels where the region first leaves the
//!   speculator's basic block or closes a loop, found breadth-first,
//! - commits go on the first legal reconvergence point in breadth-first
//!   order: a single channel reachable from every save, or failing that the
//!   region inputs of one operation reachable from every save.
//!
//! Either way the region is checked before any unit is inserted, and the
//! graph is only replaced once every insertion has succeeded.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use elastic_core::{ChannelId, CircuitGraph, GraphError, OpId, OpKind, Operation};

use crate::error::SpeculationError;
use crate::legality::{check_region, describe, RegionPlan};
use crate::position::{ChannelRef, PositionList};

/// How speculation positions are chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SpeculationMode {
    Explicit(PositionList),
    Automatic {
        speculator: ChannelRef,
    },
}

impl SpeculationMode {
    pub fn speculator(&self) -> &ChannelRef {
        match self {
            SpeculationMode::Explicit(positions) => &positions.speculator,
            SpeculationMode::Automatic { speculator } => speculator,
        }
    }
}

/// Names of the inserted units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeculationReport {
    pub speculator: String,
    pub saves: Vec<String>,
    pub commits: Vec<String>,
}

/// Resolves and checks the region without touching the graph.
pub fn plan_speculation(
    graph: &CircuitGraph,
    mode: &SpeculationMode,
) -> Result<RegionPlan, SpeculationError> {
    let speculator_ref = mode.speculator();
    let speculator = speculator_ref.resolve(graph)?;
    let illegal = |reason: String| SpeculationError::Legality {
        speculator: speculator_ref.to_string(),
        reason,
    };

    match mode {
        SpeculationMode::Explicit(positions) => {
            let plan = RegionPlan {
                speculator,
                saves: resolve_all(graph, &positions.saves)?,
                commits: resolve_all(graph, &positions.commits)?,
            };
            check_region(graph, &plan).map_err(illegal)?;
            Ok(plan)
        }
        SpeculationMode::Automatic { .. } => {
            let saves = automatic_saves(graph, speculator);
            debug!(speculator = %speculator_ref, saves = saves.len(), "derived save positions");
            let mut last_reason = None;
            for commits in commit_candidates(graph, speculator, &saves) {
                let plan = RegionPlan {
                    speculator,
                    saves: saves.clone(),
                    commits,
                };
                match check_region(graph, &plan) {
                    Ok(()) => return Ok(plan),
                    Err(reason) => last_reason = Some(reason),
                }
            }
            Err(illegal(match last_reason {
                Some(reason) => format!("no legal commit point ({})", reason),
                None => "no reconvergence point after the saves".into(),
            }))
        }
    }
}

/// Plans the region and splices the units into `graph`.
pub fn insert_speculation(
    graph: &mut CircuitGraph,
    mode: &SpeculationMode,
) -> Result<SpeculationReport, SpeculationError> {
    let plan = plan_speculation(graph, mode)?;
    let mut staged = graph.clone();
    let mut split: HashMap<ChannelId, ChannelId> = HashMap::new();

    let speculator = splice_unit(&mut staged, &mut split, plan.speculator, OpKind::Speculator)?;
    let mut saves = Vec::with_capacity(plan.saves.len());
    for &channel in &plan.saves {
        saves.push(splice_unit(&mut staged, &mut split, channel, OpKind::Save)?);
    }
    let mut commits = Vec::with_capacity(plan.commits.len());
    for &channel in &plan.commits {
        commits.push(splice_unit(&mut staged, &mut split, channel, OpKind::Commit)?);
    }

    *graph = staged;
    info!(
        speculator = %speculator,
        saves = saves.len(),
        commits = commits.len(),
        "inserted speculation units"
    );
    Ok(SpeculationReport {
        speculator,
        saves,
        commits,
    })
}

fn resolve_all(
    graph: &CircuitGraph,
    refs: &[ChannelRef],
) -> Result<Vec<ChannelId>, SpeculationError> {
    let mut seen = IndexSet::new();
    for reference in refs {
        if !seen.insert(reference.resolve(graph)?) {
            return Err(SpeculationError::Config {
                reference: reference.to_string(),
                reason: "position listed twice".into(),
            });
        }
    }
    Ok(seen.into_iter().collect())
}

/// Splices one unit into `channel`, or into its downstream half when an
/// earlier unit already split it. The unit lives in its producer's block.
fn splice_unit(
    graph: &mut CircuitGraph,
    split: &mut HashMap<ChannelId, ChannelId>,
    channel: ChannelId,
    kind: OpKind,
) -> Result<String, SpeculationError> {
    let mut current = channel;
    while let Some(&next) = split.get(&current) {
        current = next;
    }
    let ends = graph
        .endpoints(current)
        .ok_or(GraphError::ChannelNotFound { id: current })?;
    let ty = graph
        .channel(current)
        .map(|c| c.ty)
        .ok_or(GraphError::ChannelNotFound { id: current })?;
    let block = graph
        .operation(ends.src)
        .map(|op| op.block)
        .ok_or(GraphError::OpNotFound { id: ends.src })?;

    let name = graph.unique_name(kind.name());
    let splice = graph.splice(current, Operation::passthrough(name.clone(), kind, block, ty))?;
    split.insert(current, splice.downstream);
    Ok(name)
}

// ---------------------------------------------------------------------------
// Automatic positions
// ---------------------------------------------------------------------------

/// Breadth-first from the speculator. A channel that leaves its producer's
/// block or is a loop back-edge becomes a save and the search stops there.
fn automatic_saves(graph: &CircuitGraph, speculator: ChannelId) -> Vec<ChannelId> {
    let back_edges = graph.back_edges();
    let mut saves = IndexSet::new();
    let mut seen: HashSet<ChannelId> = HashSet::from([speculator]);
    let mut queue = VecDeque::from([speculator]);
    while let Some(channel) = queue.pop_front() {
        let Some(ends) = graph.endpoints(channel) else {
            continue;
        };
        for next in graph.out_channels(ends.dst) {
            if !seen.insert(next) {
                continue;
            }
            if crosses_block(graph, next) || back_edges.contains(&next) {
                saves.insert(next);
            } else {
                queue.push_back(next);
            }
        }
    }
    saves.into_iter().collect()
}

fn crosses_block(graph: &CircuitGraph, channel: ChannelId) -> bool {
    let Some(ends) = graph.endpoints(channel) else {
        return false;
    };
    match (graph.operation(ends.src), graph.operation(ends.dst)) {
        (Some(src), Some(dst)) => src.block != dst.block,
        _ => false,
    }
}

/// Commit sets to try, in order: every single channel reachable from all
/// saves, then the region inputs of every operation reachable from all
/// saves. Both lists follow breadth-first order from the speculator and
/// skip the speculator and save channels.
fn commit_candidates(
    graph: &CircuitGraph,
    speculator: ChannelId,
    saves: &[ChannelId],
) -> Vec<Vec<ChannelId>> {
    let order = bfs_channels(graph, speculator);
    let in_region: BTreeSet<ChannelId> = order.iter().copied().collect();
    let reach: Vec<(ChannelId, HashSet<OpId>)> = saves
        .iter()
        .filter_map(|&save| {
            let ends = graph.endpoints(save)?;
            Some((save, graph.reachable_from(&[ends.dst], None)))
        })
        .collect();
    let after_every_save = |channel: ChannelId| {
        graph.endpoints(channel).is_some_and(|ends| {
            reach
                .iter()
                .all(|(save, ops)| *save == channel || ops.contains(&ends.src))
        })
    };

    let eligible: Vec<ChannelId> = order
        .iter()
        .copied()
        .filter(|&c| c != speculator && !saves.contains(&c))
        .collect();
    let mut candidates: Vec<Vec<ChannelId>> = eligible
        .iter()
        .copied()
        .filter(|&c| after_every_save(c))
        .map(|c| vec![c])
        .collect();

    let mut consumers = IndexSet::new();
    for &channel in &eligible {
        if let Some(ends) = graph.endpoints(channel) {
            consumers.insert(ends.dst);
        }
    }
    for op in consumers {
        if !reach.iter().all(|(_, ops)| ops.contains(&op)) {
            continue;
        }
        let inputs: Vec<ChannelId> = graph
            .in_channels(op)
            .into_iter()
            .filter(|c| in_region.contains(c) && *c != speculator && !saves.contains(c))
            .collect();
        if inputs.len() > 1 {
            candidates.push(inputs);
        }
    }
    candidates
}

fn bfs_channels(graph: &CircuitGraph, start: ChannelId) -> Vec<ChannelId> {
    let mut order = vec![start];
    let mut seen: HashSet<ChannelId> = HashSet::from([start]);
    let mut head = 0;
    while let Some(&channel) = order.get(head) {
        head += 1;
        let Some(ends) = graph.endpoints(channel) else {
            continue;
        };
        for next in graph.out_channels(ends.dst) {
            if seen.insert(next) {
                order.push(next);
            }
        }
    }
    order
}

/// Positions of a plan as external references, for logs and reports.
pub fn describe_plan(graph: &CircuitGraph, plan: &RegionPlan) -> String {
    let list = |channels: &[ChannelId]| {
        channels
            .iter()
            .map(|&c| describe(graph, c))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "speculator {}; saves [{}]; commits [{}]",
        describe(graph, plan.speculator),
        list(&plan.saves),
        list(&plan.commits)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use elastic_core::DataType;

    /// x -> f -> {a, b} -> end, all in one block.
    fn forked() -> CircuitGraph {
        let mut g = CircuitGraph::new("forked");
        let bb = g.add_block("bb0");
        let ty = DataType::I32;
        let x = g
            .add_operation(Operation::new("x", OpKind::Argument { index: 0 }, bb, [], [ty]))
            .unwrap();
        let f = g.add_operation(Operation::fork("f", bb, ty, 2)).unwrap();
        let a = g
            .add_operation(Operation::passthrough("a", OpKind::Cast, bb, ty))
            .unwrap();
        let b = g
            .add_operation(Operation::passthrough("b", OpKind::Cast, bb, ty))
            .unwrap();
        let end = g
            .add_operation(Operation::new("end", OpKind::End { size: 2 }, bb, [ty, ty], []))
            .unwrap();
        g.connect(x, 0, f, 0).unwrap();
        g.connect(f, 0, a, 0).unwrap();
        g.connect(f, 1, b, 0).unwrap();
        g.connect(a, 0, end, 0).unwrap();
        g.connect(b, 0, end, 1).unwrap();
        g
    }

    fn explicit(spec: &str, saves: &[&str], commits: &[&str]) -> SpeculationMode {
        let parse = |s: &&str| s.parse::<ChannelRef>().unwrap();
        SpeculationMode::Explicit(PositionList {
            speculator: spec.parse().unwrap(),
            saves: saves.iter().map(parse).collect(),
            commits: commits.iter().map(parse).collect(),
        })
    }

    #[test]
    fn explicit_insertion_splices_in_order() {
        let mut g = forked();
        let report =
            insert_speculation(&mut g, &explicit("x:0", &["f:0"], &["a:0", "b:0"])).unwrap();
        assert_eq!(report.speculator, "speculator0");
        assert_eq!(report.saves, vec!["save0"]);
        assert_eq!(report.commits, vec!["commit0", "commit1"]);
        assert!(g.validate().is_ok());

        let spec = g.find_op("speculator0").unwrap();
        let x = g.find_op("x").unwrap();
        let f = g.find_op("f").unwrap();
        assert_eq!(g.successors(x), vec![spec]);
        assert_eq!(g.successors(spec), vec![f]);
        assert_eq!(g.op_count(), 9);
    }

    #[test]
    fn repeated_channel_splits_downstream_half() {
        let mut g = forked();
        insert_speculation(&mut g, &explicit("a:0", &["a:0"], &["a:0"])).unwrap();
        let a = g.find_op("a").unwrap();
        let spec = g.find_op("speculator0").unwrap();
        let save = g.find_op("save0").unwrap();
        let commit = g.find_op("commit0").unwrap();
        let end = g.find_op("end").unwrap();
        assert_eq!(g.successors(a), vec![spec]);
        assert_eq!(g.successors(spec), vec![save]);
        assert_eq!(g.successors(save), vec![commit]);
        assert_eq!(g.successors(commit), vec![end]);
    }

    #[test]
    fn failures_leave_graph_untouched() {
        let mut g = forked();
        let before = g.fingerprint();

        let err = insert_speculation(&mut g, &explicit("ghost:0", &[], &["a:0"])).unwrap_err();
        assert!(matches!(err, SpeculationError::Config { ref reference, .. } if reference == "ghost:0"));

        let err = insert_speculation(&mut g, &explicit("x:0", &[], &["a:0"])).unwrap_err();
        assert!(matches!(err, SpeculationError::Legality { ref speculator, .. } if speculator == "x:0"));

        let err =
            insert_speculation(&mut g, &explicit("x:0", &[], &["a:0", "a:0", "b:0"])).unwrap_err();
        assert!(err.to_string().contains("listed twice"));

        assert_eq!(g.fingerprint(), before);
    }

    #[test]
    fn automatic_in_one_block_commits_at_the_join() {
        let g = forked();
        let mode = SpeculationMode::Automatic {
            speculator: ChannelRef::new("x", 0),
        };
        let plan = plan_speculation(&g, &mode).unwrap();
        assert!(plan.saves.is_empty());
        // No single channel after the fork is on every exit, so the commits
        // land on the region inputs of `end`.
        assert_eq!(
            describe_plan(&g, &plan),
            "speculator x:0; saves []; commits [a:0, b:0]"
        );
    }

    #[test]
    fn mode_json_is_tagged() {
        let mode: SpeculationMode = serde_json::from_str(
            r#"{"mode": "automatic", "speculator": {"op": "x", "port": 0}}"#,
        )
        .unwrap();
        assert_eq!(mode.speculator(), &ChannelRef::new("x", 0));

        let mode: SpeculationMode = serde_json::from_str(
            r#"{"mode": "explicit", "speculator": {"op": "x", "port": 0},
                "commits": [{"op": "a", "port": 0}]}"#,
        )
        .unwrap();
        assert!(matches!(mode, SpeculationMode::Explicit(ref positions) if positions.commits.len() == 1));
    }
}
