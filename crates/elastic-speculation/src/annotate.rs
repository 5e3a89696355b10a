//! Speculative region membership.
//!
//! Recomputes the `speculative` marker of every operation from the
//! speculation units present in the graph. Membership is derived in full
//! before any marker changes, so annotating twice gives the same graph.

use std::collections::{BTreeSet, HashSet, VecDeque};

use serde::Serialize;
use tracing::debug;

use elastic_core::{CircuitGraph, OpId, OpKind};

use crate::error::SpeculationError;

/// Members of one region, by operation name in ID order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionSummary {
    pub speculator: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotationReport {
    pub regions: Vec<RegionSummary>,
    /// Operations marked in total.
    pub marked: usize,
}

/// Marks every operation inside a speculative region and clears the marker
/// everywhere else.
pub fn annotate_regions(graph: &mut CircuitGraph) -> Result<AnnotationReport, SpeculationError> {
    let speculators: Vec<OpId> = graph
        .operations()
        .filter(|(_, op)| op.kind == OpKind::Speculator)
        .map(|(id, _)| id)
        .collect();

    let mut regions = Vec::with_capacity(speculators.len());
    let mut marked: BTreeSet<OpId> = BTreeSet::new();
    for speculator in speculators {
        let members = region_of(graph, speculator)?;
        let summary = RegionSummary {
            speculator: op_name(graph, speculator),
            members: members.iter().map(|&id| op_name(graph, id)).collect(),
        };
        debug!(speculator = %summary.speculator, members = members.len(), "region");
        marked.extend(members);
        regions.push(summary);
    }

    for id in graph.op_ids() {
        graph.set_speculative(id, marked.contains(&id))?;
    }
    Ok(AnnotationReport {
        regions,
        marked: marked.len(),
    })
}

/// The speculator, everything it reaches before a commit, and the commits
/// reached. The walk starts at the speculator unit, so its producer is not a
/// member. Every path out of a save inside the region must end in a commit,
/// never at an observation point or an operation without outputs.
fn region_of(graph: &CircuitGraph, speculator: OpId) -> Result<BTreeSet<OpId>, SpeculationError> {
    let inconsistent = |reason: String| SpeculationError::Inconsistent {
        speculator: op_name(graph, speculator),
        reason,
    };

    let walk = walk_to_commits(graph, speculator);
    if let Some(observer) = walk.observed {
        return Err(inconsistent(format!(
            "speculative data reaches '{}' without a commit",
            op_name(graph, observer)
        )));
    }

    for &member in &walk.visited {
        let is_save = graph
            .operation(member)
            .is_some_and(|op| op.kind == OpKind::Save);
        if !is_save {
            continue;
        }
        let from_save = walk_to_commits(graph, member);
        if let Some(observer) = from_save.observed {
            return Err(inconsistent(format!(
                "save '{}' reaches '{}' without a commit",
                op_name(graph, member),
                op_name(graph, observer)
            )));
        }
        if let Some(dropped) = from_save.dead_end {
            return Err(inconsistent(format!(
                "save '{}' drops data at '{}' before a commit",
                op_name(graph, member),
                op_name(graph, dropped)
            )));
        }
        if from_save.commits == 0 {
            return Err(inconsistent(format!(
                "save '{}' never reaches a commit",
                op_name(graph, member)
            )));
        }
    }
    Ok(walk.visited)
}

struct Walk {
    visited: BTreeSet<OpId>,
    commits: usize,
    observed: Option<OpId>,
    /// First non-commit operation reached that has no successors.
    dead_end: Option<OpId>,
}

/// Forward walk from `start` that includes but does not pass commit units.
fn walk_to_commits(graph: &CircuitGraph, start: OpId) -> Walk {
    let mut walk = Walk {
        visited: BTreeSet::from([start]),
        commits: 0,
        observed: None,
        dead_end: None,
    };
    let mut seen: HashSet<OpId> = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(op) = queue.pop_front() {
        let successors = graph.successors(op);
        if successors.is_empty() {
            walk.dead_end.get_or_insert(op);
        }
        for next in successors {
            if !seen.insert(next) {
                continue;
            }
            let Some(operation) = graph.operation(next) else {
                continue;
            };
            if operation.kind == OpKind::Commit {
                walk.visited.insert(next);
                walk.commits += 1;
            } else if operation.kind.is_observation() {
                walk.observed.get_or_insert(next);
            } else {
                walk.visited.insert(next);
                queue.push_back(next);
            }
        }
    }
    walk
}

fn op_name(graph: &CircuitGraph, id: OpId) -> String {
    graph
        .operation(id)
        .map(|op| op.name.clone())
        .unwrap_or_else(|| id.to_string())
}
