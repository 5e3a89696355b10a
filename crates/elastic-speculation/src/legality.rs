//! Legality of a speculative region before any unit is inserted.
//!
//! A region is the speculator channel, a set of save channels and a set of
//! commit channels. It is legal when
//!
//! - the speculator dominates every save and commit, both over the dataflow
//!   graph and over the CFG,
//! - every path out of the speculator hits a commit before any observation
//!   point and never loops back into the speculator,
//! - every save and commit lies inside the region, and every path out of a
//!   save reaches a commit before its tokens are dropped.

use std::collections::{HashSet, VecDeque};

use elastic_core::{BlockId, ChannelId, CircuitGraph};

/// Channel positions of one speculative region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionPlan {
    pub speculator: ChannelId,
    pub saves: Vec<ChannelId>,
    pub commits: Vec<ChannelId>,
}

/// Checks a region, returning the first reason it is illegal.
pub fn check_region(graph: &CircuitGraph, plan: &RegionPlan) -> Result<(), String> {
    if plan.commits.is_empty() {
        return Err("no commit position".into());
    }
    let blocks = graph.blocks.dominators();
    let spec_block = producer_block(graph, plan.speculator)
        .ok_or_else(|| "speculator channel does not exist".to_string())?;

    for (role, channel) in roles(plan) {
        let block = producer_block(graph, channel)
            .ok_or_else(|| format!("{} channel {} does not exist", role, channel))?;
        if !graph.channel_dominates(plan.speculator, channel) || !blocks.dominates(spec_block, block)
        {
            return Err(format!(
                "speculator does not dominate {} at {}",
                role,
                describe(graph, channel)
            ));
        }
    }

    let region = walk_region(graph, plan)?;
    for (role, channel) in roles(plan) {
        if !region.contains(&channel) {
            return Err(format!(
                "{} at {} lies outside the region",
                role,
                describe(graph, channel)
            ));
        }
    }

    for &save in &plan.saves {
        check_save_paths(graph, save, &plan.commits)?;
    }
    Ok(())
}

/// Channels reachable from the speculator without crossing a commit. The
/// commit channels themselves are included when reached.
fn walk_region(graph: &CircuitGraph, plan: &RegionPlan) -> Result<HashSet<ChannelId>, String> {
    let mut seen: HashSet<ChannelId> = HashSet::from([plan.speculator]);
    let mut queue = VecDeque::from([plan.speculator]);
    while let Some(channel) = queue.pop_front() {
        if plan.commits.contains(&channel) {
            continue;
        }
        let Some(ends) = graph.endpoints(channel) else {
            continue;
        };
        let Some(consumer) = graph.operation(ends.dst) else {
            continue;
        };
        if consumer.kind.is_observation() {
            return Err(format!(
                "speculative data reaches '{}' before a commit",
                consumer.name
            ));
        }
        for next in graph.out_channels(ends.dst) {
            if next == plan.speculator {
                return Err(format!("region re-enters the speculator through '{}'", consumer.name));
            }
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    Ok(seen)
}

/// Every path from `save` must end in a commit. A consumer with no outputs
/// reached first drops the token uncommitted.
fn check_save_paths(
    graph: &CircuitGraph,
    save: ChannelId,
    commits: &[ChannelId],
) -> Result<(), String> {
    let mut seen: HashSet<ChannelId> = HashSet::from([save]);
    let mut queue = VecDeque::from([save]);
    let mut reached = false;
    while let Some(channel) = queue.pop_front() {
        if commits.contains(&channel) {
            reached = true;
            continue;
        }
        let Some(ends) = graph.endpoints(channel) else {
            continue;
        };
        let outputs = graph.out_channels(ends.dst);
        if outputs.is_empty() {
            let name = graph
                .operation(ends.dst)
                .map(|op| op.name.clone())
                .unwrap_or_else(|| ends.dst.to_string());
            return Err(format!(
                "save at {} drops data at '{}' before a commit",
                describe(graph, save),
                name
            ));
        }
        for next in outputs {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    if !reached {
        return Err(format!(
            "save at {} never reaches a commit",
            describe(graph, save)
        ));
    }
    Ok(())
}

fn roles(plan: &RegionPlan) -> impl Iterator<Item = (&'static str, ChannelId)> + '_ {
    plan.saves
        .iter()
        .map(|&c| ("save", c))
        .chain(plan.commits.iter().map(|&c| ("commit", c)))
}

fn producer_block(graph: &CircuitGraph, channel: ChannelId) -> Option<BlockId> {
    let ends = graph.endpoints(channel)?;
    graph.operation(ends.src).map(|op| op.block)
}

/// `producer:port` for messages.
pub(crate) fn describe(graph: &CircuitGraph, channel: ChannelId) -> String {
    crate::position::ChannelRef::of(graph, channel)
        .map(|r| r.to_string())
        .unwrap_or_else(|| channel.to_string())
}
