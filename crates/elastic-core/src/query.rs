//! Structural queries over a [`CircuitGraph`]: cycle membership, loop
//! back-edges, reachability and dominance.
//!
//! All traversals visit operations and channels in ascending ID order so
//! their results are deterministic across runs.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use petgraph::algo::has_path_connecting;

use crate::graph::CircuitGraph;
use crate::id::{ChannelId, OpId};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

impl CircuitGraph {
    /// Returns `true` if the channel lies on at least one directed cycle.
    pub fn is_on_cycle(&self, channel: ChannelId) -> bool {
        match self.endpoints(channel) {
            Some(ends) => {
                ends.src == ends.dst
                    || has_path_connecting(self.raw(), ends.dst.into(), ends.src.into(), None)
            }
            None => false,
        }
    }

    /// Channels closing a loop, found by depth-first search from the entry
    /// operations in ID order (then from any operation not yet visited).
    /// A channel is a back-edge when it targets an operation still on the
    /// DFS stack.
    pub fn back_edges(&self) -> BTreeSet<ChannelId> {
        let mut marks: HashMap<OpId, Mark> = HashMap::new();
        let mut back = BTreeSet::new();

        let roots = self.entry_ops().into_iter().chain(self.op_ids());
        for root in roots {
            if marks.contains_key(&root) {
                continue;
            }
            marks.insert(root, Mark::OnStack);
            let mut stack: Vec<(OpId, Vec<ChannelId>, usize)> =
                vec![(root, self.out_channels(root), 0)];

            while let Some(frame) = stack.last_mut() {
                let op = frame.0;
                let next = frame.1.get(frame.2).copied();
                frame.2 += 1;

                let Some(channel) = next else {
                    marks.insert(op, Mark::Done);
                    stack.pop();
                    continue;
                };
                let Some(ends) = self.endpoints(channel) else {
                    continue;
                };
                match marks.get(&ends.dst) {
                    Some(Mark::OnStack) => {
                        back.insert(channel);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(ends.dst, Mark::OnStack);
                        stack.push((ends.dst, self.out_channels(ends.dst), 0));
                    }
                }
            }
        }
        back
    }

    /// Operations reachable from `roots`, never traversing `blocked`.
    /// The roots themselves are included.
    pub fn reachable_from(&self, roots: &[OpId], blocked: Option<ChannelId>) -> HashSet<OpId> {
        let mut seen: HashSet<OpId> = HashSet::new();
        let mut queue: VecDeque<OpId> = VecDeque::new();
        for &root in roots {
            if self.operation(root).is_some() && seen.insert(root) {
                queue.push_back(root);
            }
        }
        while let Some(op) = queue.pop_front() {
            for channel in self.out_channels(op) {
                if Some(channel) == blocked {
                    continue;
                }
                if let Some(ends) = self.endpoints(channel) {
                    if seen.insert(ends.dst) {
                        queue.push_back(ends.dst);
                    }
                }
            }
        }
        seen
    }

    /// Returns `true` if `a` dominates `b`.
    ///
    /// Operations in different basic blocks compare by block dominance over
    /// the CFG. Within one block, `a` dominates `b` when `b` is reachable
    /// from the entry operations but not once `a` is removed.
    pub fn dominates(&self, a: OpId, b: OpId) -> bool {
        let (Some(op_a), Some(op_b)) = (self.operation(a), self.operation(b)) else {
            return false;
        };
        if op_a.block != op_b.block {
            return self.blocks.dominators().dominates(op_a.block, op_b.block);
        }
        if a == b {
            return true;
        }
        let roots: Vec<OpId> = self.entry_ops().into_iter().filter(|&op| op != a).collect();
        if !self.reachable_from(&self.entry_ops(), None).contains(&b) {
            return false;
        }
        // Walk again without ever entering `a`.
        let mut seen: HashSet<OpId> = roots.iter().copied().collect();
        let mut queue: VecDeque<OpId> = roots.into_iter().collect();
        while let Some(op) = queue.pop_front() {
            if op == b {
                return false;
            }
            for next in self.successors(op) {
                if next != a && seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        true
    }

    /// Returns `true` if every path from an entry operation to channel `b`
    /// passes through channel `a`. A channel dominates itself.
    pub fn channel_dominates(&self, a: ChannelId, b: ChannelId) -> bool {
        if a == b {
            return self.channel(a).is_some();
        }
        let Some(target) = self.endpoints(b) else {
            return false;
        };
        if self.endpoints(a).is_none() {
            return false;
        }
        let entries = self.entry_ops();
        self.reachable_from(&entries, None).contains(&target.src)
            && !self.reachable_from(&entries, Some(a)).contains(&target.src)
    }
}
