//! Combinational arrival times.
//!
//! `out_time(u)` is the time at which operation `u`'s outputs settle:
//! zero for opaque buffers, otherwise the latest input arrival plus the
//! kind's delay. An input arrives at its producer's `out_time` unless the
//! channel is registered, in which case it arrives at zero. Operations whose
//! inputs depend on a combinational loop never settle and get an infinite
//! arrival time.

use std::collections::{BTreeSet, HashMap, HashSet};

use elastic_core::{ChannelId, CircuitGraph, OpId};

use crate::config::DelayTable;

/// Arrival times for every operation, plus the input that determined each
/// one (used to recover critical paths).
#[derive(Debug, Clone, Default)]
pub struct ArrivalTimes {
    out_time: HashMap<OpId, f64>,
    critical_input: HashMap<OpId, ChannelId>,
}

impl ArrivalTimes {
    /// Computes arrivals over the circuit as it stands: only opaque buffer
    /// operations reset the path.
    pub fn of(graph: &CircuitGraph, delays: &DelayTable) -> Self {
        Self::with_registers(graph, delays, |_| false)
    }

    /// Computes arrivals as if an opaque register sat on every channel for
    /// which `registered` returns `true`.
    pub fn with_registers<F>(graph: &CircuitGraph, delays: &DelayTable, registered: F) -> Self
    where
        F: Fn(ChannelId) -> bool,
    {
        // A channel is a combinational dependency unless it is registered or
        // feeds an opaque buffer (whose output time is pinned to zero).
        let is_dependency = |channel: ChannelId| -> bool {
            if registered(channel) {
                return false;
            }
            graph
                .endpoints(channel)
                .and_then(|ends| graph.operation(ends.dst))
                .map(|op| !op.kind.is_opaque_buffer())
                .unwrap_or(false)
        };

        let mut pending: HashMap<OpId, usize> = HashMap::new();
        let mut ready: BTreeSet<OpId> = BTreeSet::new();
        for op in graph.op_ids() {
            let deps = graph
                .in_channels(op)
                .into_iter()
                .filter(|&ch| is_dependency(ch))
                .count();
            if deps == 0 {
                ready.insert(op);
            } else {
                pending.insert(op, deps);
            }
        }

        let mut times = ArrivalTimes::default();
        while let Some(op) = ready.pop_first() {
            let Some(operation) = graph.operation(op) else {
                continue;
            };
            if operation.kind.is_opaque_buffer() {
                times.out_time.insert(op, 0.0);
            } else {
                let mut latest = 0.0;
                let mut critical = None;
                for channel in graph.in_channels(op) {
                    if registered(channel) {
                        continue;
                    }
                    let arrival = times.channel_arrival(graph, channel).unwrap_or(f64::INFINITY);
                    if critical.is_none() || arrival > latest {
                        latest = arrival;
                        critical = Some(channel);
                    }
                }
                times
                    .out_time
                    .insert(op, latest + delays.delay(&operation.kind));
                if let Some(channel) = critical {
                    times.critical_input.insert(op, channel);
                }
            }

            for channel in graph.out_channels(op) {
                if !is_dependency(channel) {
                    continue;
                }
                let Some(ends) = graph.endpoints(channel) else {
                    continue;
                };
                if let Some(count) = pending.get_mut(&ends.dst) {
                    *count -= 1;
                    if *count == 0 {
                        pending.remove(&ends.dst);
                        ready.insert(ends.dst);
                    }
                }
            }
        }

        // Whatever never became ready sits on or behind a combinational loop.
        for op in pending.into_keys() {
            times.out_time.insert(op, f64::INFINITY);
        }
        times
    }

    /// Output settle time of an operation (infinite on a combinational loop).
    pub fn out_time(&self, op: OpId) -> f64 {
        self.out_time.get(&op).copied().unwrap_or(f64::INFINITY)
    }

    /// Arrival time at the producer end of a channel.
    pub fn channel_arrival(&self, graph: &CircuitGraph, channel: ChannelId) -> Option<f64> {
        graph.endpoints(channel).map(|ends| self.out_time(ends.src))
    }

    /// The latest-settling operation outside combinational loops and its
    /// time, ties broken by lowest ID.
    pub fn worst(&self) -> Option<(OpId, f64)> {
        self.out_time
            .iter()
            .filter(|(_, t)| t.is_finite())
            .map(|(&op, &t)| (op, t))
            .fold(None, |best, (op, t)| match best {
                Some((bop, bt)) if bt > t || (bt == t && bop < op) => Some((bop, bt)),
                _ => Some((op, t)),
            })
    }

    /// Operations whose output settles after `period`, in ID order. Loop
    /// members (infinite times) are excluded; cycle analysis reports those.
    pub fn violations(&self, period: f64) -> Vec<(OpId, f64)> {
        let mut late: Vec<(OpId, f64)> = self
            .out_time
            .iter()
            .filter(|(_, &t)| t.is_finite() && t > period + 1e-9)
            .map(|(&op, &t)| (op, t))
            .collect();
        late.sort_by_key(|&(op, _)| op);
        late
    }

    /// Channels along the critical path ending at `op`, from the path's
    /// origin towards `op`. Channels contributing no delay are left out.
    pub fn critical_path(&self, graph: &CircuitGraph, op: OpId) -> Vec<ChannelId> {
        let mut path = Vec::new();
        let mut visited = HashSet::from([op]);
        let mut current = op;
        while let Some(&channel) = self.critical_input.get(&current) {
            let Some(ends) = graph.endpoints(channel) else {
                break;
            };
            if self.out_time(ends.src) <= 0.0 {
                break;
            }
            path.push(channel);
            if !visited.insert(ends.src) {
                break;
            }
            current = ends.src;
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpTiming;
    use elastic_core::{ArithOp, BufferTiming, DataType, OpKind, Operation};

    fn table() -> DelayTable {
        let mut t = DelayTable::uniform(OpTiming::combinational(0.0));
        t.set("add", OpTiming::combinational(2.0));
        t.set("mul", OpTiming::combinational(3.0));
        t
    }

    /// arg -> add -> mul -> end (mul's second operand from a second arg).
    fn chain() -> (CircuitGraph, [OpId; 5]) {
        let mut g = CircuitGraph::new("chain");
        let bb = g.add_block("bb0");
        let ty = DataType::I32;
        let a = g
            .add_operation(Operation::new("a", OpKind::Argument { index: 0 }, bb, [], [ty]))
            .unwrap();
        let b = g
            .add_operation(Operation::new("b", OpKind::Argument { index: 1 }, bb, [], [ty]))
            .unwrap();
        let add = g
            .add_operation(Operation::new(
                "add",
                OpKind::Arith { op: ArithOp::Add },
                bb,
                [ty, ty],
                [ty],
            ))
            .unwrap();
        let mul = g
            .add_operation(Operation::new(
                "mul",
                OpKind::Arith { op: ArithOp::Mul },
                bb,
                [ty, ty],
                [ty],
            ))
            .unwrap();
        let end = g
            .add_operation(Operation::new("end", OpKind::End { size: 1 }, bb, [ty], []))
            .unwrap();
        let f = g.add_operation(Operation::fork("f", bb, ty, 2)).unwrap();
        g.connect(a, 0, f, 0).unwrap();
        g.connect(f, 0, add, 0).unwrap();
        g.connect(f, 1, add, 1).unwrap();
        g.connect(add, 0, mul, 0).unwrap();
        g.connect(b, 0, mul, 1).unwrap();
        g.connect(mul, 0, end, 0).unwrap();
        (g, [a, b, add, mul, end])
    }

    #[test]
    fn delays_accumulate() {
        let (g, [_, b, add, mul, end]) = chain();
        let t = ArrivalTimes::of(&g, &table());
        assert_eq!(t.out_time(b), 0.0);
        assert_eq!(t.out_time(add), 2.0);
        assert_eq!(t.out_time(mul), 5.0);
        assert_eq!(t.out_time(end), 5.0);
        assert_eq!(t.worst().map(|(_, time)| time), Some(5.0));
    }

    #[test]
    fn violations_and_critical_path() {
        let (g, [_, _, add, mul, _]) = chain();
        let t = ArrivalTimes::of(&g, &table());
        let late = t.violations(4.0);
        assert!(late.iter().any(|&(op, _)| op == mul));
        let path = t.critical_path(&g, mul);
        assert_eq!(path, vec![g.input_channel(mul, 0).unwrap()]);
        assert_eq!(g.endpoints(path[0]).unwrap().src, add);
    }

    #[test]
    fn registered_channel_resets_arrival() {
        let (g, [_, _, add, mul, _]) = chain();
        let cut = g.input_channel(mul, 0).unwrap();
        let t = ArrivalTimes::with_registers(&g, &table(), |ch| ch == cut);
        assert_eq!(t.out_time(add), 2.0);
        assert_eq!(t.out_time(mul), 3.0);
    }

    #[test]
    fn opaque_buffer_resets_arrival() {
        let (mut g, [_, _, _, mul, _]) = chain();
        let bb = g.blocks.entry().unwrap();
        let cut = g.input_channel(mul, 0).unwrap();
        g.splice(cut, Operation::buffer("r", bb, DataType::I32, 1, BufferTiming::Opaque))
            .unwrap();
        let t = ArrivalTimes::of(&g, &table());
        assert_eq!(t.out_time(mul), 3.0);
    }

    #[test]
    fn combinational_loop_is_infinite() {
        let mut g = CircuitGraph::new("loop");
        let bb = g.add_block("bb0");
        let ty = DataType::I32;
        let arg = g
            .add_operation(Operation::new("arg", OpKind::Argument { index: 0 }, bb, [], [ty]))
            .unwrap();
        let x = g.add_operation(Operation::merge("x", bb, ty, 2)).unwrap();
        let y = g.add_operation(Operation::fork("y", bb, ty, 2)).unwrap();
        let end = g
            .add_operation(Operation::new("end", OpKind::End { size: 1 }, bb, [ty], []))
            .unwrap();
        g.connect(arg, 0, x, 0).unwrap();
        g.connect(x, 0, y, 0).unwrap();
        let back = g.connect(y, 0, x, 1).unwrap();
        g.connect(y, 1, end, 0).unwrap();

        let t = ArrivalTimes::of(&g, &DelayTable::default());
        assert!(t.out_time(x).is_infinite());
        assert!(t.out_time(end).is_infinite());
        assert_eq!(t.out_time(arg), 0.0);
        assert!(t.violations(1.0).is_empty());

        let t = ArrivalTimes::with_registers(&g, &DelayTable::default(), |ch| ch == back);
        assert!(t.out_time(end).is_finite());
    }
}
