// Property-based tests for the graph mutation primitives and dominance.
//
// 1. Splicing passthrough operations into a chain and removing them again
//    restores the original connectivity.
// 2. Along a straight chain every channel dominates the ones after it.

use elastic_core::{
    BufferTiming, ChannelId, CircuitGraph, DataType, OpId, OpKind, Operation,
};
use proptest::prelude::*;

// ── Generators ──────────────────────────────────────────────────────────────

fn chain(stages: usize) -> (CircuitGraph, Vec<OpId>, Vec<ChannelId>) {
    let mut g = CircuitGraph::new("chain");
    let bb = g.add_block("bb0");
    let ty = DataType::I32;
    let arg = g
        .add_operation(Operation::new("arg", OpKind::Argument { index: 0 }, bb, [], [ty]))
        .unwrap();
    let mut ops = vec![arg];
    let mut channels = Vec::new();
    for s in 0..stages {
        let op = g
            .add_operation(Operation::passthrough(format!("c{}", s), OpKind::Cast, bb, ty))
            .unwrap();
        channels.push(g.connect(*ops.last().unwrap(), 0, op, 0).unwrap());
        ops.push(op);
    }
    let end = g
        .add_operation(Operation::new("end", OpKind::End { size: 1 }, bb, [ty], []))
        .unwrap();
    channels.push(g.connect(*ops.last().unwrap(), 0, end, 0).unwrap());
    ops.push(end);
    (g, ops, channels)
}

// ── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn splice_then_remove_restores_connectivity(
        stages in 1usize..6,
        picks in prop::collection::vec(any::<prop::sample::Index>(), 1..6),
    ) {
        let (mut g, ops, channels) = chain(stages);
        let bb = g.operation(ops[0]).unwrap().block;
        let ty = DataType::I32;

        let mut current = channels.clone();
        let mut inserted = Vec::new();
        for (n, pick) in picks.iter().enumerate() {
            let at = pick.index(current.len());
            let splice = g
                .splice(
                    current[at],
                    Operation::buffer(format!("b{}", n), bb, ty, 1, BufferTiming::Transparent),
                )
                .unwrap();
            current[at] = splice.downstream;
            current.push(splice.upstream);
            inserted.push(splice.op);
        }
        prop_assert!(g.validate().is_ok());
        prop_assert_eq!(g.op_count(), ops.len() + picks.len());

        for op in inserted {
            g.remove_passthrough(op).unwrap();
        }
        prop_assert!(g.validate().is_ok());
        prop_assert_eq!(g.op_count(), ops.len());
        for pair in ops.windows(2) {
            prop_assert_eq!(g.successors(pair[0]), vec![pair[1]]);
        }
    }

    #[test]
    fn chain_channels_dominate_their_successors(stages in 1usize..6) {
        let (g, _, channels) = chain(stages);
        for (i, &a) in channels.iter().enumerate() {
            for (j, &b) in channels.iter().enumerate() {
                prop_assert_eq!(g.channel_dominates(a, b), i <= j);
            }
        }
    }
}
