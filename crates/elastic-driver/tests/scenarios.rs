// Whole-pipeline scenarios: a two-operation feedback loop, automatic
// speculation across two blocks, a bad position reference, and JSON files
// on disk.

use std::collections::BTreeSet;

use elastic_buffers::PlacementAlgorithm;
use elastic_core::{BufferSpec, BufferTiming, CircuitGraph, DataType, OpKind, Operation};
use elastic_driver::{load_graph, load_options, run, save_graph, ErrorKind, PipelineOptions};
use elastic_speculation::{ChannelRef, PositionList, SpeculationMode};

/// `arg -> X(merge) -> Y(fork) -> X`, with `Y` also feeding the end.
fn feedback_loop() -> CircuitGraph {
    let mut g = CircuitGraph::new("feedback");
    let bb = g.add_block("bb0");
    let ty = DataType::I32;
    let arg = g
        .add_operation(Operation::new("arg", OpKind::Argument { index: 0 }, bb, [], [ty]))
        .unwrap();
    let x = g.add_operation(Operation::merge("X", bb, ty, 2)).unwrap();
    let y = g.add_operation(Operation::fork("Y", bb, ty, 2)).unwrap();
    let end = g
        .add_operation(Operation::new("end", OpKind::End { size: 1 }, bb, [ty], []))
        .unwrap();
    g.connect(arg, 0, x, 0).unwrap();
    g.connect(x, 0, y, 0).unwrap();
    g.connect(y, 0, x, 1).unwrap();
    g.connect(y, 1, end, 0).unwrap();
    g
}

/// `x -> S -> F(fork)` in bb0, `A` in bb1, `B` in bb2, merge `J` and `M`
/// in bb3.
fn two_branches() -> CircuitGraph {
    let mut g = CircuitGraph::new("branches");
    let ty = DataType::I32;
    let bb0 = g.add_block("bb0");
    let bb1 = g.add_block("bb1");
    let bb2 = g.add_block("bb2");
    let bb3 = g.add_block("bb3");
    for (from, to) in [(bb0, bb1), (bb0, bb2), (bb1, bb3), (bb2, bb3)] {
        g.add_cfg_edge(from, to).unwrap();
    }
    let x = g
        .add_operation(Operation::new("x", OpKind::Argument { index: 0 }, bb0, [], [ty]))
        .unwrap();
    let s = g
        .add_operation(Operation::passthrough("S", OpKind::Cast, bb0, ty))
        .unwrap();
    let f = g.add_operation(Operation::fork("F", bb0, ty, 2)).unwrap();
    let a = g
        .add_operation(Operation::passthrough("A", OpKind::Cast, bb1, ty))
        .unwrap();
    let b = g
        .add_operation(Operation::passthrough("B", OpKind::Cast, bb2, ty))
        .unwrap();
    let j = g.add_operation(Operation::merge("J", bb3, ty, 2)).unwrap();
    let m = g
        .add_operation(Operation::passthrough("M", OpKind::Cast, bb3, ty))
        .unwrap();
    let end = g
        .add_operation(Operation::new("end", OpKind::End { size: 1 }, bb3, [ty], []))
        .unwrap();
    g.connect(x, 0, s, 0).unwrap();
    g.connect(s, 0, f, 0).unwrap();
    g.connect(f, 0, a, 0).unwrap();
    g.connect(f, 1, b, 0).unwrap();
    g.connect(a, 0, j, 0).unwrap();
    g.connect(b, 0, j, 1).unwrap();
    g.connect(j, 0, m, 0).unwrap();
    g.connect(m, 0, end, 0).unwrap();
    g
}

fn one_opaque() -> Option<BufferSpec> {
    Some(BufferSpec {
        slots: 1,
        timing: BufferTiming::Opaque,
    })
}

#[test]
fn feedback_loop_gets_exactly_one_opaque_slot() {
    let mut g = feedback_loop();
    let mut options = PipelineOptions::default();
    options.timing.clock_period = 10.0;
    options.timing.target_throughput = 0.5;

    let report = run(&mut g, &options).unwrap();
    assert_eq!(report.before.unbroken_cycles, 1);
    assert_eq!(report.after.unbroken_cycles, 0);
    assert_eq!(report.placement.total_slots, 1);
    assert!(report.placement.proven_optimal);

    let arg = g.find_op("arg").unwrap();
    let x = g.find_op("X").unwrap();
    let y = g.find_op("Y").unwrap();
    let on_c1 = g.buffering_at(x, 0);
    let on_c2 = g.buffering_at(y, 0);
    assert!(
        (on_c1 == one_opaque()) != (on_c2 == one_opaque()),
        "expected one opaque slot on the loop, got {:?} and {:?}",
        on_c1,
        on_c2
    );
    assert_eq!(g.buffering_at(arg, 0), None);
    assert_eq!(g.buffering_at(y, 1), None);
}

#[test]
fn heuristic_breaks_the_loop_after_the_merge() {
    let mut g = feedback_loop();
    let mut options = PipelineOptions::default();
    options.placement.algorithm = PlacementAlgorithm::OnMerges;

    let report = run(&mut g, &options).unwrap();
    assert!(!report.placement.proven_optimal);
    let x = g.find_op("X").unwrap();
    assert_eq!(g.buffering_at(x, 0), one_opaque());
}

#[test]
fn automatic_speculation_across_branches() {
    let mut g = two_branches();
    let options = PipelineOptions {
        speculation: Some(SpeculationMode::Automatic {
            speculator: ChannelRef::new("S", 0),
        }),
        ..Default::default()
    };

    let report = run(&mut g, &options).unwrap();
    let speculation = report.speculation.unwrap();
    assert_eq!(speculation.saves.len(), 2);
    assert_eq!(speculation.commits.len(), 1);

    let commit = g.find_op(&speculation.commits[0]).unwrap();
    assert_eq!(g.successors(commit), vec![g.find_op("M").unwrap()]);

    let marked: BTreeSet<&str> = g
        .operations()
        .filter(|(_, op)| op.speculative)
        .map(|(_, op)| op.name.as_str())
        .collect();
    let mut expected: BTreeSet<&str> = ["F", "A", "B", "J"].into_iter().collect();
    expected.insert(&speculation.speculator);
    expected.extend(speculation.saves.iter().map(String::as_str));
    expected.insert(&speculation.commits[0]);
    assert_eq!(marked, expected);
    assert_eq!(report.annotation.unwrap().marked, 8);
}

#[test]
fn unknown_position_is_a_configuration_error() {
    let mut g = two_branches();
    let before = g.fingerprint();
    let options = PipelineOptions {
        speculation: Some(SpeculationMode::Explicit(PositionList {
            speculator: ChannelRef::new("nonexistent_op", 0),
            saves: vec![],
            commits: vec![ChannelRef::new("J", 0)],
        })),
        ..Default::default()
    };

    let err = run(&mut g, &options).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("nonexistent_op"), "{}", err);
    assert_eq!(g.fingerprint(), before);
}

#[test]
fn graph_and_options_files_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let graph_path = dir.path().join("feedback.json");
    let options_path = dir.path().join("options.json");

    let original = feedback_loop();
    save_graph(&original, &graph_path).unwrap();
    let loaded = load_graph(&graph_path).unwrap();
    assert_eq!(loaded.fingerprint(), original.fingerprint());

    std::fs::write(&options_path, r#"{"placement": {"slot_cap": 2}}"#).unwrap();
    let options = load_options(&options_path).unwrap();
    assert_eq!(options.placement.slot_cap, 2);

    std::fs::write(&graph_path, "{\"name\": 3}").unwrap();
    let err = load_graph(&graph_path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Structural);

    let err = load_options(&dir.path().join("missing.json")).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}
