//! The batch pipeline: analyze -> place buffers -> verify -> speculate ->
//! annotate -> final analysis.
//!
//! Every pass runs on a staged copy of the graph. The caller's graph is
//! replaced only when the whole run succeeds.

use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use elastic_analysis::{analyze, AnalysisSummary};
use elastic_buffers::{place_buffers, verify_placement, PlacementAlgorithm, PlacementReport};
use elastic_core::CircuitGraph;
use elastic_speculation::{annotate_regions, insert_speculation, AnnotationReport, SpeculationReport};

use crate::error::PipelineError;
use crate::options::PipelineOptions;

/// What a successful run did.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub circuit: String,
    pub before: AnalysisSummary,
    pub placement: PlacementReport,
    pub speculation: Option<SpeculationReport>,
    pub annotation: Option<AnnotationReport>,
    pub after: AnalysisSummary,
    pub elapsed_ms: u64,
}

/// Runs every pass over `graph`.
pub fn run(
    graph: &mut CircuitGraph,
    options: &PipelineOptions,
) -> Result<PipelineReport, PipelineError> {
    let start = Instant::now();
    let mut staged = graph.clone();

    // 1. Analyze the input. This also rejects malformed graphs and configs.
    let before = analyze(&staged, &options.timing)?.summary();
    info!(
        circuit = staged.name(),
        ops = staged.op_count(),
        channels = staged.channel_count(),
        cycles = before.cycles,
        unbroken = before.unbroken_cycles,
        "analyzed input circuit"
    );

    // 2. Place buffers, then re-check what the placer promised.
    let placement = place_buffers(&mut staged, &options.timing, &options.placement)?;
    match placement.algorithm {
        PlacementAlgorithm::Milp => {
            verify_placement(&staged, &options.timing)?;
        }
        PlacementAlgorithm::OnMerges => {
            let report = analyze(&staged, &options.timing)?;
            if !report.is_combinationally_acyclic() {
                return Err(elastic_buffers::BufferError::Verification(
                    "heuristic placement left a combinational cycle".into(),
                )
                .into());
            }
        }
    }

    // 3. Speculation, after buffering.
    let speculation = match &options.speculation {
        Some(mode) => Some(insert_speculation(&mut staged, mode)?),
        None => None,
    };

    // 4. Region markers.
    let annotation = if options.annotate {
        Some(annotate_regions(&mut staged)?)
    } else {
        None
    };

    // 5. Final estimates. Speculation units add delay the placer never saw.
    let report = analyze(&staged, &options.timing)?;
    let violations = report.timing_violations();
    if let Some(&(op, time)) = violations.iter().max_by(|a, b| a.1.total_cmp(&b.1)) {
        warn!(
            circuit = staged.name(),
            violations = violations.len(),
            worst_op = staged.operation(op).map(|o| o.name.as_str()).unwrap_or("?"),
            worst = time,
            period = options.timing.clock_period,
            "final circuit misses the clock period"
        );
    }
    if options.write_delays {
        report.write_back(&mut staged)?;
    }
    let after = report.summary();

    *graph = staged;
    let elapsed_ms = start.elapsed().as_millis() as u64;
    info!(
        circuit = graph.name(),
        buffers = placement.buffers.len(),
        slots = placement.total_slots,
        speculative = speculation.is_some(),
        elapsed_ms,
        "pipeline complete"
    );
    Ok(PipelineReport {
        circuit: graph.name().to_string(),
        before,
        placement,
        speculation,
        annotation,
        after,
        elapsed_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use elastic_analysis::{DelayTable, OpTiming};
    use elastic_core::{DataType, OpKind, Operation};
    use elastic_speculation::{ChannelRef, PositionList, SpeculationMode};

    fn straight() -> CircuitGraph {
        let mut g = CircuitGraph::new("straight");
        let bb = g.add_block("bb0");
        let ty = DataType::I32;
        let x = g
            .add_operation(Operation::new("x", OpKind::Argument { index: 0 }, bb, [], [ty]))
            .unwrap();
        let c = g
            .add_operation(Operation::passthrough("c", OpKind::Cast, bb, ty))
            .unwrap();
        let end = g
            .add_operation(Operation::new("end", OpKind::End { size: 1 }, bb, [ty], []))
            .unwrap();
        g.connect(x, 0, c, 0).unwrap();
        g.connect(c, 0, end, 0).unwrap();
        g
    }

    #[test]
    fn acyclic_circuit_needs_no_buffers() {
        let mut g = straight();
        let report = run(&mut g, &PipelineOptions::default()).unwrap();
        assert!(report.placement.buffers.is_empty());
        assert!(report.speculation.is_none());
        assert_eq!(report.after.unbroken_cycles, 0);
        // Delays were written back.
        let x = g.find_op("x").unwrap();
        let channel = g.output_channel(x, 0).unwrap();
        assert!(g.channel(channel).unwrap().delay.is_some());
    }

    #[test]
    fn bad_config_fails_before_any_pass() {
        let mut g = straight();
        let before = g.fingerprint();
        let mut options = PipelineOptions::default();
        options.timing.clock_period = 0.0;
        let err = run(&mut g, &options).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(g.fingerprint(), before);
    }

    #[test]
    fn speculation_delay_shows_up_in_the_final_report() {
        let mut g = straight();
        let mut options = PipelineOptions::default();
        options.timing.delays = DelayTable::uniform(OpTiming::combinational(0.0));
        options.timing.delays.set("cast", OpTiming::combinational(3.0));
        options.timing.delays.set("speculator", OpTiming::combinational(3.0));
        options.timing.clock_period = 5.0;
        options.speculation = Some(SpeculationMode::Explicit(PositionList {
            speculator: ChannelRef::new("x", 0),
            saves: vec![],
            commits: vec![ChannelRef::new("c", 0)],
        }));

        let report = run(&mut g, &options).unwrap();
        assert!(report.before.timing_violations.is_empty());
        assert!(report.placement.buffers.is_empty());
        assert_eq!(report.after.critical_delay, Some(6.0));
        let c = g.find_op("c").unwrap();
        assert!(report
            .after
            .timing_violations
            .iter()
            .any(|&(op, time)| op == c && time == 6.0));
    }
}
