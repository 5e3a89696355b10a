//! The analyzer entry point and its report.

use serde::Serialize;
use tracing::{info, warn};

use elastic_core::{ChannelId, CircuitGraph, GraphError, OpId};

use crate::config::TimingConfig;
use crate::cycles::{enumerate_cycles, Cycle};
use crate::error::AnalysisError;
use crate::timing::ArrivalTimes;

/// Result of analyzing a circuit against a timing configuration.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub cycles: Vec<Cycle>,
    pub arrivals: ArrivalTimes,
    /// Per-channel arrival at the producer output, ascending channel ID.
    /// `None` for channels on or behind a combinational loop.
    pub channel_delays: Vec<(ChannelId, Option<f64>)>,
    pub clock_period: f64,
}

/// Condensed, serializable view of a report for logs and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub cycles: usize,
    pub unbroken_cycles: usize,
    pub critical_delay: Option<f64>,
    pub timing_violations: Vec<(OpId, f64)>,
}

impl AnalysisReport {
    /// Cycles with no opaque buffer. A correct circuit has none.
    pub fn unbroken_cycles(&self) -> impl Iterator<Item = &Cycle> {
        self.cycles.iter().filter(|c| !c.broken)
    }

    pub fn is_combinationally_acyclic(&self) -> bool {
        self.unbroken_cycles().next().is_none()
    }

    /// Operations settling after the clock period.
    pub fn timing_violations(&self) -> Vec<(OpId, f64)> {
        self.arrivals.violations(self.clock_period)
    }

    pub fn summary(&self) -> AnalysisSummary {
        AnalysisSummary {
            cycles: self.cycles.len(),
            unbroken_cycles: self.unbroken_cycles().count(),
            critical_delay: self.arrivals.worst().map(|(_, t)| t),
            timing_violations: self.timing_violations(),
        }
    }

    /// Stamps the delay estimates onto the graph's channels.
    pub fn write_back(&self, graph: &mut CircuitGraph) -> Result<(), GraphError> {
        for &(channel, delay) in &self.channel_delays {
            graph.set_channel_delay(channel, delay)?;
        }
        Ok(())
    }
}

/// Validates the configuration and the graph, then enumerates cycles and
/// computes arrival times. The graph is not modified.
pub fn analyze(graph: &CircuitGraph, config: &TimingConfig) -> Result<AnalysisReport, AnalysisError> {
    config.validate()?;
    graph.validate()?;

    let cycles = enumerate_cycles(graph, config)?;
    let arrivals = ArrivalTimes::of(graph, &config.delays);
    let channel_delays = graph
        .channel_ids()
        .into_iter()
        .map(|ch| {
            let delay = arrivals
                .channel_arrival(graph, ch)
                .filter(|t| t.is_finite());
            (ch, delay)
        })
        .collect();

    let report = AnalysisReport {
        cycles,
        arrivals,
        channel_delays,
        clock_period: config.clock_period,
    };

    let summary = report.summary();
    info!(
        circuit = graph.name(),
        cycles = summary.cycles,
        unbroken = summary.unbroken_cycles,
        critical_delay = ?summary.critical_delay,
        "analysis complete"
    );
    if summary.unbroken_cycles > 0 {
        warn!(
            count = summary.unbroken_cycles,
            "combinational cycles without an opaque buffer"
        );
    }
    Ok(report)
}
