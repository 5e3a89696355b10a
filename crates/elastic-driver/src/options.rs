//! Options for a whole pipeline run.

use serde::{Deserialize, Serialize};

use elastic_analysis::TimingConfig;
use elastic_buffers::PlacementOptions;
use elastic_speculation::SpeculationMode;

/// Everything a pipeline run can be configured with. Every field has a
/// default, so a config file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub timing: TimingConfig,
    pub placement: PlacementOptions,
    /// Speculation to insert after buffering. `None` skips the pass.
    pub speculation: Option<SpeculationMode>,
    /// Recompute region markers at the end of the run.
    pub annotate: bool,
    /// Stamp the final delay estimates onto the channels.
    pub write_delays: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            timing: TimingConfig::default(),
            placement: PlacementOptions::default(),
            speculation: None,
            annotate: true,
            write_delays: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elastic_buffers::PlacementAlgorithm;

    #[test]
    fn partial_json_fills_defaults() {
        let options: PipelineOptions = serde_json::from_str(
            r#"{
                "timing": {"clock_period": 4.0},
                "placement": {"algorithm": "on_merges"},
                "speculation": {"mode": "automatic", "speculator": {"op": "ld", "port": 0}}
            }"#,
        )
        .unwrap();
        assert_eq!(options.timing.clock_period, 4.0);
        assert_eq!(options.timing.target_throughput, 0.5);
        assert_eq!(options.placement.algorithm, PlacementAlgorithm::OnMerges);
        assert_eq!(options.placement.slot_cap, 4);
        assert!(options.annotate);
        assert!(options.speculation.is_some());
    }

    #[test]
    fn empty_object_is_default() {
        let options: PipelineOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, PipelineOptions::default());
    }
}
