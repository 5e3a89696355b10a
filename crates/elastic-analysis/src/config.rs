//! Timing configuration: per-kind delays and latencies, the clock period and
//! the throughput target.
//!
//! Delays are abstract time units in the same unit as the clock period.
//! Latency is the number of pipeline stages an operation adds to a cycle it
//! sits on; it never breaks a combinational path.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use elastic_core::OpKind;

use crate::error::AnalysisError;

/// Delay and latency of one operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpTiming {
    pub delay: f64,
    #[serde(default)]
    pub latency: u32,
}

impl OpTiming {
    pub const fn combinational(delay: f64) -> Self {
        OpTiming { delay, latency: 0 }
    }
}

/// Kind name -> timing, with a fallback entry for kinds not listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayTable {
    #[serde(default = "fallback")]
    pub default: OpTiming,
    #[serde(default)]
    pub kinds: IndexMap<String, OpTiming>,
}

fn fallback() -> OpTiming {
    OpTiming::combinational(1.0)
}

impl DelayTable {
    /// A table with only the fallback entry.
    pub fn uniform(default: OpTiming) -> Self {
        DelayTable {
            default,
            kinds: IndexMap::new(),
        }
    }

    /// Timing of an operation kind, falling back to the default entry.
    pub fn get(&self, kind: &OpKind) -> OpTiming {
        self.kinds.get(kind.name()).copied().unwrap_or(self.default)
    }

    /// Overrides the timing of one kind name.
    pub fn set(&mut self, kind: impl Into<String>, timing: OpTiming) {
        self.kinds.insert(kind.into(), timing);
    }

    pub fn delay(&self, kind: &OpKind) -> f64 {
        self.get(kind).delay
    }

    pub fn latency(&self, kind: &OpKind) -> u32 {
        self.get(kind).latency
    }
}

impl Default for DelayTable {
    fn default() -> Self {
        let entries: [(&str, f64); 34] = [
            ("start", 0.0),
            ("argument", 0.0),
            ("source", 0.0),
            ("constant", 0.0),
            ("sink", 0.0),
            ("end", 0.0),
            ("fork", 0.1),
            ("merge", 0.5),
            ("control_merge", 0.6),
            ("mux", 0.6),
            ("branch", 0.0),
            ("cond_branch", 0.3),
            // Transparent buffers only; opaque buffers reset the path.
            ("buffer", 0.0),
            ("load", 2.0),
            ("store", 1.0),
            ("mem_interface", 0.0),
            ("speculator", 0.4),
            ("save", 0.2),
            ("commit", 0.4),
            ("add", 1.5),
            ("sub", 1.5),
            ("mul", 3.5),
            ("div", 6.0),
            ("rem", 6.0),
            ("and", 0.5),
            ("or", 0.5),
            ("xor", 0.5),
            ("shl", 0.8),
            ("shr", 0.8),
            ("neg", 1.0),
            ("not", 0.5),
            ("cmp", 1.2),
            ("select", 0.6),
            ("cast", 0.2),
        ];
        DelayTable {
            default: fallback(),
            kinds: entries
                .into_iter()
                .map(|(name, delay)| (name.to_string(), OpTiming::combinational(delay)))
                .collect(),
        }
    }
}

/// Everything the analyzer and the buffer placer need to know about time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub delays: DelayTable,
    /// Target clock period, in delay units.
    pub clock_period: f64,
    /// Required tokens per cycle on every loop, in (0, 1].
    pub target_throughput: f64,
    /// Upper bound on the number of elementary cycles enumerated.
    pub max_cycles: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            delays: DelayTable::default(),
            clock_period: 10.0,
            target_throughput: 0.5,
            max_cycles: 10_000,
        }
    }
}

impl TimingConfig {
    /// Rejects non-positive periods, targets outside (0, 1] and negative or
    /// non-finite delays.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !self.clock_period.is_finite() || self.clock_period <= 0.0 {
            return Err(AnalysisError::InvalidConfig(format!(
                "clock period must be positive, got {}",
                self.clock_period
            )));
        }
        if !self.target_throughput.is_finite()
            || self.target_throughput <= 0.0
            || self.target_throughput > 1.0
        {
            return Err(AnalysisError::InvalidConfig(format!(
                "target throughput must be in (0, 1], got {}",
                self.target_throughput
            )));
        }
        if self.max_cycles == 0 {
            return Err(AnalysisError::InvalidConfig(
                "max_cycles must be at least 1".into(),
            ));
        }
        let entries = std::iter::once(("default", &self.delays.default))
            .chain(self.delays.kinds.iter().map(|(k, v)| (k.as_str(), v)));
        for (kind, timing) in entries {
            if !timing.delay.is_finite() || timing.delay < 0.0 {
                return Err(AnalysisError::InvalidConfig(format!(
                    "delay of '{}' must be finite and non-negative, got {}",
                    kind, timing.delay
                )));
            }
        }
        Ok(())
    }

    /// Largest number of cycles a token may take to go around a loop:
    /// `floor(1 / target)`.
    pub fn max_cycle_latency(&self) -> u32 {
        (1.0 / self.target_throughput + 1e-9).floor() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elastic_core::ArithOp;

    #[test]
    fn defaults_are_valid() {
        assert!(TimingConfig::default().validate().is_ok());
    }

    #[test]
    fn default_table_covers_catalog() {
        let table = DelayTable::default();
        for name in ["fork", "control_merge", "cond_branch", "mem_interface", "commit", "shr"] {
            assert!(table.kinds.contains_key(name), "missing {}", name);
        }
        assert_eq!(table.delay(&OpKind::Arith { op: ArithOp::Mul }), 3.5);
    }

    #[test]
    fn unknown_kind_falls_back() {
        let mut table = DelayTable::uniform(OpTiming::combinational(2.0));
        table.set("fork", OpTiming { delay: 0.3, latency: 1 });
        assert_eq!(table.delay(&OpKind::Select), 2.0);
        assert_eq!(table.latency(&OpKind::Fork { size: 2 }), 1);
    }

    #[test]
    fn rejects_bad_period_and_target() {
        let config = TimingConfig {
            clock_period: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AnalysisError::InvalidConfig(_))));

        let config = TimingConfig {
            target_throughput: 1.5,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("target throughput"));
        assert!(err.is_config());
    }

    #[test]
    fn rejects_negative_delay() {
        let mut config = TimingConfig::default();
        config.delays.set("merge", OpTiming::combinational(-1.0));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("'merge'"));
    }

    #[test]
    fn cycle_latency_bound_from_target() {
        let half = TimingConfig {
            target_throughput: 0.5,
            ..Default::default()
        };
        assert_eq!(half.max_cycle_latency(), 2);
        let third = TimingConfig {
            target_throughput: 1.0 / 3.0,
            ..Default::default()
        };
        assert_eq!(third.max_cycle_latency(), 3);
        let full = TimingConfig {
            target_throughput: 1.0,
            ..Default::default()
        };
        assert_eq!(full.max_cycle_latency(), 1);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: TimingConfig = serde_json::from_str(r#"{"clock_period": 4.0}"#).unwrap();
        assert_eq!(config.clock_period, 4.0);
        assert_eq!(config.target_throughput, 0.5);
        assert!(config.delays.kinds.contains_key("fork"));
    }
}
