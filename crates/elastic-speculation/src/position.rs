//! External references to channels: `(operation name, output index)`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use elastic_core::{ChannelId, CircuitGraph};

use crate::error::SpeculationError;

/// A channel named by its producer and output port. Displays as `op:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRef {
    pub op: String,
    pub port: u16,
}

impl ChannelRef {
    pub fn new(op: impl Into<String>, port: u16) -> Self {
        ChannelRef {
            op: op.into(),
            port,
        }
    }

    /// The reference naming an existing channel.
    pub fn of(graph: &CircuitGraph, channel: ChannelId) -> Option<Self> {
        let ends = graph.endpoints(channel)?;
        let producer = graph.operation(ends.src)?;
        Some(ChannelRef::new(producer.name.clone(), ends.src_port))
    }

    /// Looks the channel up. Unknown operations, out-of-range ports and
    /// unconnected ports are configuration errors naming this reference.
    pub fn resolve(&self, graph: &CircuitGraph) -> Result<ChannelId, SpeculationError> {
        let fail = |reason: String| SpeculationError::Config {
            reference: self.to_string(),
            reason,
        };
        let op = graph
            .find_op(&self.op)
            .ok_or_else(|| fail(format!("no operation named '{}'", self.op)))?;
        let outputs = graph.operation(op).map(|o| o.outputs.len()).unwrap_or(0);
        if self.port as usize >= outputs {
            return Err(fail(format!(
                "operation '{}' has {} outputs",
                self.op, outputs
            )));
        }
        graph
            .output_channel(op, self.port)
            .ok_or_else(|| fail("output is not connected".into()))
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.op, self.port)
    }
}

impl FromStr for ChannelRef {
    type Err = String;

    /// Parses `op:port`; a bare `op` means port 0.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((op, port)) if !op.is_empty() => port
                .parse()
                .map(|port| ChannelRef::new(op, port))
                .map_err(|_| format!("invalid port in '{}'", s)),
            Some(_) => Err(format!("missing operation name in '{}'", s)),
            None if !s.is_empty() => Ok(ChannelRef::new(s, 0)),
            None => Err("empty channel reference".into()),
        }
    }
}

/// Explicit speculation positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionList {
    pub speculator: ChannelRef,
    #[serde(default)]
    pub saves: Vec<ChannelRef>,
    #[serde(default)]
    pub commits: Vec<ChannelRef>,
}

impl PositionList {
    pub fn from_json(json: &str) -> Result<Self, SpeculationError> {
        serde_json::from_str(json).map_err(|e| SpeculationError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elastic_core::{DataType, OpKind, Operation};

    fn graph() -> CircuitGraph {
        let mut g = CircuitGraph::new("g");
        let bb = g.add_block("bb0");
        let ty = DataType::I32;
        let arg = g
            .add_operation(Operation::new("x", OpKind::Argument { index: 0 }, bb, [], [ty]))
            .unwrap();
        let end = g
            .add_operation(Operation::new("end", OpKind::End { size: 1 }, bb, [ty], []))
            .unwrap();
        g.connect(arg, 0, end, 0).unwrap();
        g
    }

    #[test]
    fn parse_and_display() {
        let r: ChannelRef = "load3:1".parse().unwrap();
        assert_eq!(r, ChannelRef::new("load3", 1));
        assert_eq!(r.to_string(), "load3:1");
        assert_eq!("fork".parse::<ChannelRef>().unwrap().port, 0);
        assert!("x:y".parse::<ChannelRef>().is_err());
        assert!(":1".parse::<ChannelRef>().is_err());
    }

    #[test]
    fn resolve_errors_name_the_reference() {
        let g = graph();
        assert!(ChannelRef::new("x", 0).resolve(&g).is_ok());
        let err = ChannelRef::new("ghost", 0).resolve(&g).unwrap_err();
        assert_eq!(
            err,
            SpeculationError::Config {
                reference: "ghost:0".into(),
                reason: "no operation named 'ghost'".into()
            }
        );
        let err = ChannelRef::new("x", 2).resolve(&g).unwrap_err();
        assert!(err.to_string().contains("'x:2'"));
    }

    #[test]
    fn position_list_json() {
        let list = PositionList::from_json(
            r#"{"speculator": {"op": "x", "port": 0}, "commits": [{"op": "m", "port": 0}]}"#,
        )
        .unwrap();
        assert!(list.saves.is_empty());
        assert_eq!(list.commits.len(), 1);
        assert!(matches!(
            PositionList::from_json("[]"),
            Err(SpeculationError::Malformed(_))
        ));
    }
}
