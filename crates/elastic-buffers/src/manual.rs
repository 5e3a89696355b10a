//! Manual buffer override for scripting and prototyping.
//!
//! These entry points splice a buffer exactly where asked. They do not run
//! the solver and check neither cycle breaking nor timing, so a circuit
//! edited this way may contain combinational loops. Not for production
//! flows.

use serde::{Deserialize, Serialize};
use tracing::warn;

use elastic_core::{BufferTiming, CircuitGraph, OpId, Operation};

use crate::error::BufferError;

/// One requested buffer: `slots` slots of `timing` on output `port` of the
/// operation named `op`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferRequest {
    pub op: String,
    pub port: u16,
    pub slots: u32,
    pub timing: BufferTiming,
}

/// Parses a JSON array of buffer requests.
pub fn parse_requests(json: &str) -> Result<Vec<BufferRequest>, BufferError> {
    serde_json::from_str(json)
        .map_err(|e| BufferError::Config(format!("malformed buffer request list: {}", e)))
}

/// Splices one buffer after output `port` of operation `op`, without any
/// cycle or timing check. Returns the new buffer operation.
pub fn insert_buffer_unchecked(
    graph: &mut CircuitGraph,
    op: &str,
    port: u16,
    slots: u32,
    timing: BufferTiming,
) -> Result<OpId, BufferError> {
    let producer = graph
        .find_op(op)
        .ok_or_else(|| BufferError::Config(format!("no operation named '{}'", op)))?;
    let operation = graph
        .operation(producer)
        .ok_or_else(|| BufferError::Config(format!("no operation named '{}'", op)))?;
    if port as usize >= operation.outputs.len() {
        return Err(BufferError::Config(format!(
            "operation '{}' has no output {} ({} outputs)",
            op,
            port,
            operation.outputs.len()
        )));
    }
    if slots == 0 {
        return Err(BufferError::Config(format!(
            "buffer on '{}:{}' needs at least one slot",
            op, port
        )));
    }
    let channel = graph
        .output_channel(producer, port)
        .ok_or_else(|| BufferError::Config(format!("output '{}:{}' is not connected", op, port)))?;
    let ty = operation.outputs[port as usize];
    let block = operation.block;

    let name = graph.unique_name("buffer");
    let splice = graph.splice(channel, Operation::buffer(name.clone(), block, ty, slots, timing))?;
    warn!(
        buffer = %name,
        producer = op,
        port,
        slots,
        timing = %timing,
        "inserted buffer without cycle or timing checks"
    );
    Ok(splice.op)
}

/// Applies a list of requests in order, all or nothing.
pub fn insert_buffers_unchecked(
    graph: &mut CircuitGraph,
    requests: &[BufferRequest],
) -> Result<Vec<OpId>, BufferError> {
    let mut staged = graph.clone();
    let mut inserted = Vec::with_capacity(requests.len());
    for request in requests {
        inserted.push(insert_buffer_unchecked(
            &mut staged,
            &request.op,
            request.port,
            request.slots,
            request.timing,
        )?);
    }
    *graph = staged;
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use elastic_core::{BufferSpec, DataType, OpKind};

    fn line() -> CircuitGraph {
        let mut g = CircuitGraph::new("line");
        let bb = g.add_block("bb0");
        let ty = DataType::I32;
        let arg = g
            .add_operation(Operation::new("arg", OpKind::Argument { index: 0 }, bb, [], [ty]))
            .unwrap();
        let f = g.add_operation(Operation::fork("f", bb, ty, 2)).unwrap();
        let end = g
            .add_operation(Operation::new("end", OpKind::End { size: 2 }, bb, [ty, ty], []))
            .unwrap();
        g.connect(arg, 0, f, 0).unwrap();
        g.connect(f, 0, end, 0).unwrap();
        g.connect(f, 1, end, 1).unwrap();
        g
    }

    #[test]
    fn inserted_buffer_is_observable() {
        let mut g = line();
        insert_buffer_unchecked(&mut g, "f", 1, 3, BufferTiming::Transparent).unwrap();
        let f = g.find_op("f").unwrap();
        assert_eq!(
            g.buffering_at(f, 1),
            Some(BufferSpec {
                slots: 3,
                timing: BufferTiming::Transparent
            })
        );
        assert_eq!(g.buffering_at(f, 0), None);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn bad_references_are_config_errors() {
        let mut g = line();
        let before = g.fingerprint();
        let err = insert_buffer_unchecked(&mut g, "nope", 0, 1, BufferTiming::Opaque).unwrap_err();
        assert_eq!(err, BufferError::Config("no operation named 'nope'".into()));
        let err = insert_buffer_unchecked(&mut g, "f", 5, 1, BufferTiming::Opaque).unwrap_err();
        assert!(err.to_string().contains("has no output 5"));
        let err = insert_buffer_unchecked(&mut g, "f", 0, 0, BufferTiming::Opaque).unwrap_err();
        assert!(matches!(err, BufferError::Config(_)));
        assert_eq!(g.fingerprint(), before);
    }

    #[test]
    fn batch_is_atomic() {
        let mut g = line();
        let before = g.fingerprint();
        let requests = parse_requests(
            r#"[
                {"op": "f", "port": 0, "slots": 1, "timing": "opaque"},
                {"op": "ghost", "port": 0, "slots": 1, "timing": "opaque"}
            ]"#,
        )
        .unwrap();
        assert!(insert_buffers_unchecked(&mut g, &requests).is_err());
        assert_eq!(g.fingerprint(), before);

        let ok = &requests[..1];
        assert_eq!(insert_buffers_unchecked(&mut g, ok).unwrap().len(), 1);
        assert_eq!(g.op_count(), 4);
    }

    #[test]
    fn malformed_json_is_config_error() {
        assert!(matches!(
            parse_requests("{not json"),
            Err(BufferError::Config(_))
        ));
    }
}
