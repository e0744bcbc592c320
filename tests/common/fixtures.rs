//! Builders for wire-format steps and payloads.

use serde_json::{json, Value};

/// A `line` step in the backend's wire format.
pub fn line_step(id: u64, line: u32, globals: Value) -> Value {
    json!({
        "id": id,
        "event": "line",
        "line_number": line,
        "frame_id": 1,
        "global_diff": globals,
        "local_diff": {},
        "return_value": null,
        "error": null
    })
}

pub fn event_frame(step: Value) -> Value {
    json!({"type": "event", "data": step})
}

pub fn sync_payload(timeline: Vec<Value>, timeline_id: Option<u64>) -> Value {
    let nodes: Vec<Value> = (1..=5)
        .map(|line| json!({"id": line.to_string(), "data": {"source_segment": format!("line {line}")}}))
        .collect();
    json!({
        "nodes": nodes,
        "timeline": timeline,
        "timeline_id": timeline_id,
        "node_id": null
    })
}
