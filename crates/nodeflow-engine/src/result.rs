//! Result normalization.
//!
//! Handlers may return whatever is convenient. Everything downstream
//! (persistence, variable pickers, the expression resolver) relies on the
//! canonical `NodeResult` shape with `output` always a flat map.

use serde_json::{Map, Value};

use nodeflow_core::types::{NodeFailure, NodeResult, NodeStatus};

/// Keys of a raw map that never leak into `output`.
const RESERVED_KEYS: [&str; 5] = ["action", "status", "output", "error", "message"];

/// Normalize a raw handler value into the canonical result shape.
pub fn normalize(raw: Value, action: &str) -> NodeResult {
    normalize_with_default(raw, action, None)
}

/// Like [`normalize`], but wraps `default` as the output when a raw map
/// carries nothing outside the reserved keys.
pub fn normalize_with_default(raw: Value, action: &str, default: Option<Value>) -> NodeResult {
    match raw {
        Value::Null => NodeResult::completed(action, Map::new()),
        Value::Object(map) => {
            if let Some(result) = canonical(&map, action) {
                return result;
            }

            let mut output: Map<String, Value> = map
                .iter()
                .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();

            if output.is_empty() {
                if let Some(default) = default {
                    output = wrap(default);
                }
            }

            if map.get("status").and_then(Value::as_str) == Some(NodeStatus::Failed.as_str()) {
                let failure = map
                    .get("error")
                    .or_else(|| map.get("message"))
                    .map(parse_failure)
                    .unwrap_or_else(|| NodeFailure {
                        reason: "execution_error".to_string(),
                        message: "handler reported failure".to_string(),
                    });
                return NodeResult::failure(action, failure.reason, failure.message, Some(output));
            }

            NodeResult::completed(action, output)
        }
        other => NodeResult::completed(action, wrap(other)),
    }
}

/// Build a failed result with `error: {reason, message}`.
pub fn failure(
    action: &str,
    reason: &str,
    message: &str,
    output: Option<Map<String, Value>>,
) -> NodeResult {
    NodeResult::failure(action, reason, message, output)
}

/// Accept a raw map that already has a known `status` and a map `output`.
fn canonical(map: &Map<String, Value>, action: &str) -> Option<NodeResult> {
    let status = map.get("status").and_then(Value::as_str).and_then(NodeStatus::parse)?;
    let output = map.get("output").and_then(Value::as_object)?.clone();
    let action = match map.get("action") {
        Some(Value::String(a)) if !a.is_empty() => a.clone(),
        _ => action.to_string(),
    };
    let error = map.get("error").filter(|e| !e.is_null()).map(parse_failure);

    Some(NodeResult {
        action,
        status,
        output,
        error,
    })
}

fn parse_failure(value: &Value) -> NodeFailure {
    match value {
        Value::Object(obj) => NodeFailure {
            reason: obj
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("execution_error")
                .to_string(),
            message: obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
        },
        Value::String(s) => NodeFailure {
            reason: "execution_error".to_string(),
            message: s.clone(),
        },
        other => NodeFailure {
            reason: "execution_error".to_string(),
            message: other.to_string(),
        },
    }
}

fn wrap(value: Value) -> Map<String, Value> {
    match value {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
