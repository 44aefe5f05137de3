use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use nodeflow_core::types::NodeResult;

/// Per-run store of node results.
///
/// Results are keyed by node id and optionally by a human name. `order`
/// records completion order, so "the previous result" always means the most
/// recently completed node of this run, not a graph predecessor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    results: HashMap<String, NodeResult>,
    #[serde(default)]
    name_index: HashMap<String, String>,
    #[serde(default)]
    order: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current: Option<String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a result. Re-adding an id replaces its result but keeps its
    /// original position in the completion order.
    pub fn add_result(&mut self, node_id: &str, name: Option<&str>, result: NodeResult) {
        self.results.insert(node_id.to_string(), result);
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            self.name_index.insert(name.to_string(), node_id.to_string());
        }
        if !self.order.iter().any(|id| id == node_id) {
            self.order.push(node_id.to_string());
        }
    }

    /// Look up a result by id, or the last completed result when `node_id`
    /// is `None`.
    pub fn get_result(&self, node_id: Option<&str>) -> Option<&NodeResult> {
        match node_id {
            Some(id) => self.results.get(id),
            None => self.order.last().and_then(|id| self.results.get(id)),
        }
    }

    pub fn get_result_by_name(&self, name: &str) -> Option<&NodeResult> {
        self.name_index
            .get(name)
            .and_then(|id| self.results.get(id))
    }

    /// Mark the node that is about to execute.
    pub fn set_current(&mut self, node_id: &str) {
        self.current = Some(node_id.to_string());
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Node ids in completion order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Serialize for returning to a caller as debug context.
    pub fn to_map(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_map(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}
