//! Fakes and fixtures shared by the nodeflow crates' tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;
use serde_json::Value;

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::graph::{Connection, GraphPayload, Node};
use nodeflow_core::traits::{ExecutionLogSink, HandlerContext, NodeHandler};
use nodeflow_core::types::{NodeExecutionLog, Params};

/// Turn a `json!({...})` literal into a parameter map.
pub fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        other => panic!("params() needs a JSON object, got {}", other),
    }
}

/// Handler that returns its parameters unchanged.
pub struct EchoHandler {
    name: String,
}

impl EchoHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl NodeHandler for EchoHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echo parameters back"
    }

    fn execute(&self, params: Params, _ctx: HandlerContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move { Ok(Value::Object(params)) })
    }
}

/// Handler that fails on every call and counts the calls.
pub struct FailingHandler {
    name: String,
    message: String,
    calls: AtomicUsize,
}

impl FailingHandler {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl NodeHandler for FailingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, _params: Params, _ctx: HandlerContext) -> BoxFuture<'_, Result<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let err = NodeflowError::execution(&self.name, &self.message);
        Box::pin(async move { Err(err) })
    }
}

/// Handler that panics inside its future.
pub struct PanicHandler {
    name: String,
}

impl PanicHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl NodeHandler for PanicHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, _params: Params, _ctx: HandlerContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let value: Option<Value> = None;
            Ok(value.unwrap_or_else(|| panic!("handler {} blew up", self.name)))
        })
    }
}

/// Log sink that keeps every event in memory.
#[derive(Default)]
pub struct RecordingLogSink {
    events: Mutex<Vec<NodeExecutionLog>>,
}

impl RecordingLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NodeExecutionLog> {
        self.events.lock().unwrap().clone()
    }
}

impl ExecutionLogSink for RecordingLogSink {
    fn record(&self, event: NodeExecutionLog) -> BoxFuture<'_, Result<()>> {
        self.events.lock().unwrap().push(event);
        Box::pin(async { Ok(()) })
    }
}

/// Log sink that fails its first `failures` attempts, then records.
pub struct FlakySink {
    failures: usize,
    attempts: AtomicUsize,
    inner: RecordingLogSink,
}

impl FlakySink {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            attempts: AtomicUsize::new(0),
            inner: RecordingLogSink::new(),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<NodeExecutionLog> {
        self.inner.events()
    }
}

impl ExecutionLogSink for FlakySink {
    fn record(&self, event: NodeExecutionLog) -> BoxFuture<'_, Result<()>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Box::pin(async { Err(NodeflowError::LogSink("sink unavailable".into())) });
        }
        self.inner.record(event)
    }
}

/// A node with parameters.
pub fn node(id: &str, node_type: &str, parameters: Value) -> Node {
    Node::new(id, node_type).with_parameters(params(parameters))
}

/// `start -> a -> b -> ... -> end` using `click` for the middle nodes.
pub fn linear_graph(middle: &[&str]) -> GraphPayload {
    let mut ids = vec!["start".to_string()];
    ids.extend(middle.iter().map(|s| s.to_string()));
    ids.push("end".to_string());

    let nodes = ids
        .iter()
        .map(|id| {
            let node_type = match id.as_str() {
                "start" => "start",
                "end" => "end",
                _ => "click",
            };
            Node::new(id.as_str(), node_type)
        })
        .collect();
    let connections = ids
        .windows(2)
        .map(|pair| Connection::new(pair[0].as_str(), pair[1].as_str()))
        .collect();

    GraphPayload { nodes, connections }
}

/// Temp directory holding a fresh database path.
pub fn temp_db() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nodeflow.db");
    (dir, path)
}
