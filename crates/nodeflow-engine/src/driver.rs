use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::graph::{Node, CONDITION};
use nodeflow_core::traits::{HandlerContext, ResourceStore};
use nodeflow_core::types::{ExecutionId, ExecutionStatus, NodeExecutionLog, NodeResult, Params};

use crate::context::ExecutionContext;
use crate::delivery::BestEffortSink;
use crate::registry::HandlerRegistry;
use crate::resolve::resolve_params;
use crate::resources::ResourceTable;
use crate::result::failure;

/// One entry of the caller-linearized node list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub parameters: Params,
    #[serde(default)]
    pub data: Params,
}

impl RunNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            parameters: Params::new(),
            data: Params::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Params) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_data(mut self, data: Params) -> Self {
        self.data = data;
        self
    }

    /// Run-time name: explicit `name`, then `data.label`, then `data.name`.
    pub fn display_name(&self) -> Option<String> {
        self.name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| {
                ["label", "name"]
                    .iter()
                    .find_map(|k| self.data.get(*k).and_then(Value::as_str))
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
    }
}

impl From<&Node> for RunNode {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            node_type: node.node_type.clone(),
            name: node.display_name(),
            parameters: node.parameters.clone(),
            data: node.data.clone(),
        }
    }
}

/// A request to run one linear node sequence.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub execution_id: ExecutionId,
    pub script_id: Option<i64>,
    pub nodes: Vec<RunNode>,
    /// Parallel execution within a run. Requests that set it are rejected.
    pub parallel: bool,
}

impl RunRequest {
    pub fn new(nodes: Vec<RunNode>) -> Self {
        Self {
            execution_id: ExecutionId::generate(),
            script_id: None,
            nodes,
            parallel: false,
        }
    }

    pub fn with_execution_id(mut self, execution_id: ExecutionId) -> Self {
        self.execution_id = execution_id;
        self
    }

    pub fn with_script_id(mut self, script_id: i64) -> Self {
        self.script_id = Some(script_id);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Result of one executed node, in run order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub node_id: String,
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    pub duration_ms: u64,
    pub result: NodeResult,
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub execution_id: ExecutionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_id: Option<i64>,
    /// No node reported `failed`.
    pub success: bool,
    pub results: Vec<StepResult>,
    /// Serialized execution context, for diagnostics.
    pub context: Value,
}

impl RunReport {
    pub fn failed_nodes(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.result.is_failed())
            .map(|r| r.node_id.as_str())
            .collect()
    }

    /// Append the results of a follow-up invocation under the same execution.
    pub fn absorb(&mut self, next: RunReport) {
        self.success = self.success && next.success;
        self.results.extend(next.results);
        self.context = next.context;
    }
}

/// Runs caller-ordered node lists one node at a time.
///
/// Each run gets a fresh `ExecutionContext`. Node failures are recorded and
/// the run moves on; only a request for parallel execution fails the call.
pub struct RunDriver {
    registry: Arc<HandlerRegistry>,
    sink: Option<Arc<BestEffortSink>>,
    resources: Arc<dyn ResourceStore>,
}

impl RunDriver {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            sink: None,
            resources: Arc::new(ResourceTable::new()),
        }
    }

    pub fn with_log_sink(mut self, sink: BestEffortSink) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn with_resources(mut self, resources: Arc<dyn ResourceStore>) -> Self {
        self.resources = resources;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn resources(&self) -> Arc<dyn ResourceStore> {
        self.resources.clone()
    }

    pub async fn run(&self, request: RunRequest) -> Result<RunReport> {
        if request.parallel {
            warn!(execution_id = %request.execution_id, "Rejected parallel run request");
            return Err(NodeflowError::ParallelUnsupported);
        }

        let started = Instant::now();
        let mut ctx = ExecutionContext::new();
        let mut results = Vec::with_capacity(request.nodes.len());

        info!(
            execution_id = %request.execution_id,
            nodes = request.nodes.len(),
            "Run started"
        );

        for node in &request.nodes {
            let step = self.run_node(node, &request, &mut ctx).await;
            results.push(step);
        }

        let success = !results.iter().any(|s: &StepResult| s.result.is_failed());
        info!(
            execution_id = %request.execution_id,
            success,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run finished"
        );

        Ok(RunReport {
            execution_id: request.execution_id,
            script_id: request.script_id,
            success,
            results,
            context: ctx.to_map(),
        })
    }

    async fn run_node(
        &self,
        node: &RunNode,
        request: &RunRequest,
        ctx: &mut ExecutionContext,
    ) -> StepResult {
        let name = node.display_name();
        let params = self.prepare_params(node, name.as_deref(), request, ctx);

        ctx.set_current(&node.id);
        let started_at = Utc::now();
        let started = Instant::now();

        let mut log = NodeExecutionLog {
            execution_id: request.execution_id.clone(),
            script_id: request.script_id,
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            node_name: name.clone(),
            status: ExecutionStatus::Running,
            started_at,
            finished_at: None,
            duration_ms: None,
            parameters: Value::Object(params.clone()),
            result: Value::Null,
            error: None,
        };
        self.emit(log.clone()).await;

        let result = match self.registry.get(&node.node_type) {
            Some(handler) => {
                let handler_ctx = HandlerContext {
                    execution_id: request.execution_id.clone(),
                    script_id: request.script_id,
                    node_id: node.id.clone(),
                    node_name: name.clone(),
                    resources: Some(self.resources.clone()),
                };
                handler.call(Some(params), handler_ctx).await
            }
            None => {
                let err = NodeflowError::HandlerNotFound(node.node_type.clone());
                error!(
                    execution_id = %request.execution_id,
                    node_id = %node.id,
                    error = %err,
                    "Cannot execute node"
                );
                failure(&node.node_type, "handler_not_found", &err.to_string(), None)
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        if let Some(err) = &result.error {
            warn!(
                execution_id = %request.execution_id,
                node_id = %node.id,
                reason = %err.reason,
                error = %err.message,
                "Node failed, continuing run"
            );
        }

        log.status = result.status.into();
        log.finished_at = Some(Utc::now());
        log.duration_ms = Some(duration_ms);
        log.result = result.to_value();
        log.error = result.error.as_ref().map(|e| e.message.clone());
        self.emit(log).await;

        ctx.add_result(&node.id, name.as_deref(), result.clone());

        StepResult {
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            node_name: name,
            duration_ms,
            result,
        }
    }

    /// Merge parameters over data, add bookkeeping fields, resolve
    /// expressions, and hand condition nodes the previous output.
    fn prepare_params(
        &self,
        node: &RunNode,
        name: Option<&str>,
        request: &RunRequest,
        ctx: &ExecutionContext,
    ) -> Params {
        let mut merged = node.data.clone();
        for (k, v) in &node.parameters {
            merged.insert(k.clone(), v.clone());
        }
        merged.insert(
            "_executionId".to_string(),
            Value::String(request.execution_id.to_string()),
        );
        merged.insert(
            "_scriptId".to_string(),
            request.script_id.map(Value::from).unwrap_or(Value::Null),
        );
        merged.insert("_nodeId".to_string(), Value::String(node.id.clone()));
        merged.insert(
            "_nodeName".to_string(),
            name.map(|n| Value::String(n.to_string())).unwrap_or(Value::Null),
        );

        let mut params = resolve_params(&merged, ctx);

        if node.node_type == CONDITION {
            let previous = ctx
                .get_result(None)
                .map(|r| Value::Object(r.output.clone()))
                .unwrap_or_else(|| Value::Object(Map::new()));
            params.insert("previous_output".to_string(), previous);
        }
        params
    }

    async fn emit(&self, event: NodeExecutionLog) {
        if let Some(sink) = &self.sink {
            sink.deliver(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow_core::config::LogSinkConfig;
    use nodeflow_test_utils::{params, EchoHandler, FailingHandler, RecordingLogSink};
    use serde_json::json;

    fn registry() -> Arc<HandlerRegistry> {
        let mut registry = HandlerRegistry::new();
        registry.register(EchoHandler::new("echo"));
        registry.register(EchoHandler::new("condition"));
        registry.register(FailingHandler::new("explode", "kaboom"));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_run_continues_past_failure() {
        let driver = RunDriver::new(registry());
        let request = RunRequest::new(vec![
            RunNode::new("n1", "echo"),
            RunNode::new("n2", "explode"),
            RunNode::new("n3", "echo"),
        ]);
        let report = driver.run(request).await.unwrap();

        assert_eq!(report.results.len(), 3);
        assert!(!report.success);
        assert_eq!(report.failed_nodes(), vec!["n2"]);
        assert!(!report.results[2].result.is_failed());
    }

    #[tokio::test]
    async fn test_all_completed_is_success() {
        let driver = RunDriver::new(registry());
        let report = driver
            .run(RunRequest::new(vec![RunNode::new("a", "echo"), RunNode::new("b", "echo")]))
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.context["order"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_parallel_request_is_rejected() {
        let driver = RunDriver::new(registry());
        let request = RunRequest::new(vec![RunNode::new("a", "echo")]).with_parallel(true);
        let err = driver.run(request).await.unwrap_err();
        assert!(matches!(err, NodeflowError::ParallelUnsupported));
    }

    #[tokio::test]
    async fn test_missing_handler_fails_only_that_node() {
        let driver = RunDriver::new(registry());
        let report = driver
            .run(RunRequest::new(vec![
                RunNode::new("a", "excel-open"),
                RunNode::new("b", "echo"),
            ]))
            .await
            .unwrap();
        let err = report.results[0].result.error.as_ref().unwrap();
        assert_eq!(err.reason, "handler_not_found");
        assert!(err.message.contains("excel-open"));
        assert!(!report.results[1].result.is_failed());
        assert!(!report.success);
    }

    #[tokio::test]
    async fn test_parameters_win_over_data_and_bookkeeping_injected() {
        let driver = RunDriver::new(registry());
        let node = RunNode::new("n1", "echo")
            .with_data(params(json!({"label": "Greeter", "x": 1, "kept": true})))
            .with_parameters(params(json!({"x": 2})));
        let request = RunRequest::new(vec![node])
            .with_execution_id(ExecutionId::from_str("exec-7"))
            .with_script_id(4);
        let report = driver.run(request).await.unwrap();

        let output = &report.results[0].result.output;
        assert_eq!(output["x"], json!(2));
        assert_eq!(output["kept"], json!(true));
        assert_eq!(output["_executionId"], json!("exec-7"));
        assert_eq!(output["_scriptId"], json!(4));
        assert_eq!(output["_nodeId"], json!("n1"));
        assert_eq!(output["_nodeName"], json!("Greeter"));
        assert_eq!(report.results[0].node_name.as_deref(), Some("Greeter"));
    }

    #[tokio::test]
    async fn test_templates_read_previous_result() {
        let driver = RunDriver::new(registry());
        let report = driver
            .run(RunRequest::new(vec![
                RunNode::new("a", "echo").with_parameters(params(json!({"x": 100, "y": 200}))),
                RunNode::new("b", "echo").with_parameters(params(json!({
                    "copy": "{{$json.x}}",
                    "label": "pos=({{$json.x}},{{$json.y}})",
                    "direct": "outdata.output.y",
                    "missing": "outdata.output.missing"
                }))),
            ]))
            .await
            .unwrap();

        let output = &report.results[1].result.output;
        assert_eq!(output["copy"], json!(100));
        assert_eq!(output["label"], json!("pos=(100,200)"));
        assert_eq!(output["direct"], json!(200));
        assert_eq!(output["missing"], json!("outdata.output.missing"));
    }

    #[tokio::test]
    async fn test_condition_receives_previous_output() {
        let driver = RunDriver::new(registry());
        let report = driver
            .run(RunRequest::new(vec![
                RunNode::new("a", "echo").with_parameters(params(json!({"status": "ok", "n": 3}))),
                RunNode::new("c", "condition"),
            ]))
            .await
            .unwrap();
        let prev = &report.results[1].result.output["previous_output"];
        assert_eq!(prev["n"], json!(3));
    }

    #[tokio::test]
    async fn test_emits_running_then_terminal_events() {
        let recording = Arc::new(RecordingLogSink::new());
        let sink = BestEffortSink::new(recording.clone(), LogSinkConfig::default());
        let driver = RunDriver::new(registry()).with_log_sink(sink);

        driver
            .run(RunRequest::new(vec![
                RunNode::new("a", "echo"),
                RunNode::new("b", "explode"),
            ]))
            .await
            .unwrap();

        let events = recording.events();
        let statuses: Vec<ExecutionStatus> = events.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                ExecutionStatus::Running,
                ExecutionStatus::Completed,
                ExecutionStatus::Running,
                ExecutionStatus::Failed
            ]
        );
        assert_eq!(events[3].error.as_deref(), Some("kaboom"));
        assert!(events[1].duration_ms.is_some());
    }

    #[test]
    fn test_display_name_fallbacks() {
        let explicit = RunNode::new("a", "echo")
            .with_name("Explicit")
            .with_data(params(json!({"label": "Label"})));
        assert_eq!(explicit.display_name().as_deref(), Some("Explicit"));

        let labelled = RunNode::new("a", "echo").with_data(params(json!({"name": "Named"})));
        assert_eq!(labelled.display_name().as_deref(), Some("Named"));

        assert_eq!(RunNode::new("a", "echo").display_name(), None);
    }
}
