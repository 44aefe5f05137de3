use std::any::Any;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::Result;
use crate::types::{ExecutionId, NodeExecutionLog, Params};

/// Per-invocation facts a handler may need beyond its parameters.
#[derive(Clone)]
pub struct HandlerContext {
    pub execution_id: ExecutionId,
    pub script_id: Option<i64>,
    pub node_id: String,
    pub node_name: Option<String>,
    /// Process-wide side table for state that outlives a single node,
    /// keyed by execution id.
    pub resources: Option<Arc<dyn ResourceStore>>,
}

impl HandlerContext {
    pub fn new(execution_id: ExecutionId, node_id: impl Into<String>) -> Self {
        Self {
            execution_id,
            script_id: None,
            node_id: node_id.into(),
            node_name: None,
            resources: None,
        }
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("execution_id", &self.execution_id)
            .field("script_id", &self.script_id)
            .field("node_id", &self.node_id)
            .field("node_name", &self.node_name)
            .field("resources", &self.resources.is_some())
            .finish()
    }
}

/// The logic registered under a node type tag.
pub trait NodeHandler: Send + Sync + 'static {
    /// Node type tag this handler is registered under (e.g. "click").
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str {
        ""
    }

    /// Run the handler. The raw value may have any shape; it is normalized
    /// by the engine before anyone else sees it.
    fn execute(&self, params: Params, ctx: HandlerContext) -> BoxFuture<'_, Result<Value>>;
}

/// Set of node types currently known to the process.
pub trait NodeTypeCatalog: Send + Sync {
    fn contains(&self, node_type: &str) -> bool;
}

impl NodeTypeCatalog for std::collections::HashSet<String> {
    fn contains(&self, node_type: &str) -> bool {
        std::collections::HashSet::contains(self, node_type)
    }
}

/// Destination for node execution log events.
pub trait ExecutionLogSink: Send + Sync + 'static {
    fn record(&self, event: NodeExecutionLog) -> BoxFuture<'_, Result<()>>;
}

/// A stateful value held across nodes (an open session, a client, a cursor).
pub type Resource = Arc<dyn Any + Send + Sync>;

/// Process-wide side table of resources keyed by execution id.
///
/// Whoever opens a resource is responsible for removing it. A run that dies
/// midway leaves its entries behind until `release` is called for it.
pub trait ResourceStore: Send + Sync + 'static {
    fn insert(&self, execution_id: &ExecutionId, key: &str, value: Resource) -> Option<Resource>;
    fn get(&self, execution_id: &ExecutionId, key: &str) -> Option<Resource>;
    fn remove(&self, execution_id: &ExecutionId, key: &str) -> Option<Resource>;
    /// Drop every resource of an execution, returning how many were held.
    fn release(&self, execution_id: &ExecutionId) -> usize;
}
