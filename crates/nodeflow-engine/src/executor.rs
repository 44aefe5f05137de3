use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use nodeflow_core::error::NodeflowError;
use nodeflow_core::traits::{HandlerContext, NodeHandler};
use nodeflow_core::types::{NodeResult, Params};

use crate::result::{failure, normalize};

/// A handler behind the single recovery boundary of the engine.
///
/// Calling a wrapped handler never fails: errors and panics alike come back
/// as a failed `NodeResult` with reason `execution_error`.
#[derive(Clone)]
pub struct WrappedHandler {
    action: String,
    inner: Arc<dyn NodeHandler>,
}

impl WrappedHandler {
    pub fn new(handler: impl NodeHandler) -> Self {
        Self::from_arc(Arc::new(handler))
    }

    pub fn from_arc(handler: Arc<dyn NodeHandler>) -> Self {
        Self {
            action: handler.name().to_string(),
            inner: handler,
        }
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn description(&self) -> &str {
        self.inner.description()
    }

    pub async fn call(&self, params: Option<Params>, ctx: HandlerContext) -> NodeResult {
        let params = params.unwrap_or_default();
        debug!(
            action = %self.action,
            node_id = %ctx.node_id,
            params = %serde_json::Value::Object(params.clone()),
            "Handler invoked"
        );

        let inner = &self.inner;
        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| inner.execute(params, ctx))) {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
            Err(panic) => Err(panic),
        };

        let result = match outcome {
            Ok(Ok(raw)) => normalize(raw, &self.action),
            Ok(Err(e)) => self.execution_failure(error_text(e)),
            Err(panic) => {
                let message = panic_text(panic);
                warn!(action = %self.action, error = %message, "Handler panicked");
                self.execution_failure(message)
            }
        };

        debug!(
            action = %self.action,
            status = result.status.as_str(),
            result = %result.to_value(),
            "Handler finished"
        );
        result
    }

    fn execution_failure(&self, message: String) -> NodeResult {
        let mut output = Map::new();
        output.insert("error".to_string(), Value::String(message.clone()));
        failure(&self.action, "execution_error", &message, Some(output))
    }
}

impl std::fmt::Debug for WrappedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedHandler")
            .field("action", &self.action)
            .finish()
    }
}

fn error_text(err: NodeflowError) -> String {
    match err {
        NodeflowError::HandlerExecution { message, .. } => message,
        other => other.to_string(),
    }
}

fn panic_text(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
