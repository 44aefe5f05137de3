use futures::future::BoxFuture;
use serde_json::{json, Value};

use nodeflow_core::error::Result;
use nodeflow_core::graph::{END, START};
use nodeflow_core::traits::{HandlerContext, NodeHandler};
use nodeflow_core::types::Params;

// ── StartHandler ────────────────────────────────────────────────

pub struct StartHandler;

impl NodeHandler for StartHandler {
    fn name(&self) -> &str {
        START
    }
    fn description(&self) -> &str {
        "Entry marker of a workflow."
    }
    fn execute(&self, _params: Params, ctx: HandlerContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            Ok(json!({
                "marker": START,
                "execution_id": ctx.execution_id.to_string(),
            }))
        })
    }
}

// ── EndHandler ──────────────────────────────────────────────────

pub struct EndHandler;

impl NodeHandler for EndHandler {
    fn name(&self) -> &str {
        END
    }
    fn description(&self) -> &str {
        "Exit marker of a workflow."
    }
    fn execute(&self, _params: Params, ctx: HandlerContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            Ok(json!({
                "marker": END,
                "execution_id": ctx.execution_id.to_string(),
            }))
        })
    }
}
