use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::{HandlerContext, NodeHandler, ResourceStore};
use nodeflow_core::types::Params;

/// Variables live in the resource side table under this prefix, scoped to
/// the execution id, so they survive across repeat iterations.
const PREFIX: &str = "var:";

fn store(ctx: &HandlerContext) -> Result<&Arc<dyn ResourceStore>> {
    ctx.resources
        .as_ref()
        .ok_or_else(|| NodeflowError::Validation("no resource table available".into()))
}

fn variable_name(params: &Params) -> Result<String> {
    params
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| NodeflowError::Validation("variable `name` is required".into()))
}

// ── SetVariableHandler ──────────────────────────────────────────

pub struct SetVariableHandler;

impl NodeHandler for SetVariableHandler {
    fn name(&self) -> &str {
        "set-variable"
    }
    fn description(&self) -> &str {
        "Store a value under a name for later nodes of the same execution."
    }
    fn execute(&self, params: Params, ctx: HandlerContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let name = variable_name(&params)?;
            let value = params.get("value").cloned().unwrap_or(Value::Null);
            let previous = store(&ctx)?.insert(
                &ctx.execution_id,
                &format!("{}{}", PREFIX, name),
                Arc::new(value.clone()),
            );
            Ok(json!({
                "name": name,
                "value": value,
                "replaced": previous.is_some(),
            }))
        })
    }
}

// ── GetVariableHandler ──────────────────────────────────────────

pub struct GetVariableHandler;

impl NodeHandler for GetVariableHandler {
    fn name(&self) -> &str {
        "get-variable"
    }
    fn description(&self) -> &str {
        "Read a value stored earlier in the same execution."
    }
    fn execute(&self, params: Params, ctx: HandlerContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let name = variable_name(&params)?;
            let stored = store(&ctx)?
                .get(&ctx.execution_id, &format!("{}{}", PREFIX, name))
                .and_then(|r| r.downcast_ref::<Value>().cloned());
            let found = stored.is_some();
            let value = stored
                .or_else(|| params.get("default").cloned())
                .unwrap_or(Value::Null);
            Ok(json!({
                "name": name,
                "value": value,
                "found": found,
            }))
        })
    }
}
