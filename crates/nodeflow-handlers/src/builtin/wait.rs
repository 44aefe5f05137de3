use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::{HandlerContext, NodeHandler};
use nodeflow_core::types::Params;

/// Longest wait a single node may request.
const MAX_WAIT_MS: u64 = 60 * 60 * 1000;

pub struct WaitHandler;

impl NodeHandler for WaitHandler {
    fn name(&self) -> &str {
        "wait"
    }

    fn description(&self) -> &str {
        "Pause the run for `duration_ms` milliseconds or `seconds` seconds."
    }

    fn execute(&self, params: Params, _ctx: HandlerContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let ms = wait_millis(&params)?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!({ "waited_ms": ms }))
        })
    }
}

fn wait_millis(params: &Params) -> Result<u64> {
    let ms = if let Some(v) = params.get("duration_ms") {
        number(v).ok_or_else(|| NodeflowError::Validation(format!("invalid duration_ms: {}", v)))?
    } else if let Some(v) = params.get("seconds") {
        number(v).ok_or_else(|| NodeflowError::Validation(format!("invalid seconds: {}", v)))? * 1000.0
    } else {
        return Err(NodeflowError::Validation(
            "wait needs `duration_ms` or `seconds`".to_string(),
        ));
    };

    if ms < 0.0 {
        return Err(NodeflowError::Validation("wait duration must not be negative".into()));
    }
    Ok((ms as u64).min(MAX_WAIT_MS))
}

fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
