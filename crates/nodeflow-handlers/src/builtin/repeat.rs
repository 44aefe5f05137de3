use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::warn;

use nodeflow_core::error::Result;
use nodeflow_core::graph::REPEAT;
use nodeflow_core::traits::{HandlerContext, NodeHandler};
use nodeflow_core::types::Params;
use nodeflow_engine::repeat::REPEAT_COUNT;

/// Reports the coerced `repeat_count` of a loop. Re-running the body is up
/// to the caller (see `nodeflow_engine::run_with_repeat`).
pub struct RepeatHandler;

impl NodeHandler for RepeatHandler {
    fn name(&self) -> &str {
        REPEAT
    }

    fn description(&self) -> &str {
        "Report how many times the following nodes should run."
    }

    fn execute(&self, params: Params, ctx: HandlerContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let count = coerce_repeat_count(params.get(REPEAT_COUNT), &ctx.node_id);
            Ok(json!({ "repeat_count": count }))
        })
    }
}

/// Coerce a configured repeat count to an integer >= 1.
///
/// Integers, integral floats, and numeric strings are accepted. Anything
/// else, or a value below 1, becomes 1 with a warning.
pub fn coerce_repeat_count(raw: Option<&Value>, node_id: &str) -> u64 {
    let parsed = match raw {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().and_then(truncate)),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate))
        }
        _ => None,
    };

    match parsed {
        Some(n) if n >= 1 => n as u64,
        _ => {
            warn!(node_id, raw = ?raw, "Invalid repeat_count, using 1");
            1
        }
    }
}

/// Integral part of a float, if it fits in an `i64`. Casting would saturate
/// `inf` and huge values to `i64::MAX`.
fn truncate(f: f64) -> Option<i64> {
    (f.is_finite() && f.abs() < i64::MAX as f64).then(|| f.trunc() as i64)
}
