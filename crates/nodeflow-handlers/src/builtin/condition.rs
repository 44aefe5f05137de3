use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use tracing::debug;

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::graph::CONDITION;
use nodeflow_core::traits::{HandlerContext, NodeHandler};
use nodeflow_core::types::Params;
use nodeflow_engine::resolve::lookup;

/// Evaluates a predicate against the previous node's output.
///
/// Either `expression` (`status == "ok"`, `count > 3`,
/// `text contains "x"`) or the `field` / `operator` / `value` triple is
/// read. The run driver supplies `previous_output`.
pub struct ConditionHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Contains,
    Ge,
    Le,
    Gt,
    Lt,
}

impl Op {
    /// Symbols in match priority. Two-char operators first so `>=` is not
    /// read as `>`.
    const SYMBOLS: [(&'static str, Op); 7] = [
        (" contains ", Op::Contains),
        ("!=", Op::Ne),
        ("==", Op::Eq),
        (">=", Op::Ge),
        ("<=", Op::Le),
        (">", Op::Gt),
        ("<", Op::Lt),
    ];

    fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "==" | "=" | "eq" | "equals" => Some(Self::Eq),
            "!=" | "ne" | "not_equals" => Some(Self::Ne),
            "contains" => Some(Self::Contains),
            ">=" | "gte" => Some(Self::Ge),
            "<=" | "lte" => Some(Self::Le),
            ">" | "gt" | "greater_than" => Some(Self::Gt),
            "<" | "lt" | "less_than" => Some(Self::Lt),
            _ => None,
        }
    }
}

impl NodeHandler for ConditionHandler {
    fn name(&self) -> &str {
        CONDITION
    }

    fn description(&self) -> &str {
        "Evaluate a predicate on the previous output and pick the true/false branch."
    }

    fn execute(&self, params: Params, ctx: HandlerContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let empty = Value::Object(Map::new());
            let data = params.get("previous_output").unwrap_or(&empty);

            let result = match params.get("expression") {
                Some(Value::Bool(b)) => *b,
                Some(Value::String(expr)) if !expr.trim().is_empty() => {
                    evaluate_expression(expr, data)?
                }
                _ => {
                    let field = params.get("field").and_then(Value::as_str).ok_or_else(|| {
                        NodeflowError::Validation(
                            "condition needs an `expression` or a `field`".to_string(),
                        )
                    })?;
                    let op_name = params
                        .get("operator")
                        .and_then(Value::as_str)
                        .unwrap_or("==");
                    let op = Op::parse(op_name).ok_or_else(|| {
                        NodeflowError::Validation(format!("unknown operator: {}", op_name))
                    })?;
                    let rhs = params.get("value").cloned().unwrap_or(Value::Null);
                    compare(lookup(data, field), op, &rhs)
                }
            };

            debug!(node_id = %ctx.node_id, result, "Condition evaluated");
            Ok(json!({
                "result": result,
                "branch": if result { "true" } else { "false" },
            }))
        })
    }
}

/// Evaluate `key OP literal` against `data`.
fn evaluate_expression(expr: &str, data: &Value) -> Result<bool> {
    let expr = expr.trim();
    match expr {
        "true" => return Ok(true),
        "false" => return Ok(false),
        _ => {}
    }

    let (key, op, literal) = split_operator(expr).ok_or_else(|| {
        NodeflowError::Validation(format!("cannot parse condition expression: {}", expr))
    })?;
    let rhs = parse_literal(literal);
    Ok(compare(lookup(data, key.trim()), op, &rhs))
}

/// Split at the leftmost operator that is not inside a quoted literal.
fn split_operator(expr: &str) -> Option<(&str, Op, &str)> {
    let mut quote: Option<char> = None;
    for (i, c) in expr.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None => {
                let rest = &expr[i..];
                if let Some((symbol, op)) = Op::SYMBOLS
                    .iter()
                    .find(|(symbol, _)| rest.starts_with(*symbol))
                {
                    return Some((&expr[..i], *op, &rest[symbol.len()..]));
                }
            }
        }
    }
    None
}

/// `"text"` and `'text'` are strings; numbers and booleans are typed;
/// anything else is a bare string.
fn parse_literal(raw: &str) -> Value {
    let raw = raw.trim();
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return Value::String(raw[1..raw.len() - 1].to_string());
        }
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => raw
            .parse::<f64>()
            .ok()
            .and_then(|n| serde_json::Number::from_f64(n).map(Value::Number))
            .unwrap_or_else(|| Value::String(raw.to_string())),
    }
}

fn compare(lhs: Option<&Value>, op: Op, rhs: &Value) -> bool {
    let Some(lhs) = lhs else {
        return false;
    };
    match op {
        Op::Eq => loosely_equal(lhs, rhs),
        Op::Ne => !loosely_equal(lhs, rhs),
        Op::Contains => match lhs {
            Value::String(s) => s.contains(&as_text(rhs)),
            Value::Array(items) => items.iter().any(|item| loosely_equal(item, rhs)),
            Value::Object(map) => map.contains_key(&as_text(rhs)),
            _ => false,
        },
        Op::Gt | Op::Ge | Op::Lt | Op::Le => match (as_number(lhs), as_number(rhs)) {
            (Some(a), Some(b)) => match op {
                Op::Gt => a > b,
                Op::Ge => a >= b,
                Op::Lt => a < b,
                _ => a <= b,
            },
            _ => false,
        },
    }
}

fn loosely_equal(lhs: &Value, rhs: &Value) -> bool {
    if lhs == rhs {
        return true;
    }
    match (as_number(lhs), as_number(rhs)) {
        (Some(a), Some(b)) => a == b,
        _ => as_text(lhs) == as_text(rhs),
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow_core::types::ExecutionId;
    use nodeflow_test_utils::params;

    async fn run(p: Value) -> Result<Value> {
        let ctx = HandlerContext::new(ExecutionId::from_str("e"), "cond");
        ConditionHandler.execute(params(p), ctx).await
    }

    #[tokio::test]
    async fn test_string_equality() {
        let out = run(json!({
            "expression": "status == \"ok\"",
            "previous_output": {"status": "ok"}
        }))
        .await
        .unwrap();
        assert_eq!(out, json!({"result": true, "branch": "true"}));
    }

    #[tokio::test]
    async fn test_numeric_comparisons() {
        let prev = json!({"count": 5, "text": "7"});
        for (expr, expected) in [
            ("count > 3", true),
            ("count >= 5", true),
            ("count < 5", false),
            ("count <= 4", false),
            ("text == 7", true),
            ("count != 5", false),
        ] {
            let out = run(json!({"expression": expr, "previous_output": prev}))
                .await
                .unwrap();
            assert_eq!(out["result"], json!(expected), "{}", expr);
        }
    }

    #[tokio::test]
    async fn test_contains_and_nested_paths() {
        let prev = json!({"body": {"title": "Invoice 42"}, "tags": ["a", "b"]});
        let out = run(json!({"expression": "body.title contains \"42\"", "previous_output": prev}))
            .await
            .unwrap();
        assert_eq!(out["branch"], "true");

        let out = run(json!({"expression": "tags contains 'c'", "previous_output": prev}))
            .await
            .unwrap();
        assert_eq!(out["branch"], "false");
    }

    #[test]
    fn test_operators_inside_quoted_literals() {
        let data = json!({"msg": "a!=b", "n": 5, "eq": "1==1"});
        assert!(evaluate_expression(r#"msg == "a!=b""#, &data).unwrap());
        assert!(!evaluate_expression(r#"msg != "a!=b""#, &data).unwrap());
        assert!(!evaluate_expression(r#"n > "1==1""#, &data).unwrap());
        assert!(evaluate_expression("eq == '1==1'", &data).unwrap());
        assert!(evaluate_expression(r#"msg contains "!=""#, &data).unwrap());
    }

    #[test]
    fn test_split_prefers_two_char_operators() {
        let (key, op, literal) = split_operator("count >= 5").unwrap();
        assert_eq!(key.trim(), "count");
        assert_eq!(op, Op::Ge);
        assert_eq!(literal.trim(), "5");
        assert!(split_operator(r#""a == b""#).is_none());
    }

    #[tokio::test]
    async fn test_missing_field_is_false() {
        let out = run(json!({"expression": "ghost == 1", "previous_output": {}}))
            .await
            .unwrap();
        assert_eq!(out["result"], false);
    }

    #[tokio::test]
    async fn test_field_operator_value_form() {
        let out = run(json!({
            "field": "amount",
            "operator": "greater_than",
            "value": 100,
            "previous_output": {"amount": 250}
        }))
        .await
        .unwrap();
        assert_eq!(out["result"], true);
    }

    #[tokio::test]
    async fn test_resolved_boolean_expression() {
        let out = run(json!({"expression": false})).await.unwrap();
        assert_eq!(out["branch"], "false");
    }

    #[tokio::test]
    async fn test_bad_input_is_an_error() {
        assert!(run(json!({"expression": "what even"})).await.is_err());
        assert!(run(json!({})).await.is_err());
        assert!(run(json!({"field": "x", "operator": "~="})).await.is_err());
    }
}
