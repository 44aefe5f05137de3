//! Expression and path resolution over node parameters.
//!
//! Two addressing schemes are supported:
//!
//! - Template tokens, `{{ ... }}`, anywhere in a string:
//!   `{{$json.field}}` reads the previous result's output and
//!   `{{$node["Name"].output.field}}` reads a named node's full result
//!   (`json` is accepted as an alias for `output` there).
//! - Direct paths, values that start with `outdata.` or `indata.`, resolved
//!   against `{outdata: <previous full result>, indata: <own parameters>}`.
//!   The legacy `output.` and `output.data.` prefixes are rewritten to
//!   `outdata.output.` first.
//!
//! A miss never errors. Direct paths keep their original string; a token
//! that makes up the whole value becomes `null`; an embedded token becomes
//! the empty string.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::debug;

use nodeflow_core::types::{NodeResult, Params};

use crate::context::ExecutionContext;

fn template_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*(.+?)\s*\}\}").expect("template pattern is valid"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Index(usize),
}

/// Resolve every string inside `params`, walking nested maps and arrays.
pub fn resolve_params(params: &Params, ctx: &ExecutionContext) -> Params {
    let outdata = ctx
        .get_result(None)
        .map(NodeResult::to_value)
        .unwrap_or(Value::Null);
    let mut scope = Map::new();
    scope.insert("outdata".to_string(), outdata);
    scope.insert("indata".to_string(), Value::Object(params.clone()));
    let scope = Value::Object(scope);

    params
        .iter()
        .map(|(k, v)| (k.clone(), resolve_value(v, ctx, &scope)))
        .collect()
}

fn resolve_value(value: &Value, ctx: &ExecutionContext, scope: &Value) -> Value {
    match value {
        Value::String(s) => resolve_string(s, ctx, scope),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value(item, ctx, scope))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, ctx, scope)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(s: &str, ctx: &ExecutionContext, scope: &Value) -> Value {
    if let Some(path) = direct_path(s) {
        return match lookup(scope, &path) {
            Some(v) => v.clone(),
            None => {
                debug!(path = %s, "Direct path did not resolve, keeping original value");
                Value::String(s.to_string())
            }
        };
    }
    if s.contains("{{") {
        return resolve_template(s, ctx);
    }
    Value::String(s.to_string())
}

/// Rewrite a direct path into its `outdata.`/`indata.` form, if it is one.
fn direct_path(s: &str) -> Option<String> {
    if s.starts_with("outdata.") || s.starts_with("indata.") {
        Some(s.to_string())
    } else if let Some(rest) = s.strip_prefix("output.data.") {
        Some(format!("outdata.output.{}", rest))
    } else if s.starts_with("output.") {
        Some(format!("outdata.{}", s))
    } else {
        None
    }
}

/// Substitute every `{{ ... }}` token in `text`.
///
/// When the whole string is a single token the resolved value keeps its
/// type; otherwise each token is stringified in place.
pub fn resolve_template(text: &str, ctx: &ExecutionContext) -> Value {
    let re = template_re();

    if let Some(caps) = re.captures(text) {
        let whole = caps.get(0).map(|m| m.start() == 0 && m.end() == text.len());
        if whole == Some(true) {
            return evaluate(&caps[1], ctx).unwrap_or_else(|| {
                debug!(expr = %&caps[1], "Template token did not resolve");
                Value::Null
            });
        }
    }

    let replaced = re.replace_all(text, |caps: &Captures| match evaluate(&caps[1], ctx) {
        Some(v) => stringify(&v),
        None => {
            debug!(expr = %&caps[1], "Template token did not resolve");
            String::new()
        }
    });
    Value::String(replaced.into_owned())
}

fn evaluate(expr: &str, ctx: &ExecutionContext) -> Option<Value> {
    let expr = expr.trim();

    if let Some(rest) = expr.strip_prefix("$json") {
        let output = Value::Object(ctx.get_result(None)?.output.clone());
        let segments = parse_path(rest)?;
        return walk(&output, &segments).cloned();
    }

    if let Some(rest) = expr.strip_prefix("$node") {
        let mut segments = parse_path(rest)?;
        if segments.is_empty() {
            return None;
        }
        let name = match segments.remove(0) {
            Segment::Field(name) => name,
            Segment::Index(_) => return None,
        };
        let result = ctx.get_result_by_name(&name)?.to_value();
        if let Some(Segment::Field(first)) = segments.first_mut() {
            if first == "json" {
                *first = "output".to_string();
            }
        }
        return walk(&result, &segments).cloned();
    }

    None
}

/// Look up a dotted/bracketed path such as `items[2].id` under `root`.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = parse_path(path)?;
    walk(root, &segments)
}

fn walk<'a>(root: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |current, seg| match (seg, current) {
        (Segment::Field(key), Value::Object(map)) => map.get(key),
        (Segment::Index(i), Value::Array(items)) => items.get(*i),
        _ => None,
    })
}

/// Split `a.b["c d"][3]` into segments. Returns `None` on malformed
/// brackets.
fn parse_path(path: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut field = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !field.is_empty() {
                    segments.push(Segment::Field(std::mem::take(&mut field)));
                }
            }
            '[' => {
                if !field.is_empty() {
                    segments.push(Segment::Field(std::mem::take(&mut field)));
                }
                match chars.peek().copied() {
                    Some(quote @ ('"' | '\'')) => {
                        chars.next();
                        let mut key = String::new();
                        let mut terminated = false;
                        for c in chars.by_ref() {
                            if c == quote {
                                terminated = true;
                                break;
                            }
                            key.push(c);
                        }
                        if !terminated || chars.next() != Some(']') {
                            return None;
                        }
                        segments.push(Segment::Field(key));
                    }
                    _ => {
                        let mut index = String::new();
                        let mut closed = false;
                        for c in chars.by_ref() {
                            if c == ']' {
                                closed = true;
                                break;
                            }
                            index.push(c);
                        }
                        if !closed {
                            return None;
                        }
                        segments.push(Segment::Index(index.trim().parse().ok()?));
                    }
                }
            }
            c if c.is_whitespace() => {}
            c => field.push(c),
        }
    }
    if !field.is_empty() {
        segments.push(Segment::Field(field));
    }
    Some(segments)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
