use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::{HandlerContext, NodeHandler};
use nodeflow_core::types::Params;

/// Largest response body kept in a node result.
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Performs an HTTP request.
///
/// Output carries `status_code`, `ok`, `headers` and `body` (parsed as JSON
/// when it is JSON). A non-2xx response is reported as a failed result with
/// the same output.
pub struct HttpApiRequestHandler {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpApiRequestHandler {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for HttpApiRequestHandler {
    fn default() -> Self {
        Self::new(30)
    }
}

#[derive(Deserialize)]
struct HttpRequestInput {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, Value>,
    #[serde(default)]
    query: HashMap<String, Value>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    json: Option<Value>,
}
fn default_method() -> String {
    "GET".into()
}

impl NodeHandler for HttpApiRequestHandler {
    fn name(&self) -> &str {
        "http-api-request"
    }

    fn description(&self) -> &str {
        "Make an HTTP request. Returns status code, headers, and body."
    }

    fn execute(&self, params: Params, ctx: HandlerContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let p: HttpRequestInput = serde_json::from_value(Value::Object(params))
                .map_err(|e| NodeflowError::Validation(e.to_string()))?;
            if p.url.trim().is_empty() {
                return Err(NodeflowError::Validation("url must not be empty".into()));
            }

            let method = p
                .method
                .to_uppercase()
                .parse::<reqwest::Method>()
                .map_err(|e| NodeflowError::Validation(format!("Invalid method: {}", e)))?;

            let mut req = self
                .http
                .request(method.clone(), &p.url)
                .timeout(self.timeout);
            for (k, v) in &p.headers {
                req = req.header(k.as_str(), text(v));
            }
            if !p.query.is_empty() {
                let pairs: Vec<(String, String)> =
                    p.query.iter().map(|(k, v)| (k.clone(), text(v))).collect();
                req = req.query(&pairs);
            }
            req = match (p.json, p.body) {
                (Some(payload), _) => req.json(&payload),
                (None, Some(Value::String(body))) => req.body(body),
                (None, Some(Value::Null)) | (None, None) => req,
                (None, Some(structured)) => req.json(&structured),
            };

            debug!(node_id = %ctx.node_id, method = %method, url = %p.url, "Sending HTTP request");
            let resp = req
                .send()
                .await
                .map_err(|e| NodeflowError::execution(self.name(), e.to_string()))?;

            let status = resp.status();
            let headers: Map<String, Value> = resp
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_string(),
                        Value::String(v.to_str().unwrap_or("?").to_string()),
                    )
                })
                .collect();
            let raw = resp.text().await.unwrap_or_default();
            let body = serde_json::from_str::<Value>(&raw)
                .unwrap_or_else(|_| Value::String(truncate(&raw, MAX_BODY_BYTES).to_string()));

            let mut out = json!({
                "status_code": status.as_u16(),
                "ok": status.is_success(),
                "headers": headers,
                "body": body,
            });
            if !status.is_success() {
                if let Some(obj) = out.as_object_mut() {
                    obj.insert("status".into(), json!("failed"));
                    obj.insert(
                        "error".into(),
                        json!(format!(
                            "HTTP {} {}",
                            status.as_u16(),
                            status.canonical_reason().unwrap_or("")
                        )
                        .trim_end()),
                    );
                }
            }
            Ok(out)
        })
    }
}

fn text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow_core::types::ExecutionId;
    use nodeflow_engine::normalize;
    use nodeflow_test_utils::params;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn ctx() -> HandlerContext {
        HandlerContext::new(ExecutionId::from_str("e"), "http")
    }

    /// Serve exactly one canned HTTP response on a local port.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{}/api", addr)
    }

    #[tokio::test]
    async fn test_json_response() {
        let url = serve_once("200 OK", r#"{"id": 7}"#).await;
        let out = HttpApiRequestHandler::default()
            .execute(params(json!({"url": url, "method": "post", "json": {"a": 1}})), ctx())
            .await
            .unwrap();
        assert_eq!(out["status_code"], 200);
        assert_eq!(out["ok"], true);
        assert_eq!(out["body"]["id"], 7);
        assert_eq!(out["headers"]["content-type"], "application/json");
    }

    #[tokio::test]
    async fn test_error_status_normalizes_to_failure() {
        let url = serve_once("404 Not Found", r#"{"error": "missing"}"#).await;
        let raw = HttpApiRequestHandler::default()
            .execute(params(json!({"url": url})), ctx())
            .await
            .unwrap();
        let result = normalize(raw, "http-api-request");
        assert!(result.is_failed());
        assert_eq!(result.error.unwrap().message, "HTTP 404 Not Found");
        assert_eq!(result.output["status_code"], 404);
    }

    #[tokio::test]
    async fn test_input_validation() {
        let handler = HttpApiRequestHandler::default();
        assert!(handler.execute(params(json!({})), ctx()).await.is_err());
        assert!(handler
            .execute(params(json!({"url": "http://localhost", "method": "NOT A METHOD"})), ctx())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_one_handler_serves_repeated_requests() {
        let handler = HttpApiRequestHandler::new(5);
        assert_eq!(handler.timeout(), Duration::from_secs(5));
        for id in 0..2 {
            let url = serve_once("200 OK", r#"{"ok": true}"#).await;
            let out = handler
                .execute(params(json!({"url": url, "query": {"id": id}})), ctx())
                .await
                .unwrap();
            assert_eq!(out["status_code"], 200);
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
