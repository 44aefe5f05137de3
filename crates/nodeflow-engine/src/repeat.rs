use serde_json::Value;
use tracing::{info, warn};

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::graph::REPEAT;

use crate::driver::{RunDriver, RunReport, RunRequest};

/// Output key a repeat node reports its coerced count under.
pub const REPEAT_COUNT: &str = "repeat_count";

/// Run a node list whose tail is repeated.
///
/// The list is split after its first `repeat` node. The prefix runs once,
/// then the suffix runs `repeat_count` times. Every invocation shares the
/// request's execution id and script id, so all iterations are logged as
/// one run.
pub async fn run_with_repeat(driver: &RunDriver, request: RunRequest) -> Result<RunReport> {
    if request.parallel {
        return Err(NodeflowError::ParallelUnsupported);
    }

    let Some(split) = request.nodes.iter().position(|n| n.node_type == REPEAT) else {
        return driver.run(request).await;
    };

    let RunRequest {
        execution_id,
        script_id,
        mut nodes,
        parallel,
    } = request;
    let body = nodes.split_off(split + 1);

    let mut report = driver
        .run(RunRequest {
            execution_id: execution_id.clone(),
            script_id,
            nodes,
            parallel,
        })
        .await?;

    let count = report
        .results
        .last()
        .and_then(|step| step.result.output.get(REPEAT_COUNT))
        .and_then(Value::as_u64)
        .filter(|n| *n >= 1)
        .unwrap_or_else(|| {
            warn!(execution_id = %execution_id, "Repeat node reported no count, running once");
            1
        });

    if body.is_empty() {
        return Ok(report);
    }

    for iteration in 1..=count {
        info!(execution_id = %execution_id, iteration, count, "Repeat iteration");
        let next = driver
            .run(RunRequest {
                execution_id: execution_id.clone(),
                script_id,
                nodes: body.clone(),
                parallel,
            })
            .await?;
        report.absorb(next);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use nodeflow_core::types::ExecutionId;
    use nodeflow_test_utils::{params, EchoHandler, FailingHandler};
    use serde_json::json;

    use crate::driver::RunNode;
    use crate::registry::HandlerRegistry;

    fn driver() -> RunDriver {
        let mut registry = HandlerRegistry::new();
        registry.register(EchoHandler::new("echo"));
        // Echo reports its parameters, so `repeat_count` flows straight through.
        registry.register(EchoHandler::new(REPEAT));
        registry.register(FailingHandler::new("explode", "nope"));
        RunDriver::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_without_repeat_runs_once() {
        let report = run_with_repeat(
            &driver(),
            RunRequest::new(vec![RunNode::new("a", "echo"), RunNode::new("b", "echo")]),
        )
        .await
        .unwrap();
        assert_eq!(report.results.len(), 2);
    }

    #[tokio::test]
    async fn test_suffix_repeats_under_same_execution() {
        let request = RunRequest::new(vec![
            RunNode::new("start", "echo"),
            RunNode::new("loop", REPEAT).with_parameters(params(json!({"repeat_count": 3}))),
            RunNode::new("body1", "echo"),
            RunNode::new("body2", "echo"),
        ])
        .with_execution_id(ExecutionId::from_str("exec-loop"));

        let report = run_with_repeat(&driver(), request).await.unwrap();
        let ids: Vec<&str> = report.results.iter().map(|r| r.node_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["start", "loop", "body1", "body2", "body1", "body2", "body1", "body2"]
        );
        assert!(report.success);
        for step in &report.results[2..] {
            assert_eq!(step.result.output["_executionId"], json!("exec-loop"));
        }
    }

    #[tokio::test]
    async fn test_failure_in_one_iteration_fails_run() {
        let request = RunRequest::new(vec![
            RunNode::new("loop", REPEAT).with_parameters(params(json!({"repeat_count": 2}))),
            RunNode::new("boom", "explode"),
        ]);
        let report = run_with_repeat(&driver(), request).await.unwrap();
        assert_eq!(report.results.len(), 3);
        assert!(!report.success);
    }

    #[tokio::test]
    async fn test_missing_count_runs_once() {
        let request = RunRequest::new(vec![
            RunNode::new("loop", REPEAT),
            RunNode::new("body", "echo"),
        ]);
        let report = run_with_repeat(&driver(), request).await.unwrap();
        assert_eq!(report.results.len(), 2);
    }

    #[tokio::test]
    async fn test_parallel_rejected() {
        let request = RunRequest::new(vec![RunNode::new("a", "echo")]).with_parallel(true);
        assert!(run_with_repeat(&driver(), request).await.is_err());
    }
}
