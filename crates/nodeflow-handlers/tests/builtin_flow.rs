use std::sync::Arc;

use serde_json::json;

use nodeflow_core::config::HandlersConfig;
use nodeflow_engine::{run_with_repeat, RunDriver, RunNode, RunRequest};
use nodeflow_handlers::default_registry;
use nodeflow_test_utils::params;

fn driver() -> RunDriver {
    RunDriver::new(Arc::new(default_registry(&HandlersConfig::default())))
}

#[tokio::test]
async fn test_repeat_body_reads_variable_set_before_loop() {
    let driver = driver();
    let request = RunRequest::new(vec![
        RunNode::new("s", "start"),
        RunNode::new("set", "set-variable")
            .with_parameters(params(json!({"name": "target", "value": "ready"}))),
        RunNode::new("check", "condition")
            .with_parameters(params(json!({"expression": "value == \"ready\""}))),
        RunNode::new("loop", "repeat").with_parameters(params(json!({"repeat_count": 2}))),
        RunNode::new("get", "get-variable").with_parameters(params(json!({"name": "target"}))),
        RunNode::new("e", "end"),
    ]);
    let execution_id = request.execution_id.clone();

    let report = run_with_repeat(&driver, request).await.unwrap();
    assert!(report.success, "failed nodes: {:?}", report.failed_nodes());

    let ids: Vec<&str> = report.results.iter().map(|s| s.node_id.as_str()).collect();
    assert_eq!(ids, vec!["s", "set", "check", "loop", "get", "e", "get", "e"]);

    assert_eq!(report.results[2].result.output["result"], true);
    for step in report.results.iter().filter(|s| s.node_id == "get") {
        assert_eq!(step.result.output["value"], "ready");
        assert_eq!(step.result.output["found"], true);
    }

    assert_eq!(driver.resources().release(&execution_id), 1);
}

#[tokio::test]
async fn test_handler_errors_do_not_stop_the_run() {
    let driver = driver();
    let report = driver
        .run(RunRequest::new(vec![
            RunNode::new("s", "start"),
            RunNode::new("w", "wait").with_parameters(params(json!({"duration_ms": "soon"}))),
            RunNode::new("e", "end"),
        ]))
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.failed_nodes(), vec!["w"]);
    let err = report.results[1].result.error.as_ref().unwrap();
    assert_eq!(err.reason, "execution_error");
    assert!(err.message.contains("invalid duration_ms"));
    assert_eq!(report.results[2].result.output["marker"], "end");
}
