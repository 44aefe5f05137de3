use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use nodeflow_core::config::LogSinkConfig;
use nodeflow_core::error::Result;
use nodeflow_core::traits::ExecutionLogSink;
use nodeflow_core::types::NodeExecutionLog;

/// Delivers execution log events with bounded retries and an overall
/// deadline. Delivery problems are logged and dropped; they never reach the
/// caller.
pub struct BestEffortSink {
    inner: Arc<dyn ExecutionLogSink>,
    config: LogSinkConfig,
}

impl BestEffortSink {
    pub fn new(inner: Arc<dyn ExecutionLogSink>, config: LogSinkConfig) -> Self {
        Self { inner, config }
    }

    /// Deliver one event. Returns whether it was accepted by the sink.
    pub async fn deliver(&self, event: NodeExecutionLog) -> bool {
        if !self.config.enabled {
            return false;
        }

        let node_id = event.node_id.clone();
        let execution_id = event.execution_id.clone();
        let deadline = Duration::from_millis(self.config.timeout_ms);

        match tokio::time::timeout(deadline, self.deliver_with_retries(event)).await {
            Ok(delivered) => delivered,
            Err(_) => {
                warn!(
                    execution_id = %execution_id,
                    node_id = %node_id,
                    timeout_ms = self.config.timeout_ms,
                    "Execution log delivery timed out"
                );
                false
            }
        }
    }

    async fn deliver_with_retries(&self, event: NodeExecutionLog) -> bool {
        let max_retries = self.config.max_retries;
        for attempt in 0..=max_retries {
            match self.inner.record(event.clone()).await {
                Ok(()) => return true,
                Err(e) if attempt < max_retries => {
                    let backoff = calculate_backoff(attempt, &self.config);
                    warn!(
                        attempt = attempt + 1,
                        max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retrying execution log delivery"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    warn!(
                        execution_id = %event.execution_id,
                        node_id = %event.node_id,
                        error = %e,
                        "Dropping execution log event"
                    );
                }
            }
        }
        false
    }
}

impl ExecutionLogSink for BestEffortSink {
    fn record(&self, event: NodeExecutionLog) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.deliver(event).await;
            Ok(())
        })
    }
}

fn calculate_backoff(attempt: u32, config: &LogSinkConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nodeflow_core::types::{ExecutionId, ExecutionStatus};
    use nodeflow_test_utils::{FlakySink, RecordingLogSink};
    use serde_json::Value;

    fn event() -> NodeExecutionLog {
        NodeExecutionLog {
            execution_id: ExecutionId::from_str("exec-1"),
            script_id: Some(1),
            node_id: "n1".into(),
            node_type: "wait".into(),
            node_name: None,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            parameters: Value::Null,
            result: Value::Null,
            error: None,
        }
    }

    fn fast_config() -> LogSinkConfig {
        LogSinkConfig {
            enabled: true,
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            timeout_ms: 1000,
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let flaky = Arc::new(FlakySink::new(2));
        let sink = BestEffortSink::new(flaky.clone(), fast_config());
        assert!(sink.deliver(event()).await);
        assert_eq!(flaky.attempts(), 3);
        assert_eq!(flaky.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let flaky = Arc::new(FlakySink::new(100));
        let sink = BestEffortSink::new(flaky.clone(), fast_config());
        assert!(!sink.deliver(event()).await);
        assert_eq!(flaky.attempts(), 4);
    }

    #[tokio::test]
    async fn test_errors_never_surface_through_trait() {
        let flaky = Arc::new(FlakySink::new(100));
        let sink = BestEffortSink::new(flaky, fast_config());
        assert!(sink.record(event()).await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_sink_skips_delivery() {
        let recording = Arc::new(RecordingLogSink::new());
        let mut config = fast_config();
        config.enabled = false;
        let sink = BestEffortSink::new(recording.clone(), config);
        assert!(!sink.deliver(event()).await);
        assert!(recording.events().is_empty());
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = LogSinkConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 300,
            ..LogSinkConfig::default()
        };
        for attempt in 0..10 {
            let backoff = calculate_backoff(attempt, &config);
            assert!(backoff.as_millis() <= 360);
        }
    }
}
