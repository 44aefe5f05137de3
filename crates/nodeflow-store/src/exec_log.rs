use std::path::Path;

use futures::future::BoxFuture;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::ExecutionLogSink;
use nodeflow_core::types::{ExecutionId, ExecutionStatus, NodeExecutionLog};

use crate::schema::{self, parse_timestamp, timestamp, SharedConnection};

/// Node execution log stored in SQLite.
///
/// A `running` event inserts a row. A later terminal event for the same
/// `(execution_id, node_id)` upgrades the newest running row in place, so a
/// node appears once per invocation.
pub struct SqliteExecutionLog {
    conn: SharedConnection,
}

impl SqliteExecutionLog {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_shared(schema::open(path)?))
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Ok(Self::from_shared(schema::in_memory()?))
    }

    pub(crate) fn from_shared(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Every log row of an execution, oldest first.
    pub fn list_for_execution(&self, execution_id: &ExecutionId) -> Result<Vec<NodeExecutionLog>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| NodeflowError::Database(e.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT execution_id, script_id, node_id, node_type, node_name, status,
                        started_at, finished_at, duration_ms, parameters, result, error
                 FROM node_execution_logs
                 WHERE execution_id = ?1
                 ORDER BY id ASC",
            )
            .map_err(|e| NodeflowError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![execution_id.as_str()], |row| {
                let status: String = row.get(5)?;
                let started: String = row.get(6)?;
                let finished: Option<String> = row.get(7)?;
                let parameters: String = row.get(9)?;
                let result: String = row.get(10)?;
                Ok(NodeExecutionLog {
                    execution_id: ExecutionId(row.get(0)?),
                    script_id: row.get(1)?,
                    node_id: row.get(2)?,
                    node_type: row.get(3)?,
                    node_name: row.get(4)?,
                    status: ExecutionStatus::parse(&status).unwrap_or(ExecutionStatus::Failed),
                    started_at: parse_timestamp(&started).unwrap_or_default(),
                    finished_at: finished.as_deref().and_then(parse_timestamp),
                    duration_ms: row.get::<_, Option<i64>>(8)?.map(|ms| ms.max(0) as u64),
                    parameters: serde_json::from_str(&parameters).unwrap_or(Value::Null),
                    result: serde_json::from_str(&result).unwrap_or(Value::Null),
                    error: row.get(11)?,
                })
            })
            .map_err(|e| NodeflowError::Database(e.to_string()))?;

        let mut logs = Vec::new();
        for row in rows {
            logs.push(row.map_err(|e| NodeflowError::Database(e.to_string()))?);
        }
        Ok(logs)
    }

    fn write(&self, event: &NodeExecutionLog) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| NodeflowError::Database(e.to_string()))?;

        let parameters = serde_json::to_string(&event.parameters)?;
        let result = serde_json::to_string(&event.result)?;
        let finished = event.finished_at.map(timestamp);
        let duration = event.duration_ms.map(|ms| ms as i64);

        if event.status != ExecutionStatus::Running {
            let running: Option<i64> = conn
                .query_row(
                    "SELECT id FROM node_execution_logs
                     WHERE execution_id = ?1 AND node_id = ?2 AND status = 'running'
                     ORDER BY id DESC LIMIT 1",
                    params![event.execution_id.as_str(), event.node_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| NodeflowError::Database(e.to_string()))?;

            if let Some(id) = running {
                conn.execute(
                    "UPDATE node_execution_logs
                     SET status = ?1, finished_at = ?2, duration_ms = ?3, result = ?4, error = ?5
                     WHERE id = ?6",
                    params![event.status.as_str(), finished, duration, result, event.error, id],
                )
                .map_err(|e| NodeflowError::Database(e.to_string()))?;
                debug!(node_id = %event.node_id, status = event.status.as_str(), "Upgraded running log row");
                return Ok(());
            }
        }

        conn.execute(
            "INSERT INTO node_execution_logs
                (execution_id, script_id, node_id, node_type, node_name, status,
                 started_at, finished_at, duration_ms, parameters, result, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                event.execution_id.as_str(),
                event.script_id,
                event.node_id,
                event.node_type,
                event.node_name,
                event.status.as_str(),
                timestamp(event.started_at),
                finished,
                duration,
                parameters,
                result,
                event.error,
            ],
        )
        .map_err(|e| NodeflowError::Database(e.to_string()))?;
        Ok(())
    }
}

impl ExecutionLogSink for SqliteExecutionLog {
    fn record(&self, event: NodeExecutionLog) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.write(&event)
                .map_err(|e| NodeflowError::LogSink(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn running(exec: &str, node: &str) -> NodeExecutionLog {
        NodeExecutionLog {
            execution_id: ExecutionId::from_str(exec),
            script_id: Some(3),
            node_id: node.into(),
            node_type: "click".into(),
            node_name: Some("Click OK".into()),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            parameters: json!({"x": 1}),
            result: Value::Null,
            error: None,
        }
    }

    fn finish(mut event: NodeExecutionLog, status: ExecutionStatus) -> NodeExecutionLog {
        event.status = status;
        event.finished_at = Some(Utc::now());
        event.duration_ms = Some(12);
        event.result = json!({"status": status.as_str()});
        if status == ExecutionStatus::Failed {
            event.error = Some("window not found".into());
        }
        event
    }

    #[tokio::test]
    async fn test_running_row_is_upgraded() {
        let log = SqliteExecutionLog::in_memory().unwrap();
        let start = running("e1", "n1");
        log.record(start.clone()).await.unwrap();
        log.record(finish(start, ExecutionStatus::Completed)).await.unwrap();

        let rows = log.list_for_execution(&ExecutionId::from_str("e1")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ExecutionStatus::Completed);
        assert_eq!(rows[0].duration_ms, Some(12));
        assert_eq!(rows[0].parameters, json!({"x": 1}));
        assert_eq!(rows[0].node_name.as_deref(), Some("Click OK"));
    }

    #[tokio::test]
    async fn test_terminal_without_running_inserts() {
        let log = SqliteExecutionLog::in_memory().unwrap();
        let event = finish(running("e1", "n1"), ExecutionStatus::Failed);
        log.record(event).await.unwrap();

        let rows = log.list_for_execution(&ExecutionId::from_str("e1")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].error.as_deref(), Some("window not found"));
    }

    #[tokio::test]
    async fn test_repeated_node_gets_one_row_per_invocation() {
        let log = SqliteExecutionLog::in_memory().unwrap();
        for _ in 0..3 {
            let start = running("loop", "body");
            log.record(start.clone()).await.unwrap();
            log.record(finish(start, ExecutionStatus::Completed)).await.unwrap();
        }
        log.record(running("other", "body")).await.unwrap();

        let rows = log.list_for_execution(&ExecutionId::from_str("loop")).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.status == ExecutionStatus::Completed));
    }
}
