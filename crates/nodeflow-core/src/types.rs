use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Opaque handler parameter map.
pub type Params = Map<String, Value>;

/// Identifier correlating every node log of one run, including all
/// iterations of a repeated subgraph.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    /// Generate a sortable id: `YYYYMMDD-HHMMSS-xxxxxx` (UTC).
    pub fn generate() -> Self {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", stamp, &suffix[..6]))
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }

    /// Accept a caller-supplied id. Blank ids are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        (!s.is_empty()).then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::generate()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal status of a node result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Completed,
    Failed,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Failure details attached to a failed result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub reason: String,
    pub message: String,
}

/// Canonical shape every node result is normalized into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub action: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub output: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeFailure>,
}

impl NodeResult {
    pub fn completed(action: impl Into<String>, output: Map<String, Value>) -> Self {
        Self {
            action: action.into(),
            status: NodeStatus::Completed,
            output,
            error: None,
        }
    }

    /// Build a failed result. `status` is always `failed` and `error` is
    /// always populated.
    pub fn failure(
        action: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
        output: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            action: action.into(),
            status: NodeStatus::Failed,
            output: output.unwrap_or_default(),
            error: Some(NodeFailure {
                reason: reason.into(),
                message: message.into(),
            }),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == NodeStatus::Failed
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Lifecycle status of a node execution log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl From<NodeStatus> for ExecutionStatus {
    fn from(status: NodeStatus) -> Self {
        match status {
            NodeStatus::Completed => Self::Completed,
            NodeStatus::Failed => Self::Failed,
        }
    }
}

/// Node execution log event delivered to an `ExecutionLogSink`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionLog {
    pub execution_id: ExecutionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_id: Option<i64>,
    pub node_id: String,
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
