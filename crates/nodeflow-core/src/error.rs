use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeflowError {
    // Graph validation errors
    #[error(
        "Node '{node_id}' of type '{node_type}' has {edges} outgoing connections; only condition nodes may branch"
    )]
    FanOut {
        node_id: String,
        node_type: String,
        edges: usize,
    },

    #[error("Node '{node_id}' is missing required field '{field}'")]
    MissingField { node_id: String, field: String },

    #[error("Duplicate node id in graph: {0}")]
    DuplicateNode(String),

    #[error("Connection {from} -> {to} references a node that is not in the graph")]
    UnknownNode { from: String, to: String },

    #[error("Graph contains {count} '{node_type}' nodes; at most one is allowed")]
    DuplicateBoundary { node_type: String, count: usize },

    #[error("Script name already exists: {0}")]
    DuplicateScript(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    // Lookup errors
    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("No handler registered for node type: {0}")]
    HandlerNotFound(String),

    // Execution errors
    #[error("Handler {handler} failed: {message}")]
    HandlerExecution { handler: String, message: String },

    #[error("Parallel execution within a run is not supported")]
    ParallelUnsupported,

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Execution log sink error: {0}")]
    LogSink(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NodeflowError {
    /// Create a handler execution error.
    pub fn execution(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandlerExecution {
            handler: handler.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a graph/input validation failure that the caller
    /// can fix by resubmitting corrected input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::FanOut { .. }
                | Self::MissingField { .. }
                | Self::DuplicateNode(_)
                | Self::UnknownNode { .. }
                | Self::DuplicateBoundary { .. }
                | Self::DuplicateScript(_)
                | Self::Validation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, NodeflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_out_message_names_node() {
        let err = NodeflowError::FanOut {
            node_id: "click_1".into(),
            node_type: "click".into(),
            edges: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("click_1"));
        assert!(msg.contains("click"));
        assert!(msg.contains('2'));
        assert!(err.is_validation());
    }

    #[test]
    fn test_infrastructure_errors_are_not_validation() {
        assert!(!NodeflowError::Database("locked".into()).is_validation());
        assert!(!NodeflowError::ParallelUnsupported.is_validation());
        assert!(!NodeflowError::execution("click", "boom").is_validation());
    }
}
