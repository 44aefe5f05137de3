//! Persisted workflow graph model.
//!
//! A `Script` owns a set of `Node`s. Edges are not stored as rows of their
//! own: each node carries `connected_to` (tagged successors) and
//! `connected_from` (predecessors), and both lists are always recomputed
//! together from the flat `Connection` list when a graph is saved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Params;

pub const START: &str = "start";
pub const END: &str = "end";
pub const CONDITION: &str = "condition";
pub const REPEAT: &str = "repeat";

/// Output tag of a repeat node's loop-back edge.
pub const LOOP_BACK: &str = "bottom";

/// A saved workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Canvas position. Cosmetic only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

/// One outgoing adjacency entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawTarget")]
pub struct ConnectionTarget {
    pub to: String,
    #[serde(rename = "outputType", default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<String>,
}

/// Older graphs stored `connected_to` as bare id strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTarget {
    Bare(String),
    Tagged {
        to: String,
        #[serde(rename = "outputType", alias = "output_type", default)]
        output_type: Option<String>,
    },
}

impl From<RawTarget> for ConnectionTarget {
    fn from(raw: RawTarget) -> Self {
        match raw {
            RawTarget::Bare(to) => Self {
                to,
                output_type: None,
            },
            RawTarget::Tagged { to, output_type } => Self { to, output_type },
        }
    }
}

/// A directed edge, flattened out of a node's `connected_to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub from: String,
    pub to: String,
    #[serde(
        rename = "outputType",
        alias = "output_type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub output_type: Option<String>,
}

impl Connection {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            output_type: None,
        }
    }

    pub fn tagged(
        from: impl Into<String>,
        to: impl Into<String>,
        output_type: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            output_type: Some(output_type.into()),
        }
    }

    pub fn is_loop_back(&self) -> bool {
        self.output_type.as_deref() == Some(LOOP_BACK)
    }
}

/// One step in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub parameters: Params,
    /// Opaque client payload (labels, UI hints).
    #[serde(default)]
    pub data: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub connected_to: Vec<ConnectionTarget>,
    #[serde(default)]
    pub connected_from: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            position: Position::default(),
            parameters: Params::new(),
            data: Params::new(),
            description: None,
            connected_to: vec![],
            connected_from: vec![],
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Params) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_data(mut self, data: Params) -> Self {
        self.data = data;
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    /// Human label from the data payload (`label`, then `name`).
    pub fn display_name(&self) -> Option<String> {
        ["label", "name"]
            .iter()
            .find_map(|k| self.data.get(*k).and_then(|v| v.as_str()))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    pub fn is_boundary(&self) -> bool {
        self.node_type == START || self.node_type == END
    }
}

/// A whole graph as submitted by a client or exported for one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphPayload {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}
