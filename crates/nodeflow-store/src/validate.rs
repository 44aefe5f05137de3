//! Structural checks run on a submitted graph before anything is written.

use std::collections::{HashMap, HashSet};

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::graph::{Connection, Node, CONDITION, END, REPEAT, START};

/// Flatten every node's `connected_to` into edge triples.
pub fn build_connections(nodes: &[Node]) -> Vec<Connection> {
    nodes
        .iter()
        .flat_map(|node| {
            node.connected_to.iter().map(move |target| Connection {
                from: node.id.clone(),
                to: target.to.clone(),
                output_type: target.output_type.clone(),
            })
        })
        .collect()
}

/// Validate a graph. Fails on the first violation found.
///
/// Checks, in order: required fields, unique ids, at most one `start` and
/// one `end`, connection endpoints, and fan-out. Only condition nodes may
/// have more than one outgoing edge; a repeat node's loop-back edge is not
/// counted.
pub fn validate(nodes: &[Node], connections: &[Connection]) -> Result<()> {
    let mut ids = HashSet::with_capacity(nodes.len());
    for node in nodes {
        if node.id.trim().is_empty() {
            return Err(NodeflowError::MissingField {
                node_id: "<unnamed>".to_string(),
                field: "id".to_string(),
            });
        }
        if node.node_type.trim().is_empty() {
            return Err(NodeflowError::MissingField {
                node_id: node.id.clone(),
                field: "type".to_string(),
            });
        }
        if !ids.insert(node.id.as_str()) {
            return Err(NodeflowError::DuplicateNode(node.id.clone()));
        }
    }

    for boundary in [START, END] {
        let count = nodes.iter().filter(|n| n.node_type == boundary).count();
        if count > 1 {
            return Err(NodeflowError::DuplicateBoundary {
                node_type: boundary.to_string(),
                count,
            });
        }
    }

    for conn in connections {
        if !ids.contains(conn.from.as_str()) || !ids.contains(conn.to.as_str()) {
            return Err(NodeflowError::UnknownNode {
                from: conn.from.clone(),
                to: conn.to.clone(),
            });
        }
    }

    let types: HashMap<&str, &str> = nodes
        .iter()
        .map(|n| (n.id.as_str(), n.node_type.as_str()))
        .collect();
    let mut outgoing: HashMap<&str, usize> = HashMap::new();
    for conn in connections {
        let node_type = types.get(conn.from.as_str()).copied().unwrap_or_default();
        if node_type == REPEAT && conn.is_loop_back() {
            continue;
        }
        *outgoing.entry(conn.from.as_str()).or_default() += 1;
    }

    for node in nodes {
        let edges = outgoing.get(node.id.as_str()).copied().unwrap_or(0);
        if node.node_type != CONDITION && edges > 1 {
            return Err(NodeflowError::FanOut {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
                edges,
            });
        }
    }

    Ok(())
}
