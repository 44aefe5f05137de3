use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::graph::{Connection as Edge, ConnectionTarget, GraphPayload, Node, Position, Script};
use nodeflow_core::traits::NodeTypeCatalog;

use crate::exec_log::SqliteExecutionLog;
use crate::schema::{self, parse_timestamp, timestamp, SharedConnection};
use crate::validate::{build_connections, validate};

/// SQLite-backed store of scripts and their node graphs.
///
/// Saves are whole-graph replacements inside one transaction. Both
/// adjacency lists are recomputed from the submitted connection list on
/// every save and never patched.
pub struct GraphRepository {
    conn: SharedConnection,
    strip_data_fields: Vec<String>,
}

/// Columns of a stored node row that define its content.
struct StoredNode {
    created_at: String,
    updated_at: String,
    fingerprint: String,
}

impl GraphRepository {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::with_connection(schema::open(path)?))
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Ok(Self::with_connection(schema::in_memory()?))
    }

    fn with_connection(conn: SharedConnection) -> Self {
        Self {
            conn,
            strip_data_fields: vec!["color".to_string()],
        }
    }

    /// Keys removed from every node's `data` payload before it is written.
    pub fn with_strip_data_fields(mut self, fields: Vec<String>) -> Self {
        self.strip_data_fields = fields;
        self
    }

    /// Execution log sink sharing this repository's database.
    pub fn execution_log(&self) -> SqliteExecutionLog {
        SqliteExecutionLog::from_shared(self.conn.clone())
    }

    // ── Scripts ─────────────────────────────────────────────────

    pub fn create_script(&self, name: &str, description: Option<&str>) -> Result<Script> {
        let name = name.trim();
        if name.is_empty() {
            return Err(NodeflowError::Validation("script name must not be empty".into()));
        }

        let conn = self
            .conn
            .lock()
            .map_err(|e| NodeflowError::Database(e.to_string()))?;

        if find_script_row(&conn, name)?.is_some() {
            return Err(NodeflowError::DuplicateScript(name.to_string()));
        }

        let now = timestamp(Utc::now());
        conn.execute(
            "INSERT INTO scripts (name, description, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![name, description, now],
        )
        .map_err(|e| NodeflowError::Database(e.to_string()))?;
        let id = conn.last_insert_rowid();

        info!(script_id = id, name, "Script created");
        get_script_row(&conn, id)?.ok_or_else(|| NodeflowError::ScriptNotFound(id.to_string()))
    }

    pub fn get_script(&self, id: i64) -> Result<Script> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| NodeflowError::Database(e.to_string()))?;
        get_script_row(&conn, id)?.ok_or_else(|| NodeflowError::ScriptNotFound(id.to_string()))
    }

    pub fn find_script(&self, name: &str) -> Result<Option<Script>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| NodeflowError::Database(e.to_string()))?;
        find_script_row(&conn, name.trim())
    }

    pub fn list_scripts(&self) -> Result<Vec<Script>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| NodeflowError::Database(e.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, description, created_at, updated_at
                 FROM scripts ORDER BY id ASC",
            )
            .map_err(|e| NodeflowError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], script_from_row)
            .map_err(|e| NodeflowError::Database(e.to_string()))?;

        let mut scripts = Vec::new();
        for row in rows {
            scripts.push(row.map_err(|e| NodeflowError::Database(e.to_string()))?);
        }
        Ok(scripts)
    }

    /// Delete a script together with all of its nodes.
    pub fn delete_script(&self, id: i64) -> Result<()> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| NodeflowError::Database(e.to_string()))?;
        let tx = conn
            .transaction()
            .map_err(|e| NodeflowError::Database(e.to_string()))?;

        let nodes = tx
            .execute("DELETE FROM nodes WHERE script_id = ?1", params![id])
            .map_err(|e| NodeflowError::Database(e.to_string()))?;
        let deleted = tx
            .execute("DELETE FROM scripts WHERE id = ?1", params![id])
            .map_err(|e| NodeflowError::Database(e.to_string()))?;
        if deleted == 0 {
            return Err(NodeflowError::ScriptNotFound(id.to_string()));
        }

        tx.commit()
            .map_err(|e| NodeflowError::Database(e.to_string()))?;
        info!(script_id = id, nodes, "Script deleted");
        Ok(())
    }

    // ── Graph ───────────────────────────────────────────────────

    /// Load a script's nodes in creation order.
    ///
    /// Malformed JSON columns load as empty values. Nodes whose type is not
    /// in `catalog` are left out. When more than one `start` or `end` row is
    /// found, the earliest-created one is kept and the rest are deleted.
    pub fn load_nodes(&self, script_id: i64, catalog: &dyn NodeTypeCatalog) -> Result<Vec<Node>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| NodeflowError::Database(e.to_string()))?;
        if get_script_row(&conn, script_id)?.is_none() {
            return Err(NodeflowError::ScriptNotFound(script_id.to_string()));
        }

        let rows = read_node_rows(&conn, script_id)?;

        let mut seen_boundary: HashSet<String> = HashSet::new();
        let mut duplicates: Vec<(i64, String)> = Vec::new();
        let mut nodes = Vec::with_capacity(rows.len());

        for (row_id, node) in rows {
            if node.is_boundary() && !seen_boundary.insert(node.node_type.clone()) {
                duplicates.push((row_id, node.id));
                continue;
            }
            if !catalog.contains(&node.node_type) {
                warn!(
                    script_id,
                    node_id = %node.id,
                    node_type = %node.node_type,
                    "Skipping node of unregistered type"
                );
                continue;
            }
            nodes.push(node);
        }

        for (row_id, node_id) in &duplicates {
            warn!(script_id, node_id = %node_id, "Removing duplicate boundary node");
            conn.execute("DELETE FROM nodes WHERE row_id = ?1", params![row_id])
                .map_err(|e| NodeflowError::Database(e.to_string()))?;
        }

        prune_dangling(&mut nodes);
        debug!(script_id, count = nodes.len(), "Nodes loaded");
        Ok(nodes)
    }

    /// Load nodes plus the connections derived from them.
    pub fn load_graph(&self, script_id: i64, catalog: &dyn NodeTypeCatalog) -> Result<GraphPayload> {
        let nodes = self.load_nodes(script_id, catalog)?;
        let connections = build_connections(&nodes);
        Ok(GraphPayload { nodes, connections })
    }

    /// Replace a script's whole graph.
    ///
    /// The graph is validated first; a rejected graph leaves the stored one
    /// untouched. Nodes that already existed keep their `created_at`, and
    /// keep `updated_at` too when their content did not change.
    pub fn save(&self, script_id: i64, nodes: &[Node], connections: &[Edge]) -> Result<Vec<Node>> {
        validate(nodes, connections)?;

        let mut outgoing: HashMap<&str, Vec<ConnectionTarget>> = HashMap::new();
        let mut incoming: HashMap<&str, Vec<String>> = HashMap::new();
        for edge in connections {
            outgoing
                .entry(edge.from.as_str())
                .or_default()
                .push(ConnectionTarget {
                    to: edge.to.clone(),
                    output_type: edge.output_type.clone(),
                });
            let preds = incoming.entry(edge.to.as_str()).or_default();
            if !preds.contains(&edge.from) {
                preds.push(edge.from.clone());
            }
        }

        let mut conn = self
            .conn
            .lock()
            .map_err(|e| NodeflowError::Database(e.to_string()))?;
        let tx = conn
            .transaction()
            .map_err(|e| NodeflowError::Database(e.to_string()))?;

        if get_script_row(&tx, script_id)?.is_none() {
            return Err(NodeflowError::ScriptNotFound(script_id.to_string()));
        }

        let existing = read_stored_nodes(&tx, script_id)?;
        tx.execute("DELETE FROM nodes WHERE script_id = ?1", params![script_id])
            .map_err(|e| NodeflowError::Database(e.to_string()))?;

        let now = timestamp(Utc::now());
        let mut saved = Vec::with_capacity(nodes.len());

        for node in nodes {
            let mut node = node.clone();
            for field in &self.strip_data_fields {
                node.data.remove(field);
            }
            node.connected_to = outgoing.remove(node.id.as_str()).unwrap_or_default();
            node.connected_from = incoming.remove(node.id.as_str()).unwrap_or_default();

            let parameters = serde_json::to_string(&node.parameters)?;
            let data = serde_json::to_string(&node.data)?;
            let connected_to = serde_json::to_string(&node.connected_to)?;
            let connected_from = serde_json::to_string(&node.connected_from)?;
            let fingerprint = fingerprint(
                &node.node_type,
                node.position,
                &parameters,
                &data,
                &connected_to,
                &connected_from,
                node.description.as_deref(),
            );

            let (created_at, updated_at) = match existing.get(&node.id) {
                Some(prev) if prev.fingerprint == fingerprint => {
                    (prev.created_at.clone(), prev.updated_at.clone())
                }
                Some(prev) => (prev.created_at.clone(), now.clone()),
                None => (now.clone(), now.clone()),
            };

            tx.execute(
                "INSERT INTO nodes (script_id, node_id, node_type, position_x, position_y,
                                    parameters, data, connected_to, connected_from,
                                    description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    script_id,
                    node.id,
                    node.node_type,
                    node.position.x,
                    node.position.y,
                    parameters,
                    data,
                    connected_to,
                    connected_from,
                    node.description,
                    created_at,
                    updated_at,
                ],
            )
            .map_err(|e| NodeflowError::Database(e.to_string()))?;

            node.created_at = parse_timestamp(&created_at);
            node.updated_at = parse_timestamp(&updated_at);
            saved.push(node);
        }

        tx.execute(
            "UPDATE scripts SET updated_at = ?1 WHERE id = ?2",
            params![now, script_id],
        )
        .map_err(|e| NodeflowError::Database(e.to_string()))?;

        tx.commit()
            .map_err(|e| NodeflowError::Database(e.to_string()))?;

        info!(
            script_id,
            nodes = saved.len(),
            connections = connections.len(),
            "Graph saved"
        );
        Ok(saved)
    }
}

fn script_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Script> {
    let created: String = row.get(3)?;
    let updated: String = row.get(4)?;
    Ok(Script {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: parse_timestamp(&created).unwrap_or_else(Utc::now),
        updated_at: parse_timestamp(&updated).unwrap_or_else(Utc::now),
    })
}

fn get_script_row(conn: &Connection, id: i64) -> Result<Option<Script>> {
    conn.query_row(
        "SELECT id, name, description, created_at, updated_at FROM scripts WHERE id = ?1",
        params![id],
        script_from_row,
    )
    .optional()
    .map_err(|e| NodeflowError::Database(e.to_string()))
}

fn find_script_row(conn: &Connection, name: &str) -> Result<Option<Script>> {
    conn.query_row(
        "SELECT id, name, description, created_at, updated_at FROM scripts WHERE name = ?1",
        params![name],
        script_from_row,
    )
    .optional()
    .map_err(|e| NodeflowError::Database(e.to_string()))
}

fn read_node_rows(conn: &Connection, script_id: i64) -> Result<Vec<(i64, Node)>> {
    let mut stmt = conn
        .prepare(
            "SELECT row_id, node_id, node_type, position_x, position_y, parameters, data,
                    connected_to, connected_from, description, created_at, updated_at
             FROM nodes
             WHERE script_id = ?1
             ORDER BY created_at ASC, row_id ASC",
        )
        .map_err(|e| NodeflowError::Database(e.to_string()))?;

    let rows = stmt
        .query_map(params![script_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, Option<f64>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, String>(11)?,
            ))
        })
        .map_err(|e| NodeflowError::Database(e.to_string()))?;

    let mut nodes = Vec::new();
    for row in rows {
        let (row_id, id, node_type, x, y, parameters, data, to, from, description, created, updated) =
            row.map_err(|e| NodeflowError::Database(e.to_string()))?;

        let node = Node {
            parameters: parse_column(&id, "parameters", parameters.as_deref()),
            data: parse_column(&id, "data", data.as_deref()),
            connected_to: parse_column(&id, "connected_to", to.as_deref()),
            connected_from: parse_column(&id, "connected_from", from.as_deref()),
            position: Position {
                x: x.unwrap_or_default(),
                y: y.unwrap_or_default(),
            },
            description,
            created_at: parse_timestamp(&created),
            updated_at: parse_timestamp(&updated),
            id,
            node_type,
        };
        nodes.push((row_id, node));
    }
    Ok(nodes)
}

fn read_stored_nodes(conn: &Connection, script_id: i64) -> Result<HashMap<String, StoredNode>> {
    let mut stmt = conn
        .prepare(
            "SELECT node_id, node_type, position_x, position_y, parameters, data,
                    connected_to, connected_from, description, created_at, updated_at
             FROM nodes WHERE script_id = ?1",
        )
        .map_err(|e| NodeflowError::Database(e.to_string()))?;

    let rows = stmt
        .query_map(params![script_id], |row| {
            let node_type: String = row.get(1)?;
            let position = Position {
                x: row.get::<_, Option<f64>>(2)?.unwrap_or_default(),
                y: row.get::<_, Option<f64>>(3)?.unwrap_or_default(),
            };
            let parameters: Option<String> = row.get(4)?;
            let data: Option<String> = row.get(5)?;
            let to: Option<String> = row.get(6)?;
            let from: Option<String> = row.get(7)?;
            let description: Option<String> = row.get(8)?;
            Ok((
                row.get::<_, String>(0)?,
                StoredNode {
                    fingerprint: fingerprint(
                        &node_type,
                        position,
                        parameters.as_deref().unwrap_or_default(),
                        data.as_deref().unwrap_or_default(),
                        to.as_deref().unwrap_or_default(),
                        from.as_deref().unwrap_or_default(),
                        description.as_deref(),
                    ),
                    created_at: row.get(9)?,
                    updated_at: row.get(10)?,
                },
            ))
        })
        .map_err(|e| NodeflowError::Database(e.to_string()))?;

    let mut stored = HashMap::new();
    for row in rows {
        let (id, node) = row.map_err(|e| NodeflowError::Database(e.to_string()))?;
        stored.insert(id, node);
    }
    Ok(stored)
}

fn fingerprint(
    node_type: &str,
    position: Position,
    parameters: &str,
    data: &str,
    connected_to: &str,
    connected_from: &str,
    description: Option<&str>,
) -> String {
    format!(
        "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
        node_type,
        position.x,
        position.y,
        parameters,
        data,
        connected_to,
        connected_from,
        description.unwrap_or_default()
    )
}

/// Parse a JSON column, falling back to the type's default on bad input.
fn parse_column<T: DeserializeOwned + Default>(node_id: &str, column: &str, raw: Option<&str>) -> T {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return T::default();
    };
    match serde_json::from_str::<Value>(raw).and_then(serde_json::from_value) {
        Ok(v) => v,
        Err(e) => {
            warn!(node_id, column, error = %e, "Malformed JSON column, using empty value");
            T::default()
        }
    }
}

/// Drop adjacency entries that point at nodes not in the loaded set.
fn prune_dangling(nodes: &mut [Node]) {
    let ids: HashSet<String> = nodes.iter().map(|n| n.id.clone()).collect();
    for node in nodes.iter_mut() {
        node.connected_to.retain(|t| ids.contains(&t.to));
        node.connected_from.retain(|id| ids.contains(id));
    }
}
