use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use tracing::debug;

use nodeflow_core::error::{NodeflowError, Result};

pub(crate) type SharedConnection = Arc<Mutex<Connection>>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS scripts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS nodes (
        row_id INTEGER PRIMARY KEY AUTOINCREMENT,
        script_id INTEGER NOT NULL REFERENCES scripts(id) ON DELETE CASCADE,
        node_id TEXT NOT NULL,
        node_type TEXT NOT NULL,
        position_x REAL NOT NULL DEFAULT 0,
        position_y REAL NOT NULL DEFAULT 0,
        parameters TEXT NOT NULL DEFAULT '{}',
        data TEXT NOT NULL DEFAULT '{}',
        connected_to TEXT NOT NULL DEFAULT '[]',
        connected_from TEXT NOT NULL DEFAULT '[]',
        description TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (script_id, node_id)
    );

    CREATE INDEX IF NOT EXISTS idx_nodes_script
        ON nodes(script_id, created_at, row_id);

    CREATE TABLE IF NOT EXISTS node_execution_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        execution_id TEXT NOT NULL,
        script_id INTEGER,
        node_id TEXT NOT NULL,
        node_type TEXT NOT NULL,
        node_name TEXT,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        duration_ms INTEGER,
        parameters TEXT NOT NULL DEFAULT 'null',
        result TEXT NOT NULL DEFAULT 'null',
        error TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_exec_logs_node
        ON node_execution_logs(execution_id, node_id, id);";

/// Open or create the nodeflow database at `path`.
pub(crate) fn open(path: &Path) -> Result<SharedConnection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            NodeflowError::Database(format!("Failed to create db directory: {}", e))
        })?;
    }

    let conn = Connection::open(path).map_err(|e| NodeflowError::Database(e.to_string()))?;

    // Enable WAL mode for better concurrent performance
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
        .map_err(|e| NodeflowError::Database(e.to_string()))?;

    init(&conn)?;
    debug!(path = %path.display(), "Database opened");
    Ok(Arc::new(Mutex::new(conn)))
}

/// Open an in-memory database (for testing).
pub(crate) fn in_memory() -> Result<SharedConnection> {
    let conn = Connection::open_in_memory().map_err(|e| NodeflowError::Database(e.to_string()))?;
    init(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys=ON;")
        .map_err(|e| NodeflowError::Database(e.to_string()))?;
    conn.execute_batch(SCHEMA)
        .map_err(|e| NodeflowError::Database(e.to_string()))
}

/// Sortable timestamp text. Fixed microsecond precision keeps lexical order
/// equal to chronological order.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
