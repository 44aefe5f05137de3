use std::collections::HashSet;

use rusqlite::{params, Connection};
use serde_json::json;

use nodeflow_core::error::NodeflowError;
use nodeflow_core::graph::{Connection as Edge, Node, LOOP_BACK};
use nodeflow_store::GraphRepository;
use nodeflow_test_utils::{linear_graph, node, temp_db};

fn catalog() -> HashSet<String> {
    ["start", "end", "click", "condition", "repeat", "http-api-request"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn raw_insert(conn: &Connection, script_id: i64, node_id: &str, node_type: &str, created_at: &str) {
    conn.execute(
        "INSERT INTO nodes (script_id, node_id, node_type, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![script_id, node_id, node_type, created_at],
    )
    .unwrap();
}

#[test]
fn fan_out_violation_leaves_stored_graph_untouched() {
    let repo = GraphRepository::in_memory().unwrap();
    let id = repo.create_script("fan-out", None).unwrap().id;

    let good = linear_graph(&["a", "b"]);
    repo.save(id, &good.nodes, &good.connections).unwrap();
    let before = repo.load_nodes(id, &catalog()).unwrap();

    let mut bad_connections = good.connections.clone();
    bad_connections.push(Edge::new("a", "end"));
    let err = repo.save(id, &good.nodes, &bad_connections).unwrap_err();
    assert!(matches!(err, NodeflowError::FanOut { ref node_id, edges: 2, .. } if node_id == "a"));
    assert!(err.is_validation());

    let after = repo.load_nodes(id, &catalog()).unwrap();
    assert_eq!(before, after);
}

#[test]
fn saving_same_graph_twice_loads_identically() {
    let repo = GraphRepository::in_memory().unwrap();
    let id = repo.create_script("idempotent", None).unwrap().id;
    let g = linear_graph(&["a", "b", "c"]);

    repo.save(id, &g.nodes, &g.connections).unwrap();
    let first = repo.load_nodes(id, &catalog()).unwrap();
    repo.save(id, &g.nodes, &g.connections).unwrap();
    let second = repo.load_nodes(id, &catalog()).unwrap();

    assert_eq!(first, second);
}

#[test]
fn repeat_loop_back_does_not_count_as_fan_out() {
    let repo = GraphRepository::in_memory().unwrap();
    let id = repo.create_script("loop", None).unwrap().id;
    let nodes = vec![
        Node::new("start", "start"),
        node("r", "repeat", json!({"repeat_count": 3})),
        Node::new("body", "click"),
        Node::new("end", "end"),
    ];
    let connections = vec![
        Edge::new("start", "r"),
        Edge::tagged("r", "body", LOOP_BACK),
        Edge::new("r", "end"),
    ];
    repo.save(id, &nodes, &connections).unwrap();

    let loaded = repo.load_nodes(id, &catalog()).unwrap();
    let r = loaded.iter().find(|n| n.id == "r").unwrap();
    assert_eq!(r.connected_to.len(), 2);
    assert_eq!(r.connected_to[0].output_type.as_deref(), Some(LOOP_BACK));
}

#[test]
fn duplicate_start_nodes_are_collapsed_to_earliest() {
    let (_dir, path) = temp_db();
    let repo = GraphRepository::open(&path).unwrap();
    let id = repo.create_script("dupes", None).unwrap().id;

    let raw = Connection::open(&path).unwrap();
    raw_insert(&raw, id, "start-late", "start", "2030-01-01T00:00:00.000000Z");
    raw_insert(&raw, id, "start-early", "start", "2020-01-01T00:00:00.000000Z");
    raw_insert(&raw, id, "end", "end", "2025-01-01T00:00:00.000000Z");

    let loaded = repo.load_nodes(id, &catalog()).unwrap();
    let starts: Vec<&str> = loaded
        .iter()
        .filter(|n| n.node_type == "start")
        .map(|n| n.id.as_str())
        .collect();
    assert_eq!(starts, vec!["start-early"]);

    // The later duplicate is gone from storage, not just hidden.
    let remaining: i64 = raw
        .query_row(
            "SELECT COUNT(*) FROM nodes WHERE script_id = ?1 AND node_type = 'start'",
            params![id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(remaining, 1);
}

#[test]
fn malformed_json_columns_load_as_empty() {
    let (_dir, path) = temp_db();
    let repo = GraphRepository::open(&path).unwrap();
    let id = repo.create_script("broken", None).unwrap().id;

    let raw = Connection::open(&path).unwrap();
    raw.execute(
        "INSERT INTO nodes (script_id, node_id, node_type, parameters, data, connected_to,
                            connected_from, created_at, updated_at)
         VALUES (?1, 'n1', 'click', '{not json', '[1,2]', 'oops', NULL,
                 '2024-01-01T00:00:00.000000Z', '2024-01-01T00:00:00.000000Z')",
        params![id],
    )
    .unwrap();

    let loaded = repo.load_nodes(id, &catalog()).unwrap();
    assert_eq!(loaded.len(), 1);
    assert!(loaded[0].parameters.is_empty());
    assert!(loaded[0].data.is_empty());
    assert!(loaded[0].connected_to.is_empty());
    assert!(loaded[0].connected_from.is_empty());
}

#[test]
fn legacy_bare_id_adjacency_is_readable() {
    let (_dir, path) = temp_db();
    let repo = GraphRepository::open(&path).unwrap();
    let id = repo.create_script("legacy", None).unwrap().id;

    let raw = Connection::open(&path).unwrap();
    raw.execute(
        "INSERT INTO nodes (script_id, node_id, node_type, connected_to, created_at, updated_at)
         VALUES (?1, 'a', 'click', '[\"b\"]', '2024-01-01T00:00:00.000000Z', '2024-01-01T00:00:00.000000Z')",
        params![id],
    )
    .unwrap();
    raw.execute(
        "INSERT INTO nodes (script_id, node_id, node_type, connected_from, created_at, updated_at)
         VALUES (?1, 'b', 'click', '[\"a\"]', '2024-01-02T00:00:00.000000Z', '2024-01-02T00:00:00.000000Z')",
        params![id],
    )
    .unwrap();

    let graph = repo.load_graph(id, &catalog()).unwrap();
    assert_eq!(graph.connections, vec![Edge::new("a", "b")]);
}

#[test]
fn deleting_script_cascades_to_nodes() {
    let (_dir, path) = temp_db();
    let repo = GraphRepository::open(&path).unwrap();
    let id = repo.create_script("gone", None).unwrap().id;
    let g = linear_graph(&["a"]);
    repo.save(id, &g.nodes, &g.connections).unwrap();

    repo.delete_script(id).unwrap();

    let raw = Connection::open(&path).unwrap();
    let count: i64 = raw
        .query_row("SELECT COUNT(*) FROM nodes WHERE script_id = ?1", params![id], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn data_fields_to_strip_are_configurable() {
    let repo = GraphRepository::in_memory()
        .unwrap()
        .with_strip_data_fields(vec!["debug".to_string()]);
    let id = repo.create_script("strip", None).unwrap().id;

    let mut n = Node::new("a", "click");
    n.data.insert("debug".into(), json!(true));
    n.data.insert("color".into(), json!("red"));
    repo.save(id, &[n], &[]).unwrap();

    let loaded = repo.load_nodes(id, &catalog()).unwrap();
    assert!(loaded[0].data.get("debug").is_none());
    assert_eq!(loaded[0].data["color"], json!("red"));
}
