//! Sincronización snapshot ⇄ tablas canónicas del grafo.
//!
//! Dos direcciones, ambas puras para que los backends (memoria y Postgres)
//! compartan exactamente las mismas reglas:
//! - `project_snapshot`: filas relacionales → `flow_data` (proyección
//!   idempotente, preservando claves no-grafo del snapshot previo).
//! - `extract_nodes`/`extract_connections`: `flow_data` de un editor externo
//!   → specs listos para materializar como filas.
//!
//! Normalización de la proyección: `type` en minúsculas, `connection_type`
//! como token externo, `position` ausente → `{x:0,y:0}`, `conditions`/`info`
//! ausentes → `{}`.

use serde_json::{json, Map, Value};

use crate::model::{Connection, ConnectionSpec, Node, NodeSpec};
use chat_domain::types::{ConnectionType, NodeType};

fn normalize_position(position: &Value) -> Value {
    match position.as_object() {
        Some(map) => json!({
            "x": map.get("x").cloned().unwrap_or(json!(0)),
            "y": map.get("y").cloned().unwrap_or(json!(0)),
        }),
        None => json!({"x": 0, "y": 0}),
    }
}

fn object_or_empty(value: Option<&Value>) -> Value {
    match value {
        Some(v) if v.is_object() => v.clone(),
        _ => Value::Object(Map::new()),
    }
}

/// Proyecta las filas canónicas al snapshot `flow_data`.
///
/// Si no hay filas relacionales, el snapshot previo se preserva tal cual
/// (workflow de borradores creados solo-snapshot). Claves no-grafo del
/// snapshot previo se conservan siempre.
pub fn project_snapshot(existing: &Value, nodes: &[Node], connections: &[Connection]) -> Value {
    if nodes.is_empty() && connections.is_empty() {
        return existing.clone();
    }

    let mut out = match existing.as_object() {
        Some(map) => map.clone(),
        None => Map::new(),
    };
    out.remove("nodes");
    out.remove("connections");

    let projected_nodes: Vec<Value> = nodes.iter()
                                           .map(|n| {
                                               json!({
                                                   "id": n.node_id,
                                                   "type": n.node_type.as_str(),
                                                   "template": n.template,
                                                   "content": object_or_empty(Some(&n.content)),
                                                   "position": normalize_position(&n.position),
                                                   "info": object_or_empty(Some(&n.info)),
                                               })
                                           })
                                           .collect();

    let projected_connections: Vec<Value> = connections.iter()
                                                       .map(|c| {
                                                           json!({
                                                               "source": c.source_node_id,
                                                               "target": c.target_node_id,
                                                               "type": c.connection_type.to_token(),
                                                               "conditions": object_or_empty(Some(&c.conditions)),
                                                               "info": object_or_empty(Some(&c.info)),
                                                           })
                                                       })
                                                       .collect();

    out.insert("nodes".into(), Value::Array(projected_nodes));
    out.insert("connections".into(), Value::Array(projected_connections));
    Value::Object(out)
}

fn node_id_of(node: &Map<String, Value>) -> Option<String> {
    for key in ["id", "node_id", "node_key"] {
        if let Some(v) = node.get(key) {
            if let Some(s) = v.as_str() {
                if !s.is_empty() {
                    return Some(s.to_string());
                }
            }
        }
    }
    node.get("data")
        .and_then(Value::as_object)
        .and_then(|d| d.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn node_type_of(node: &Map<String, Value>) -> NodeType {
    let mut raw = node.get("node_type").or_else(|| node.get("type")).and_then(Value::as_str);
    // Editores visuales marcan "custom" y esconden el tipo real en data
    if raw.is_none() || raw == Some("custom") {
        raw = node.get("data")
                  .and_then(Value::as_object)
                  .and_then(|d| d.get("nodeType").or_else(|| d.get("node_type")))
                  .and_then(Value::as_str);
    }
    raw.and_then(NodeType::parse).unwrap_or(NodeType::Message)
}

/// Extrae specs de nodo desde un `flow_data` de autor/editor.
/// Nodos sin id utilizable se descartan.
pub fn extract_nodes(flow_data: &Value) -> Vec<NodeSpec> {
    let nodes = flow_data.get("nodes").and_then(Value::as_array);
    let mut specs = Vec::new();
    for raw in nodes.into_iter().flatten() {
        let Some(node) = raw.as_object() else { continue };
        let Some(node_id) = node_id_of(node) else { continue };
        let data = node.get("data").and_then(Value::as_object);
        let content = node.get("content")
                          .or_else(|| data.and_then(|d| d.get("content")))
                          .cloned()
                          .unwrap_or_else(|| Value::Object(Map::new()));
        let template = node.get("template")
                           .or_else(|| data.and_then(|d| d.get("template")))
                           .and_then(Value::as_str)
                           .map(str::to_string);
        let info = node.get("info")
                       .or_else(|| data.and_then(|d| d.get("info")))
                       .cloned()
                       .unwrap_or_else(|| Value::Object(Map::new()));
        let position = node.get("position")
                           .or_else(|| node.get("position_absolute"))
                           .or_else(|| data.and_then(|d| d.get("position")))
                           .map(|p| normalize_position(p));
        specs.push(NodeSpec { node_id,
                              node_type: node_type_of(node),
                              template,
                              content,
                              position,
                              info });
    }
    specs
}

/// Extrae specs de conexión desde un `flow_data` (acepta `connections` o el
/// alias `edges`). Conexiones sin source/target se descartan.
pub fn extract_connections(flow_data: &Value) -> Vec<ConnectionSpec> {
    let connections = flow_data.get("connections")
                               .and_then(Value::as_array)
                               .or_else(|| flow_data.get("edges").and_then(Value::as_array));
    let mut specs = Vec::new();
    for raw in connections.into_iter().flatten() {
        let Some(conn) = raw.as_object() else { continue };
        let data = conn.get("data").and_then(Value::as_object);
        let source = conn.get("source")
                         .or_else(|| conn.get("source_node_id"))
                         .and_then(Value::as_str)
                         .unwrap_or_default();
        let target = conn.get("target")
                         .or_else(|| conn.get("target_node_id"))
                         .and_then(Value::as_str)
                         .unwrap_or_default();
        if source.is_empty() || target.is_empty() {
            continue;
        }
        let raw_type = conn.get("connection_type")
                           .or_else(|| data.and_then(|d| d.get("connection_type")))
                           .or_else(|| conn.get("type"))
                           .or_else(|| data.and_then(|d| d.get("type")))
                           .and_then(Value::as_str)
                           .unwrap_or("DEFAULT");
        let conditions = conn.get("conditions")
                             .or_else(|| data.and_then(|d| d.get("conditions")))
                             .cloned()
                             .unwrap_or_else(|| Value::Object(Map::new()));
        let info = conn.get("info")
                       .or_else(|| data.and_then(|d| d.get("info")))
                       .cloned()
                       .unwrap_or_else(|| Value::Object(Map::new()));
        specs.push(ConnectionSpec { source_node_id: source.to_string(),
                                    target_node_id: target.to_string(),
                                    connection_type: ConnectionType::from_token(raw_type),
                                    conditions,
                                    info });
    }
    specs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn node(node_id: &str, node_type: NodeType) -> Node {
        Node { id: Uuid::new_v4(),
               flow_id: Uuid::new_v4(),
               node_id: node_id.into(),
               node_type,
               template: None,
               content: json!({}),
               position: Value::Null,
               info: Value::Null,
               created_at: Utc::now(),
               updated_at: Utc::now() }
    }

    #[test]
    fn empty_relational_rows_preserve_snapshot() {
        let existing = json!({"nodes": [{"id": "a"}], "theme": "dark"});
        assert_eq!(project_snapshot(&existing, &[], &[]), existing);
    }

    #[test]
    fn projection_normalizes_and_preserves_non_graph_keys() {
        let existing = json!({"theme": "dark", "nodes": []});
        let projected = project_snapshot(&existing, &[node("start", NodeType::Start)], &[]);
        assert_eq!(projected["theme"], json!("dark"));
        assert_eq!(projected["nodes"][0]["type"], json!("start"));
        assert_eq!(projected["nodes"][0]["position"], json!({"x": 0, "y": 0}));
        assert_eq!(projected["nodes"][0]["info"], json!({}));
    }

    #[test]
    fn extract_reads_editor_shapes() {
        let flow_data = json!({
            "nodes": [
                {"id": "start", "type": "custom", "data": {"nodeType": "MESSAGE", "content": {"messages": []}}},
                {"node_id": "q1", "type": "question", "content": {"variable": "user.name"}},
                {"type": "message"},
            ],
            "edges": [
                {"source": "start", "target": "q1", "type": "CONDITIONAL"},
                {"source": "", "target": "q1"},
            ],
        });
        let nodes = extract_nodes(&flow_data);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].node_type, NodeType::Message);
        let conns = extract_connections(&flow_data);
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].connection_type, ConnectionType::Default);
    }
}
