//! Validación de grafos antes de publicar.
//!
//! Errores bloquean la publicación; las advertencias (nodos colgantes) solo
//! se reportan. Los backends comparten este chequeo para que memoria y
//! Postgres rechacen exactamente lo mismo.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::model::FlowGraph;
use chat_domain::types::{NodeType, ScriptLanguage};

/// Reporte de validación de un grafo.
#[derive(Debug, Clone, Default)]
pub struct GraphReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl GraphReport {
    pub fn is_publishable(&self) -> bool {
        self.errors.is_empty()
    }
}

fn validate_script_content(node_id: &str, content: &Value, report: &mut GraphReport) {
    match content.get("code").and_then(Value::as_str) {
        Some(code) if !code.trim().is_empty() => {}
        _ => report.errors.push(format!("script node '{node_id}' has no code")),
    }
    let language = content.get("language").and_then(Value::as_str).unwrap_or("javascript");
    if ScriptLanguage::parse(language).is_none() {
        report.errors.push(format!("script node '{node_id}' has unsupported language '{language}'"));
    }
    if let Some(timeout) = content.get("timeout") {
        if timeout.as_i64().map(|t| t <= 0).unwrap_or(true) {
            report.errors.push(format!("script node '{node_id}' has non-positive timeout"));
        }
    }
}

/// Valida el grafo completo de un flujo.
pub fn validate_graph(graph: &FlowGraph) -> GraphReport {
    let mut report = GraphReport::default();
    let node_ids: HashSet<&str> = graph.nodes.iter().map(|n| n.node_id.as_str()).collect();

    if !node_ids.contains(graph.flow.entry_node_id.as_str()) {
        report.errors.push(format!("entry node '{}' does not exist", graph.flow.entry_node_id));
    }

    for conn in &graph.connections {
        if !node_ids.contains(conn.source_node_id.as_str()) {
            report.errors.push(format!("connection source '{}' does not exist", conn.source_node_id));
        }
        if !node_ids.contains(conn.target_node_id.as_str()) {
            report.errors.push(format!("connection target '{}' does not exist", conn.target_node_id));
        }
    }

    // Conexiones duplicadas del mismo tipo desde un nodo: en runtime la más
    // antigua ganaría determinísticamente, pero el autor casi seguro quiso
    // una sola; se rechaza al publicar.
    let mut seen: HashMap<(&str, &str), usize> = HashMap::new();
    for conn in &graph.connections {
        *seen.entry((conn.source_node_id.as_str(), conn.connection_type.as_str())).or_default() += 1;
    }
    for ((source, ctype), count) in seen {
        if count > 1 {
            report.errors.push(format!("node '{source}' has {count} '{ctype}' connections; expected at most one"));
        }
    }

    // Nodos colgantes: permitidos en borrador, reportados siempre
    let mut referenced: HashSet<&str> = HashSet::new();
    referenced.insert(graph.flow.entry_node_id.as_str());
    for conn in &graph.connections {
        referenced.insert(conn.source_node_id.as_str());
        referenced.insert(conn.target_node_id.as_str());
    }
    for node in &graph.nodes {
        if !referenced.contains(node.node_id.as_str()) {
            report.warnings.push(format!("node '{}' is not referenced by any connection", node.node_id));
        }
        if node.node_type == NodeType::Script {
            validate_script_content(&node.node_id, &node.content, &mut report);
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Connection, Flow, Node};
    use chat_domain::types::ConnectionType;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn flow(entry: &str) -> Flow {
        Flow { id: Uuid::new_v4(),
               name: "f".into(),
               description: None,
               version: "1.0.0".into(),
               entry_node_id: entry.into(),
               flow_data: json!({}),
               info: json!({}),
               contract: None,
               is_published: false,
               is_active: true,
               trace_enabled: false,
               trace_sample_rate: 0,
               retention_days: 30,
               created_by: None,
               published_by: None,
               created_at: Utc::now(),
               updated_at: Utc::now(),
               published_at: None }
    }

    fn node(flow_id: Uuid, node_id: &str, node_type: NodeType, content: Value) -> Node {
        Node { id: Uuid::new_v4(),
               flow_id,
               node_id: node_id.into(),
               node_type,
               template: None,
               content,
               position: json!({"x": 0, "y": 0}),
               info: json!({}),
               created_at: Utc::now(),
               updated_at: Utc::now() }
    }

    fn conn(flow_id: Uuid, source: &str, target: &str, ctype: ConnectionType) -> Connection {
        Connection { id: Uuid::new_v4(),
                     flow_id,
                     source_node_id: source.into(),
                     target_node_id: target.into(),
                     connection_type: ctype,
                     conditions: json!({}),
                     info: json!({}),
                     created_at: Utc::now() }
    }

    #[test]
    fn missing_entry_node_is_an_error() {
        let f = flow("nope");
        let id = f.id;
        let graph = FlowGraph { flow: f, nodes: vec![node(id, "a", NodeType::Message, json!({}))], connections: vec![] };
        let report = validate_graph(&graph);
        assert!(!report.is_publishable());
    }

    #[test]
    fn duplicate_same_type_connections_are_rejected() {
        let f = flow("a");
        let id = f.id;
        let graph = FlowGraph { flow: f,
                                nodes: vec![node(id, "a", NodeType::Message, json!({})),
                                            node(id, "b", NodeType::Message, json!({})),
                                            node(id, "c", NodeType::Message, json!({}))],
                                connections: vec![conn(id, "a", "b", ConnectionType::Default),
                                                  conn(id, "a", "c", ConnectionType::Default)] };
        let report = validate_graph(&graph);
        assert!(report.errors.iter().any(|e| e.contains("expected at most one")));
    }

    #[test]
    fn dangling_nodes_warn_but_do_not_block() {
        let f = flow("a");
        let id = f.id;
        let graph = FlowGraph { flow: f,
                                nodes: vec![node(id, "a", NodeType::Message, json!({})),
                                            node(id, "orphan", NodeType::Message, json!({}))],
                                connections: vec![] };
        let report = validate_graph(&graph);
        assert!(report.is_publishable());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn script_nodes_need_code_and_valid_language() {
        let f = flow("s");
        let id = f.id;
        let graph = FlowGraph { flow: f,
                                nodes: vec![node(id, "s", NodeType::Script, json!({"code": "", "language": "perl"}))],
                                connections: vec![] };
        let report = validate_graph(&graph);
        assert_eq!(report.errors.len(), 2);
    }
}
