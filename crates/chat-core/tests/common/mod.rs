//! Helpers compartidos por los tests de integración del motor.
#![allow(dead_code)]

use chat_core::model::{ConnectionSpec, FlowSpec, NodeSpec};
use chat_core::store::{FlowAuthoring, InMemoryStore};
use chat_domain::types::{ConnectionType, NodeType};
use serde_json::{json, Value};
use uuid::Uuid;

pub fn flow_spec(name: &str) -> FlowSpec {
    FlowSpec { name: name.to_string(),
               description: Some("test flow".into()),
               version: "1.0.0".into(),
               entry_node_id: "start".into(),
               flow_data: json!({}),
               info: json!({}),
               contract: None,
               trace_enabled: false,
               trace_sample_rate: 0,
               retention_days: None,
               created_by: None }
}

pub fn add_node(store: &InMemoryStore, flow_id: Uuid, node_id: &str, node_type: NodeType, content: Value) {
    store.add_node(flow_id,
                   NodeSpec { node_id: node_id.into(),
                              node_type,
                              template: None,
                              content,
                              position: None,
                              info: json!({}) })
         .expect("add node");
}

pub fn connect(store: &InMemoryStore, flow_id: Uuid, source: &str, target: &str, ctype: ConnectionType) {
    store.add_connection(flow_id,
                         ConnectionSpec { source_node_id: source.into(),
                                          target_node_id: target.into(),
                                          connection_type: ctype,
                                          conditions: json!({}),
                                          info: json!({}) })
         .expect("add connection");
}

/// Flujo lineal publicado: start → message(bienvenida) → question(nombre) →
/// action(guarda saludo) → message(despedida).
pub fn build_linear_flow(store: &InMemoryStore) -> Uuid {
    let flow = store.create_flow(flow_spec("linear")).expect("create flow");
    add_node(store, flow.id, "start", NodeType::Start, json!({}));
    add_node(store,
             flow.id,
             "welcome",
             NodeType::Message,
             json!({"messages": [{"type": "text", "content": "¡Hola!"}]}));
    add_node(store,
             flow.id,
             "ask_name",
             NodeType::Question,
             json!({"question": "¿Cómo te llamás?", "input_type": "text", "variable": "user.name"}));
    add_node(store,
             flow.id,
             "save",
             NodeType::Action,
             json!({"actions": [{"type": "set_variable", "variable": "temp.greeting", "value": "hola {{user.name}}"}]}));
    add_node(store,
             flow.id,
             "bye",
             NodeType::Message,
             json!({"messages": [{"type": "text", "content": "{{temp.greeting}}, chau"}]}));
    connect(store, flow.id, "start", "welcome", ConnectionType::Default);
    connect(store, flow.id, "welcome", "ask_name", ConnectionType::Default);
    connect(store, flow.id, "ask_name", "save", ConnectionType::Default);
    connect(store, flow.id, "save", "bye", ConnectionType::Default);
    store.publish_flow(flow.id, None, None).expect("publish");
    flow.id
}
