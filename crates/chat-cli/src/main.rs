//! chat-cli: demo mínima del motor de flujos conversacionales.
//!
//! Arma un flujo lineal en memoria, lo publica y camina una sesión
//! completa por stdin. Para uso avanzado (Postgres, tracing), ver el
//! binario principal en la raíz.

use std::io::{self, BufRead, Write};

use chat_core::runtime::{ChatRuntime, TickOutcome};
use chat_core::store::{FlowAuthoring, InMemoryStore};
use chat_core::{InMemoryLocks, UserInput};
use chat_core::model::{ConnectionSpec, FlowSpec, NodeSpec};
use chat_domain::types::{ConnectionType, InputKind, NodeType};
use serde_json::json;

fn main() {
    println!("🤖 ChatFlow CLI");
    println!("===============");

    let store = InMemoryStore::new();
    let flow = store.create_flow(FlowSpec { name: "demo".into(),
                                            description: Some("flujo demo".into()),
                                            version: "1.0.0".into(),
                                            entry_node_id: "start".into(),
                                            flow_data: json!({}),
                                            info: json!({}),
                                            contract: None,
                                            trace_enabled: false,
                                            trace_sample_rate: 0,
                                            retention_days: None,
                                            created_by: None })
                    .expect("create flow");

    let nodes = [("start", NodeType::Start, json!({})),
                 ("hello",
                  NodeType::Message,
                  json!({"messages": [{"type": "text", "content": "¡Hola! Soy el demo de ChatFlow."}]})),
                 ("ask",
                  NodeType::Question,
                  json!({"question": "¿Cómo te llamás?", "input_type": "text", "variable": "user.name"})),
                 ("bye",
                  NodeType::Message,
                  json!({"messages": [{"type": "text", "content": "Un gusto, {{user.name}} 👋"}]}))];
    for (node_id, node_type, content) in nodes {
        store.add_node(flow.id,
                       NodeSpec { node_id: node_id.into(),
                                  node_type,
                                  template: None,
                                  content,
                                  position: None,
                                  info: json!({}) })
             .expect("add node");
    }
    for (source, target) in [("start", "hello"), ("hello", "ask"), ("ask", "bye")] {
        store.add_connection(flow.id,
                             ConnectionSpec { source_node_id: source.into(),
                                              target_node_id: target.into(),
                                              connection_type: ConnectionType::Default,
                                              conditions: json!({}),
                                              info: json!({}) })
             .expect("add connection");
    }
    store.publish_flow(flow.id, None, None).expect("publish");

    let runtime = ChatRuntime::new(store, InMemoryLocks::new());
    let mut outcome = runtime.start_session(flow.id, None, None).expect("start session");

    let stdin = io::stdin();
    loop {
        for message in outcome.messages() {
            if let Some(text) = message.content.as_str() {
                println!("bot> {text}");
            }
        }
        match &outcome {
            TickOutcome::AwaitingInput { session, .. } => {
                let token = session.session_token.clone();
                print!("you> ");
                io::stdout().flush().ok();
                let mut line = String::new();
                if stdin.lock().read_line(&mut line).is_err() || line.trim().is_empty() {
                    println!("(sin input, cerrando)");
                    break;
                }
                outcome = runtime.interact(&token,
                                           UserInput { value: line.trim().to_string(),
                                                       input_type: InputKind::Text })
                                 .expect("interact");
            }
            TickOutcome::Completed { .. } => {
                println!("✅ conversación completa");
                break;
            }
            TickOutcome::Abandoned { error, .. } => {
                println!("❌ sesión abandonada: {error}");
                break;
            }
        }
    }
}
