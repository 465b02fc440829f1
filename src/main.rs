// Demo principal: arma un flujo con condición + agregación, lo publica y
// recorre una sesión completa con el backend en memoria. Con el feature
// `pg_demo`, corre la misma caminata contra Postgres (DATABASE_URL).

use chat_core::model::{ConnectionSpec, FlowSpec, NodeSpec, UserInput};
use chat_core::runtime::{ChatRuntime, TickOutcome};
use chat_core::store::{FlowAuthoring, InMemoryStore};
use chat_core::InMemoryLocks;
use chat_domain::types::{ConnectionType, InputKind, NodeType};
use serde_json::json;
use uuid::Uuid;

fn build_quiz_flow<S: FlowAuthoring>(store: &S) -> Uuid {
    let flow = store.create_flow(FlowSpec { name: "quiz".into(),
                                            description: Some("demo: quiz con agregación".into()),
                                            version: "1.0.0".into(),
                                            entry_node_id: "start".into(),
                                            flow_data: json!({}),
                                            info: json!({
                                                "initial_state": {
                                                    "temp": {"quiz": [{"score": 5}, {"score": 8}, {"score": 7}]}
                                                }
                                            }),
                                            contract: None,
                                            trace_enabled: true,
                                            trace_sample_rate: 100,
                                            retention_days: None,
                                            created_by: None })
                    .expect("create flow");

    let nodes = [("start", NodeType::Start, json!({})),
                 ("score",
                  NodeType::Action,
                  json!({"actions": [{
                      "type": "aggregate",
                      "source": "temp.quiz",
                      "field": "score",
                      "operation": "sum",
                      "target": "results.total",
                  }]})),
                 ("branch",
                  NodeType::Condition,
                  json!({"conditions": [
                      {"if": {"var": "results.total", "op": ">=", "value": 15}},
                      {"if": {"var": "results.total", "op": "<", "value": 15}},
                  ]})),
                 ("high",
                  NodeType::Message,
                  json!({"messages": [{"type": "text", "content": "¡{{results.total}} puntos! Excelente."}]})),
                 ("low",
                  NodeType::Message,
                  json!({"messages": [{"type": "text", "content": "{{results.total}} puntos, a seguir leyendo."}]})),
                 ("ask",
                  NodeType::Question,
                  json!({"question": "¿Querés otra ronda? (si/no)", "input_type": "text", "variable": "temp.again"}))];
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
    let edges = [("start", "score", ConnectionType::Default),
                 ("score", "branch", ConnectionType::Default),
                 ("branch", "high", ConnectionType::Option0),
                 ("branch", "low", ConnectionType::Option1),
                 ("high", "ask", ConnectionType::Default),
                 ("low", "ask", ConnectionType::Default)];
    for (source, target, ctype) in edges {
        store.add_connection(flow.id,
                             ConnectionSpec { source_node_id: source.into(),
                                              target_node_id: target.into(),
                                              connection_type: ctype,
                                              conditions: json!({}),
                                              info: json!({}) })
             .expect("add connection");
    }
    store.publish_flow(flow.id, None, None).expect("publish");
    flow.id
}

fn main() {
    println!("🚀 ChatFlow demo");

    let store = InMemoryStore::new();
    let flow_id = build_quiz_flow(&store);
    let runtime = ChatRuntime::new(store, InMemoryLocks::new());

    let outcome = runtime.start_session(flow_id, None, Some(json!({"school_id": 42}))).expect("start");
    for message in outcome.messages() {
        if let Some(text) = message.content.as_str() {
            println!("bot> {text}");
        }
    }
    let TickOutcome::AwaitingInput { session, .. } = &outcome else {
        println!("(el flujo terminó sin pedir input)");
        return;
    };
    println!("   estado: results.total = {}", session.state["results"]["total"]);

    let finished = runtime.interact(&session.session_token,
                                    UserInput { value: "no".into(), input_type: InputKind::Text })
                          .expect("interact");
    match finished {
        TickOutcome::Completed { session, .. } => {
            println!("✅ sesión completa (revision {})", session.revision);
            let steps = chat_core::store::ChatStore::session_steps(runtime.store(), session.id).expect("steps");
            println!("   pasos trazados: {}", steps.len());
        }
        other => println!("⚠️ resultado inesperado: {:?}", other.session().status),
    }

    #[cfg(feature = "pg_demo")]
    pg_demo::run();
}

#[cfg(feature = "pg_demo")]
mod pg_demo {
    //! La misma caminata contra Postgres: pool + advisory locks + outbox.

    use super::*;
    use chat_persistence::{build_dev_pool_from_env, OutboxDispatcher, PgChatStore, PgSessionLocks};

    pub fn run() {
        println!("-- pg_demo --");
        let pool = match build_dev_pool_from_env() {
            Ok(pool) => pool,
            Err(err) => {
                println!("sin Postgres disponible: {err}");
                return;
            }
        };
        let store = PgChatStore::new(pool.clone());
        let flow_id = build_quiz_flow(&store);
        let runtime = ChatRuntime::new(store, PgSessionLocks::new(pool.clone()));

        let outcome = runtime.start_session(flow_id, None, None).expect("start");
        if let TickOutcome::AwaitingInput { session, .. } = &outcome {
            runtime.interact(&session.session_token,
                             UserInput { value: "no".into(), input_type: InputKind::Text })
                   .expect("interact");
        }
        let dispatcher = OutboxDispatcher::new(pool);
        let (delivered, failed) = dispatcher.dispatch_pending().expect("dispatch");
        println!("outbox: {delivered} entregados, {failed} fallidos");
    }
}
