//! Despacho de eventos: outbox transaccional, supresión de updates de solo
//! actividad y orden causal por sesión (riel durable).

mod common;

use chat_core::runtime::ChatRuntime;
use chat_core::store::{ChatStore, FlowAuthoring, InMemoryStore};
use chat_core::{InMemoryLocks, UserInput};
use chat_domain::types::{InputKind, NodeType, SessionStatus};
use serde_json::json;

use common::{add_node, build_linear_flow, flow_spec};

#[test]
fn flow_lifecycle_feeds_the_outbox() {
    let store = InMemoryStore::new();
    let flow = store.create_flow(flow_spec("events")).unwrap();
    add_node(&store, flow.id, "start", NodeType::Start, json!({}));
    store.publish_flow(flow.id, None, None).unwrap();

    let types: Vec<String> = store.outbox_rows().into_iter().map(|r| r.event_type).collect();
    assert!(types.contains(&"flow_created".to_string()));
    assert!(types.contains(&"flow_updated".to_string()), "add_node emits flow_updated");
    assert!(types.contains(&"flow_published".to_string()));
}

#[test]
fn session_lifecycle_events_in_causal_order() {
    let store = InMemoryStore::new();
    let flow_id = build_linear_flow(&store);
    let runtime = ChatRuntime::new(store, InMemoryLocks::new());

    let outcome = runtime.start_session(flow_id, None, None).unwrap();
    let token = outcome.session().session_token.clone();
    runtime.interact(&token, UserInput { value: "Ada".into(), input_type: InputKind::Text }).unwrap();

    let session_id = outcome.session().id.to_string();
    let rows: Vec<_> = runtime.store()
                              .outbox_rows()
                              .into_iter()
                              .filter(|r| r.payload["session_id"] == json!(session_id))
                              .collect();

    // el orden del outbox respeta el orden causal (revision creciente)
    let revisions: Vec<i64> = rows.iter()
                                  .filter_map(|r| r.payload["revision"].as_i64())
                                  .collect();
    let mut sorted = revisions.clone();
    sorted.sort();
    assert_eq!(revisions, sorted, "outbox rows must preserve causal order");

    assert_eq!(rows.first().unwrap().event_type, "session_started");
    assert_eq!(rows.last().unwrap().event_type, "session_status_changed");
    let last = &rows.last().unwrap().payload;
    assert_eq!(last["status"], json!("COMPLETED"));
    assert_eq!(last["previous_status"], json!("ACTIVE"));
}

#[test]
fn touch_only_updates_emit_no_events() {
    // Tocar solo last_activity_at no produce filas.
    let store = InMemoryStore::new();
    let flow_id = build_linear_flow(&store);
    let runtime = ChatRuntime::new(store, InMemoryLocks::new());

    let outcome = runtime.start_session(flow_id, None, None).unwrap();
    let before = runtime.store().outbox_rows().len();

    runtime.store().touch_session(outcome.session().id).unwrap();

    assert_eq!(runtime.store().outbox_rows().len(), before);
}

#[test]
fn deleting_a_session_emits_session_deleted() {
    let store = InMemoryStore::new();
    let flow_id = build_linear_flow(&store);
    let runtime = ChatRuntime::new(store, InMemoryLocks::new());

    let outcome = runtime.start_session(flow_id, None, None).unwrap();
    runtime.store().delete_session(outcome.session().id).unwrap();

    let types: Vec<String> = runtime.store().outbox_rows().into_iter().map(|r| r.event_type).collect();
    assert!(types.contains(&"session_deleted".to_string()));
}

#[test]
fn drain_marks_rows_delivered_in_id_order() {
    let store = InMemoryStore::new();
    let flow_id = build_linear_flow(&store);
    let runtime = ChatRuntime::new(store, InMemoryLocks::new());
    let outcome = runtime.start_session(flow_id, None, None).unwrap();
    runtime.end(&outcome.session().session_token, SessionStatus::Completed).unwrap();

    let drained = runtime.store().drain_pending(100);
    assert!(!drained.is_empty());
    let ids: Vec<i64> = drained.iter().map(|r| r.id).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted, "oldest first");
    for row in &drained {
        assert!(row.delivered_at.is_some());
        assert_eq!(row.attempts, 1);
    }
    assert!(runtime.store().drain_pending(100).is_empty(), "nothing pending after drain");
}

#[test]
fn event_payloads_carry_the_contract_keys() {
    let store = InMemoryStore::new();
    let flow_id = build_linear_flow(&store);
    let runtime = ChatRuntime::new(store, InMemoryLocks::new());
    let outcome = runtime.start_session(flow_id, None, None).unwrap();

    let rows = runtime.store().outbox_rows();
    let started = rows.iter().find(|r| r.event_type == "session_started").unwrap();
    for key in ["event_type", "session_id", "flow_id", "revision", "timestamp"] {
        assert!(started.payload.get(key).is_some(), "missing key {key}");
    }
    assert!(started.payload["timestamp"].is_i64());
    assert_eq!(started.destination, "flow_events");
}
