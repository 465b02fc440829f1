//! Integración del runtime: caminata completa de un flujo lineal con
//! suspensión en question, reanudación, acciones y cierre.

mod common;

use chat_core::runtime::{ChatRuntime, TickOutcome};
use chat_core::store::{ChatStore, InMemoryStore};
use chat_core::{InMemoryLocks, UserInput};
use chat_domain::types::{InputKind, InteractionType, SessionStatus};
use serde_json::json;

use common::build_linear_flow;

fn runtime_over(store: InMemoryStore) -> ChatRuntime<InMemoryStore, InMemoryLocks> {
    ChatRuntime::new(store, InMemoryLocks::new())
}

#[test]
fn linear_flow_suspends_at_question_and_completes_after_input() {
    let store = InMemoryStore::new();
    let flow_id = build_linear_flow(&store);
    let runtime = runtime_over(store);

    // start: avanza start → welcome → ask_name y suspende
    let outcome = runtime.start_session(flow_id, None, None).expect("start");
    let TickOutcome::AwaitingInput { session, messages, prompt, input_type } = outcome else {
        panic!("expected suspension at the question node");
    };
    assert_eq!(input_type, InputKind::Text);
    assert_eq!(session.current_node_id.as_deref(), Some("ask_name"));
    assert!(messages.iter().any(|m| m.content == json!("¡Hola!")));
    assert_eq!(prompt.unwrap()["question"], json!("¿Cómo te llamás?"));

    // interact: consume el input, corre la acción y llega al final
    let outcome = runtime.interact(&session.session_token, UserInput { value: "Ada".into(), input_type: InputKind::Text })
                         .expect("interact");
    let TickOutcome::Completed { session, messages } = outcome else {
        panic!("expected completion");
    };
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.ended_at.is_some());
    // la plantilla del mensaje final vio la variable escrita por la acción
    assert!(messages.iter().any(|m| m.content == json!("hola Ada, chau")));
    assert_eq!(session.state["user"]["name"], json!("Ada"));
    assert_eq!(session.state["temp"]["greeting"], json!("hola Ada"));
}

#[test]
fn revision_increases_monotonically_across_mutations() {
    let store = InMemoryStore::new();
    let flow_id = build_linear_flow(&store);
    let runtime = runtime_over(store);

    let outcome = runtime.start_session(flow_id, None, None).expect("start");
    let after_start = outcome.session().revision;
    assert!(after_start >= 1, "revision arranca en 1 y solo crece");

    let outcome = runtime.interact(&outcome.session().session_token,
                                   UserInput { value: "Ada".into(), input_type: InputKind::Text })
                         .expect("interact");
    assert!(outcome.session().revision > after_start);
}

#[test]
fn history_records_messages_inputs_and_session_lifecycle() {
    let store = InMemoryStore::new();
    let flow_id = build_linear_flow(&store);
    let runtime = runtime_over(store);

    let outcome = runtime.start_session(flow_id, None, None).expect("start");
    let token = outcome.session().session_token.clone();
    runtime.interact(&token, UserInput { value: "Ada".into(), input_type: InputKind::Text })
           .expect("interact");

    let session = runtime.store().session_by_token(&token).unwrap().unwrap();
    let history = runtime.store().history(session.id, None, None).unwrap();

    let kinds: Vec<InteractionType> = history.iter().map(|h| h.interaction_type).collect();
    assert!(kinds.contains(&InteractionType::Action), "session_started/ended");
    assert!(kinds.contains(&InteractionType::Message));
    assert!(kinds.contains(&InteractionType::Input));
    // el INPUT quedó asociado al nodo question
    let input_row = history.iter().find(|h| h.interaction_type == InteractionType::Input).unwrap();
    assert_eq!(input_row.node_id, "ask_name");
    assert_eq!(input_row.content["input"], json!("Ada"));
}

#[test]
fn terminal_sessions_reject_further_interactions() {
    let store = InMemoryStore::new();
    let flow_id = build_linear_flow(&store);
    let runtime = runtime_over(store);

    let outcome = runtime.start_session(flow_id, None, None).expect("start");
    let token = outcome.session().session_token.clone();
    runtime.end(&token, SessionStatus::Completed).expect("end");

    let err = runtime.interact(&token, UserInput { value: "x".into(), input_type: InputKind::Text })
                     .expect_err("terminal session must reject");
    assert!(matches!(err, chat_core::EngineError::Conflict(_)));
}

#[test]
fn ending_twice_is_idempotent() {
    let store = InMemoryStore::new();
    let flow_id = build_linear_flow(&store);
    let runtime = runtime_over(store);

    let outcome = runtime.start_session(flow_id, None, None).expect("start");
    let token = outcome.session().session_token.clone();
    let first = runtime.end(&token, SessionStatus::Completed).expect("end");
    let second = runtime.end(&token, SessionStatus::Abandoned).expect("end again");
    // el segundo end no cambia el estado terminal
    assert_eq!(second.status, first.status);
    assert_eq!(second.ended_at, first.ended_at);
}

#[test]
fn initial_context_lands_under_the_context_root() {
    let store = InMemoryStore::new();
    let flow_id = build_linear_flow(&store);
    let runtime = runtime_over(store);

    let outcome = runtime.start_session(flow_id, None, Some(json!({"school_id": 42})))
                         .expect("start");
    assert_eq!(outcome.session().state["context"]["school_id"], json!(42));
    assert!(outcome.session().state["user"].is_object());
    assert!(outcome.session().state["temp"].is_object());
}

#[test]
fn unpublished_flows_cannot_start_sessions() {
    let store = InMemoryStore::new();
    use chat_core::store::FlowAuthoring;
    let flow = store.create_flow(common::flow_spec("draft")).unwrap();
    let runtime = runtime_over(store);
    let err = runtime.start_session(flow.id, None, None).expect_err("draft flow");
    assert!(matches!(err, chat_core::EngineError::Validation(_)));
}
