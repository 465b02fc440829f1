//! Procesadores de nodo: uno por clase, despachados por `process_node`.
//!
//! Contrato: `process(env, resolver, node, session, input) → StepResult`.
//! Los procesadores son puros respecto al store (no persisten nada); el
//! runtime aplica variables, historial, traza y transición. Los bordes con
//! efectos (HTTP, scripts, handlers internos) entran por `ProcessEnv`.

pub mod action;
pub mod composite;
pub mod condition;
pub mod message;
pub mod question;
pub mod script;
pub mod webhook;

use serde_json::json;

use crate::effects::{HttpExecutor, InternalApiHandler, ScriptExecutor};
use crate::errors::EngineError;
use crate::model::{Node, Session, StepResult, UserInput};
use chat_domain::types::{NodeType, TraceLevel};

/// Servicios con efectos disponibles durante el procesamiento de un nodo.
pub struct ProcessEnv<'a> {
    pub http: &'a dyn HttpExecutor,
    pub scripts: &'a dyn ScriptExecutor,
    pub internal: &'a dyn InternalApiHandler,
    pub trace_level: TraceLevel,
}

/// Resolución de nodos hermanos (la necesita composite para sus hijos).
pub trait NodeResolver {
    fn resolve(&self, node_id: &str) -> Result<Node, EngineError>;
}

/// Despacha al procesador de la clase del nodo.
pub fn process_node(env: &ProcessEnv<'_>,
                    resolver: &dyn NodeResolver,
                    node: &Node,
                    session: &Session,
                    input: Option<&UserInput>)
                    -> StepResult {
    match node.node_type {
        NodeType::Start => start(node),
        NodeType::Message => message::process(node, session),
        NodeType::Question => question::process(node, session, input),
        NodeType::Condition => condition::process(node, session),
        NodeType::Action => action::process(env, node, session),
        NodeType::Webhook => webhook::process(env, node, session),
        NodeType::Script => script::process(env, node, session),
        NodeType::Composite => composite::process(env, resolver, node, session),
    }
}

/// start: productor no-op; transiciona incondicionalmente por default.
fn start(node: &Node) -> StepResult {
    StepResult { details: json!({"type": "start", "node_id": node.node_id}),
                 ..StepResult::default() }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Builders compartidos por los tests de procesadores.

    use super::*;
    use chat_domain::types::{SessionStatus, TraceLevel};
    use serde_json::Value;
    use uuid::Uuid;

    pub fn session_with_state(state: Value) -> Session {
        Session { id: Uuid::new_v4(),
                  flow_id: Uuid::new_v4(),
                  user_id: None,
                  session_token: "test-token".into(),
                  current_node_id: None,
                  state,
                  info: json!({}),
                  status: SessionStatus::Active,
                  revision: 1,
                  trace_enabled: false,
                  trace_level: TraceLevel::Standard,
                  state_hash: None,
                  started_at: chrono::Utc::now(),
                  last_activity_at: chrono::Utc::now(),
                  ended_at: None }
    }

    pub fn make_node(node_id: &str, node_type: NodeType, content: Value) -> Node {
        Node { id: Uuid::new_v4(),
               flow_id: Uuid::new_v4(),
               node_id: node_id.into(),
               node_type,
               template: None,
               content,
               position: json!({"x": 0, "y": 0}),
               info: json!({}),
               created_at: chrono::Utc::now(),
               updated_at: chrono::Utc::now() }
    }

    pub fn env<'a>(http: &'a dyn HttpExecutor,
                   scripts: &'a dyn ScriptExecutor,
                   internal: &'a dyn InternalApiHandler)
                   -> ProcessEnv<'a> {
        ProcessEnv { http, scripts, internal, trace_level: TraceLevel::Standard }
    }
}
