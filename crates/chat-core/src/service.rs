//! Fachada de conversación: la superficie que consume el adaptador externo
//! (start / interact / estado / historial / end), por encima del runtime.
//!
//! Devuelve estructuras serializables listas para la capa de transporte; la
//! autenticación y el framing HTTP quedan fuera de este núcleo.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::concurrency::ConcurrencyController;
use crate::errors::EngineError;
use crate::model::UserInput;
use crate::runtime::{ChatRuntime, TickOutcome};
use crate::store::ChatStore;
use chat_domain::types::{InputKind, SessionStatus};

/// Respuesta de `start` e `interact`: lo que el adaptador reenvía al canal.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub session_id: Uuid,
    pub session_token: String,
    pub status: SessionStatus,
    pub messages: Vec<Value>,
    pub expects_input: bool,
    pub input_type: Option<InputKind>,
    pub prompt: Option<Value>,
    pub current_node: Option<String>,
}

fn response_from(outcome: &TickOutcome) -> ChatResponse {
    let session = outcome.session();
    let messages = outcome.messages()
                          .iter()
                          .map(|m| {
                              json!({
                                  "type": m.kind,
                                  "content": m.content,
                                  "delay": m.delay,
                              })
                          })
                          .collect();
    let (expects_input, input_type, prompt) = match outcome {
        TickOutcome::AwaitingInput { input_type, prompt, .. } => (true, Some(*input_type), prompt.clone()),
        _ => (false, None, None),
    };
    ChatResponse { session_id: session.id,
                   session_token: session.session_token.clone(),
                   status: session.status,
                   messages,
                   expects_input,
                   input_type,
                   prompt,
                   current_node: session.current_node_id.clone() }
}

/// Servicio de dominio para conversaciones.
pub struct ChatService<S, C> {
    runtime: ChatRuntime<S, C>,
}

impl<S, C> ChatService<S, C>
    where S: ChatStore,
          C: ConcurrencyController
{
    pub fn new(runtime: ChatRuntime<S, C>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &ChatRuntime<S, C> {
        &self.runtime
    }

    /// Arranca una conversación sobre un flujo publicado.
    pub fn start_conversation(&self,
                              flow_id: Uuid,
                              user_id: Option<Uuid>,
                              initial_context: Option<Value>)
                              -> Result<ChatResponse, EngineError> {
        let outcome = self.runtime.start_session(flow_id, user_id, initial_context)?;
        Ok(response_from(&outcome))
    }

    /// Avanza una sesión suspendida con el input del usuario.
    pub fn process_user_interaction(&self,
                                    session_token: &str,
                                    input: &str,
                                    input_type: InputKind)
                                    -> Result<ChatResponse, EngineError> {
        let outcome = self.runtime.interact(session_token,
                                            UserInput { value: input.to_string(), input_type })?;
        Ok(response_from(&outcome))
    }

    /// Estado actual de la conversación (lectura, sin lock).
    pub fn conversation_state(&self, session_token: &str) -> Result<Value, EngineError> {
        let session = self.runtime
                          .store()
                          .session_by_token(session_token)?
                          .ok_or_else(|| EngineError::NotFound("session not found".into()))?;
        Ok(json!({
            "session_id": session.id.to_string(),
            "session_token": session.session_token,
            "flow_id": session.flow_id.to_string(),
            "current_node": session.current_node_id,
            "status": session.status.as_str(),
            "state": session.state,
            "revision": session.revision,
            "started_at": session.started_at.to_rfc3339(),
            "last_activity": session.last_activity_at.to_rfc3339(),
        }))
    }

    /// Historial de la conversación en orden cronológico.
    pub fn conversation_history(&self,
                                session_token: &str,
                                limit: Option<usize>,
                                offset: Option<usize>)
                                -> Result<Vec<Value>, EngineError> {
        let session = self.runtime
                          .store()
                          .session_by_token(session_token)?
                          .ok_or_else(|| EngineError::NotFound("session not found".into()))?;
        let rows = self.runtime.store().history(session.id, limit, offset)?;
        Ok(rows.into_iter()
               .map(|i| {
                   json!({
                       "id": i.id.to_string(),
                       "node_id": i.node_id,
                       "interaction_type": i.interaction_type.as_str(),
                       "content": i.content,
                       "created_at": i.created_at.to_rfc3339(),
                   })
               })
               .collect())
    }

    /// Finaliza la conversación.
    pub fn end_conversation(&self, session_token: &str, status: SessionStatus) -> Result<ChatResponse, EngineError> {
        let session = self.runtime.end(session_token, status)?;
        Ok(ChatResponse { session_id: session.id,
                          session_token: session.session_token.clone(),
                          status: session.status,
                          messages: Vec::new(),
                          expects_input: false,
                          input_type: None,
                          prompt: None,
                          current_node: session.current_node_id.clone() })
    }
}
