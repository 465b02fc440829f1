//! Pasos de ejecución (traza append-only) y el resultado de un procesador.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use chat_domain::types::{ConnectionType, InputKind};

/// Paso de traza persistido. `(session_id, step_number)` es único y
/// monotónico por sesión (contiguo desde 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: Uuid,
    pub session_id: Uuid,
    pub step_number: i32,
    pub node_id: String,
    pub node_type: String,
    /// Snapshots de estado ya enmascarados (PII) antes de persistir.
    pub state_before: Value,
    pub state_after: Value,
    /// Detalles tipados por clase de nodo (ver builders del tracer).
    pub execution_details: Value,
    pub connection_type: Option<String>,
    pub next_node_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
}

/// Paso de traza aún sin persistir.
#[derive(Debug, Clone)]
pub struct NewExecutionStep {
    pub session_id: Uuid,
    pub step_number: i32,
    pub node_id: String,
    pub node_type: String,
    pub state_before: Value,
    pub state_after: Value,
    pub execution_details: Value,
    pub connection_type: Option<String>,
    pub next_node_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
}

/// Registro de auditoría por lectura de traza.
#[derive(Debug, Clone)]
pub struct NewTraceAccess {
    pub session_id: Uuid,
    pub accessed_by: Option<Uuid>,
    pub access_type: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub data_accessed: Option<Value>,
}

/// Mensaje emitido por un nodo hacia el usuario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmittedMessage {
    /// Tipo de mensaje (`text`, `image`, `client_script`, ...).
    pub kind: String,
    pub content: Value,
    pub delay: Option<f64>,
}

/// Resultado de procesar un nodo.
///
/// `variables` es el mapa de escrituras pendientes (se funde con deep-merge
/// en el estado); `connection` la arista elegida; `details` el material para
/// `execution_details` del paso de traza.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub success: bool,
    pub variables: Value,
    pub messages: Vec<EmittedMessage>,
    pub connection: Option<ConnectionType>,
    pub errors: Vec<String>,
    pub expects_input: bool,
    pub input_type: Option<InputKind>,
    /// Prompt para el caller cuando `expects_input`.
    pub prompt: Option<Value>,
    pub details: Value,
    /// Pide terminar la sesión aunque exista conexión saliente.
    pub terminate: bool,
}

impl Default for StepResult {
    fn default() -> Self {
        Self { success: true,
               variables: Value::Object(serde_json::Map::new()),
               messages: Vec::new(),
               connection: Some(ConnectionType::Default),
               errors: Vec::new(),
               expects_input: false,
               input_type: None,
               prompt: None,
               details: Value::Null,
               terminate: false }
    }
}
