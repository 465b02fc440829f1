//! Modelo de sesiones e historial de conversación.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use chat_domain::types::{InputKind, InteractionType, SessionStatus, TraceLevel};

/// Una caminata durable de un flujo para un usuario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub user_id: Option<Uuid>,
    /// Token opaco url-safe; índice único para carga O(log n).
    pub session_token: String,
    pub current_node_id: Option<String>,
    /// Bolsa jerárquica con raíces reservadas `user`/`temp`/`context`.
    pub state: Value,
    pub info: Value,
    pub status: SessionStatus,
    /// Contador monotónico: crece estrictamente en cada mutación de estado.
    pub revision: i32,
    pub trace_enabled: bool,
    pub trace_level: TraceLevel,
    pub state_hash: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Datos para crear una sesión (revision arranca en 1, status ACTIVE).
#[derive(Debug, Clone)]
pub struct NewSession {
    pub flow_id: Uuid,
    pub user_id: Option<Uuid>,
    pub session_token: String,
    pub current_node_id: Option<String>,
    pub state: Value,
    pub info: Value,
    pub trace_enabled: bool,
    pub trace_level: TraceLevel,
}

/// Entrada append-only del historial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: Uuid,
    pub session_id: Uuid,
    pub node_id: String,
    pub interaction_type: InteractionType,
    pub content: Value,
    pub created_at: DateTime<Utc>,
}

/// Entrada de historial aún sin persistir.
#[derive(Debug, Clone)]
pub struct NewInteraction {
    pub node_id: String,
    pub interaction_type: InteractionType,
    pub content: Value,
}

/// Input del usuario al reanudar una sesión suspendida.
#[derive(Debug, Clone)]
pub struct UserInput {
    pub value: String,
    pub input_type: InputKind,
}

/// Filtros de listado de sesiones de un flujo.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub user_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub has_errors: Option<bool>,
    pub limit: usize,
    pub offset: usize,
}

/// Resumen de sesión para el listado de la superficie de traza.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub session_token: String,
    pub user_id: Option<Uuid>,
    pub flow_id: Uuid,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_steps: i64,
    pub error_count: i64,
    pub has_errors: bool,
    /// Primeros node_id recorridos (hasta 10).
    pub path_summary: Vec<String>,
}
