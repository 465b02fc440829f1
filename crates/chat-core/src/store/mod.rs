//! Contratos de almacenamiento del motor.
//!
//! `ChatStore` es lo mínimo que necesita el runtime para avanzar sesiones;
//! `FlowAuthoring` es la superficie de autoría del Flow Store (CRUD de grafo,
//! publicación, clonado, sincronización de snapshot). Cada contrato tiene
//! paridad 1:1 entre el backend en memoria (este crate) y el backend
//! Postgres (`chat-persistence`).

pub mod memory;

use serde_json::Value;
use uuid::Uuid;

use crate::errors::EngineError;
use crate::event::DomainEvent;
use crate::model::{Connection, ConnectionSpec, ExecutionStep, Flow, FlowFilter, FlowGraph, FlowPatch, FlowSpec,
                   Interaction, NewExecutionStep, NewInteraction, NewSession, NewTraceAccess, Node, NodePatch,
                   NodeSpec, Session, SessionFilter, SessionSummary};
use chat_domain::types::SessionStatus;

pub use memory::InMemoryStore;

/// Mutación de sesión con control de revisión.
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    pub session_id: Uuid,
    pub new_state: Value,
    pub current_node_id: Option<String>,
    /// `None` omite el chequeo de revisión (caller ya serializado).
    pub expected_revision: Option<i32>,
    /// Las interacciones de usuario ganan ante conflicto; las tareas de
    /// fondo abortan.
    pub user_initiated: bool,
}

/// Resultado de una mutación con control de revisión.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    Applied(Session),
    /// Conflicto detectado para una tarea de fondo: no se aplicó nada.
    Rejected { current: Session, reason: String },
}

impl UpdateOutcome {
    pub fn applied(self) -> Option<Session> {
        match self {
            UpdateOutcome::Applied(session) => Some(session),
            UpdateOutcome::Rejected { .. } => None,
        }
    }
}

/// Superficie de almacenamiento que consume el runtime.
///
/// Garantía transaccional: `commit_tick` persiste mutación de estado +
/// historial + paso de traza + eventos de outbox como una unidad atómica.
pub trait ChatStore {
    // ---- grafo (lectura) ----
    fn flow(&self, flow_id: Uuid) -> Result<Flow, EngineError>;
    fn node(&self, flow_id: Uuid, node_id: &str) -> Result<Node, EngineError>;
    /// Conexiones salientes de un nodo en orden de creación (determinista).
    fn connections_from(&self, flow_id: Uuid, source_node_id: &str) -> Result<Vec<Connection>, EngineError>;

    // ---- sesiones ----
    fn create_session(&self, new: NewSession) -> Result<Session, EngineError>;
    fn session_by_token(&self, token: &str) -> Result<Option<Session>, EngineError>;
    fn session_by_id(&self, session_id: Uuid) -> Result<Option<Session>, EngineError>;
    fn sessions_for_user(&self, user_id: Uuid, active_only: bool) -> Result<Vec<Session>, EngineError>;
    fn commit_tick(&self,
                   update: &SessionUpdate,
                   interactions: &[NewInteraction],
                   step: Option<&NewExecutionStep>)
                   -> Result<UpdateOutcome, EngineError>;
    /// Actualiza solo `last_activity_at`: sin bump de revisión y sin evento.
    fn touch_session(&self, session_id: Uuid) -> Result<(), EngineError>;
    fn end_session(&self, session_id: Uuid, status: SessionStatus) -> Result<Session, EngineError>;
    fn delete_session(&self, session_id: Uuid) -> Result<(), EngineError>;

    // ---- historial (append-only) ----
    fn add_interaction(&self, session_id: Uuid, interaction: &NewInteraction) -> Result<(), EngineError>;
    fn history(&self,
               session_id: Uuid,
               limit: Option<usize>,
               offset: Option<usize>)
               -> Result<Vec<Interaction>, EngineError>;

    // ---- traza (append-only) ----
    fn next_step_number(&self, session_id: Uuid) -> Result<i32, EngineError>;
    fn record_step(&self, step: &NewExecutionStep) -> Result<(), EngineError>;
    fn session_steps(&self, session_id: Uuid) -> Result<Vec<ExecutionStep>, EngineError>;
    fn log_trace_access(&self, access: &NewTraceAccess) -> Result<(), EngineError>;
    fn list_flow_sessions(&self, flow_id: Uuid, filter: &SessionFilter) -> Result<Vec<SessionSummary>, EngineError>;

    // ---- outbox ----
    fn enqueue_event(&self, event: &DomainEvent) -> Result<(), EngineError>;
}

/// Superficie de autoría del Flow Store.
pub trait FlowAuthoring {
    fn create_flow(&self, spec: FlowSpec) -> Result<Flow, EngineError>;
    fn update_flow(&self, flow_id: Uuid, patch: FlowPatch) -> Result<Flow, EngineError>;
    fn delete_flow(&self, flow_id: Uuid) -> Result<(), EngineError>;

    fn add_node(&self, flow_id: Uuid, spec: NodeSpec) -> Result<Node, EngineError>;
    fn update_node(&self, flow_id: Uuid, node_id: &str, patch: NodePatch) -> Result<Node, EngineError>;
    fn delete_node(&self, flow_id: Uuid, node_id: &str) -> Result<(), EngineError>;
    fn update_node_positions(&self, flow_id: Uuid, positions: &[(String, Value)]) -> Result<(), EngineError>;

    fn add_connection(&self, flow_id: Uuid, spec: ConnectionSpec) -> Result<Connection, EngineError>;
    fn delete_connection(&self, flow_id: Uuid, connection_id: Uuid) -> Result<(), EngineError>;

    fn publish_flow(&self,
                    flow_id: Uuid,
                    published_by: Option<Uuid>,
                    new_version: Option<String>)
                    -> Result<Flow, EngineError>;
    fn unpublish_flow(&self, flow_id: Uuid) -> Result<Flow, EngineError>;
    fn clone_flow(&self, source_id: Uuid, new_name: &str, new_version: &str) -> Result<Flow, EngineError>;

    fn find_published_flows(&self) -> Result<Vec<Flow>, EngineError>;
    fn flow_with_graph(&self, flow_id: Uuid) -> Result<FlowGraph, EngineError>;
    fn list_flows(&self, filter: &FlowFilter) -> Result<(Vec<Flow>, usize), EngineError>;
}
