//! Implementaciones Postgres (Diesel) de los contratos del core.
//!
//! Contenido:
//! - Pool r2d2 + migraciones automáticas al construir.
//! - Mapeo fila ⇄ modelo para todas las tablas.
//! - `PgChatStore`: backend de `ChatStore` (sesiones/traza/outbox, en
//!   `session_store`) y de `FlowAuthoring` (grafo/snapshot/clonado, en
//!   `flow_store`).
//! - `PgSessionLocks`: advisory locks por sesión (`locks`).
//! - `OutboxDispatcher` (`outbox`) y `TraceCleanup` (`trace_store`).

pub mod flow_store;
pub mod locks;
pub mod outbox;
pub mod session_store;
pub mod trace_store;

use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use log::warn;
use serde_json::Value;
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{conversation_history, conversation_sessions, event_outbox, flow_connections, flow_definitions,
                    flow_execution_steps, flow_nodes, trace_access_audit};
use chat_core::event::DomainEvent;
use chat_core::model::{Connection, ExecutionStep, Flow, Interaction, Node, Session};
use chat_domain::types::{ConnectionType, InteractionType, NodeType, SessionStatus, TraceLevel};

pub use locks::PgSessionLocks;
pub use outbox::OutboxDispatcher;
pub use trace_store::TraceCleanup;

/// Alias del pool r2d2 de conexiones Postgres. Al construirlo se corren las
/// migraciones pendientes una sola vez.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Construye un pool Postgres r2d2 a partir de URL, corriendo migraciones en
/// el primer checkout.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = if min_size == 0 { 1 } else { min_size };
    let validated_max = if max_size == 0 { 1 } else { max_size };
    let final_min = validated_min.min(validated_max);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(final_min))
                                    .max_size(validated_max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Helper de desarrollo: carga `.env` y construye un pool ya migrado.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env();
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}

/// Backend Postgres del store del motor.
pub struct PgChatStore {
    pub pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn conn(&self)
                       -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Filas ⇄ modelos
// ---------------------------------------------------------------------------

#[derive(Queryable, Debug)]
pub struct FlowRow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub version: String,
    pub entry_node_id: String,
    pub flow_data: Value,
    pub info: Value,
    pub contract: Option<Value>,
    pub is_published: bool,
    pub is_active: bool,
    pub trace_enabled: bool,
    pub trace_sample_rate: i32,
    pub retention_days: i32,
    pub created_by: Option<Uuid>,
    pub published_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl From<FlowRow> for Flow {
    fn from(row: FlowRow) -> Self {
        Flow { id: row.id,
               name: row.name,
               description: row.description,
               version: row.version,
               entry_node_id: row.entry_node_id,
               flow_data: row.flow_data,
               info: row.info,
               contract: row.contract,
               is_published: row.is_published,
               is_active: row.is_active,
               trace_enabled: row.trace_enabled,
               trace_sample_rate: row.trace_sample_rate,
               retention_days: row.retention_days,
               created_by: row.created_by,
               published_by: row.published_by,
               created_at: row.created_at,
               updated_at: row.updated_at,
               published_at: row.published_at }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = flow_definitions)]
pub struct NewFlowRow<'a> {
    pub id: &'a Uuid,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub version: &'a str,
    pub entry_node_id: &'a str,
    pub flow_data: &'a Value,
    pub info: &'a Value,
    pub contract: Option<&'a Value>,
    pub trace_enabled: bool,
    pub trace_sample_rate: i32,
    pub retention_days: i32,
    pub created_by: Option<&'a Uuid>,
}

#[derive(Queryable, Debug)]
pub struct NodeRow {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub node_id: String,
    pub node_type: String,
    pub template: Option<String>,
    pub content: Value,
    pub position: Value,
    pub info: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<NodeRow> for Node {
    fn from(row: NodeRow) -> Self {
        let node_type = NodeType::parse(&row.node_type).unwrap_or_else(|| {
                            warn!("unknown node_type '{}' for node '{}', treating as message", row.node_type, row.node_id);
                            NodeType::Message
                        });
        Node { id: row.id,
               flow_id: row.flow_id,
               node_id: row.node_id,
               node_type,
               template: row.template,
               content: row.content,
               position: row.position,
               info: row.info,
               created_at: row.created_at,
               updated_at: row.updated_at }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = flow_nodes)]
pub struct NewNodeRow<'a> {
    pub flow_id: &'a Uuid,
    pub node_id: &'a str,
    pub node_type: &'a str,
    pub template: Option<&'a str>,
    pub content: &'a Value,
    pub position: &'a Value,
    pub info: &'a Value,
}

#[derive(Queryable, Debug)]
pub struct ConnectionRow {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub source_node_id: String,
    pub target_node_id: String,
    pub connection_type: String,
    pub conditions: Value,
    pub info: Value,
    pub created_at: DateTime<Utc>,
}

impl From<ConnectionRow> for Connection {
    fn from(row: ConnectionRow) -> Self {
        let connection_type = ConnectionType::parse(&row.connection_type).unwrap_or_else(|| {
                                  warn!("unknown connection_type '{}', treating as default", row.connection_type);
                                  ConnectionType::Default
                              });
        Connection { id: row.id,
                     flow_id: row.flow_id,
                     source_node_id: row.source_node_id,
                     target_node_id: row.target_node_id,
                     connection_type,
                     conditions: row.conditions,
                     info: row.info,
                     created_at: row.created_at }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = flow_connections)]
pub struct NewConnectionRow<'a> {
    pub flow_id: &'a Uuid,
    pub source_node_id: &'a str,
    pub target_node_id: &'a str,
    pub connection_type: &'a str,
    pub conditions: &'a Value,
    pub info: &'a Value,
}

#[derive(Queryable, Debug)]
pub struct SessionRow {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub user_id: Option<Uuid>,
    pub session_token: String,
    pub current_node_id: Option<String>,
    pub state: Value,
    pub info: Value,
    pub status: String,
    pub revision: i32,
    pub trace_enabled: bool,
    pub trace_level: String,
    pub state_hash: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session { id: row.id,
                  flow_id: row.flow_id,
                  user_id: row.user_id,
                  session_token: row.session_token,
                  current_node_id: row.current_node_id,
                  state: row.state,
                  info: row.info,
                  status: SessionStatus::parse(&row.status).unwrap_or(SessionStatus::Active),
                  revision: row.revision,
                  trace_enabled: row.trace_enabled,
                  trace_level: TraceLevel::parse(&row.trace_level).unwrap_or(TraceLevel::Standard),
                  state_hash: row.state_hash,
                  started_at: row.started_at,
                  last_activity_at: row.last_activity_at,
                  ended_at: row.ended_at }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = conversation_sessions)]
pub struct NewSessionRow<'a> {
    pub flow_id: &'a Uuid,
    pub user_id: Option<&'a Uuid>,
    pub session_token: &'a str,
    pub current_node_id: Option<&'a str>,
    pub state: &'a Value,
    pub info: &'a Value,
    pub status: &'a str,
    pub revision: i32,
    pub trace_enabled: bool,
    pub trace_level: &'a str,
    pub state_hash: Option<&'a str>,
}

#[derive(Queryable, Debug)]
pub struct InteractionRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub node_id: String,
    pub interaction_type: String,
    pub content: Value,
    pub created_at: DateTime<Utc>,
}

impl From<InteractionRow> for Interaction {
    fn from(row: InteractionRow) -> Self {
        Interaction { id: row.id,
                      session_id: row.session_id,
                      node_id: row.node_id,
                      interaction_type: InteractionType::parse(&row.interaction_type)
                          .unwrap_or(InteractionType::Action),
                      content: row.content,
                      created_at: row.created_at }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = conversation_history)]
pub struct NewInteractionRow<'a> {
    pub session_id: &'a Uuid,
    pub node_id: &'a str,
    pub interaction_type: &'a str,
    pub content: &'a Value,
}

#[derive(Queryable, Debug)]
pub struct StepRow {
    pub id: Uuid,
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

impl From<StepRow> for ExecutionStep {
    fn from(row: StepRow) -> Self {
        ExecutionStep { id: row.id,
                        session_id: row.session_id,
                        step_number: row.step_number,
                        node_id: row.node_id,
                        node_type: row.node_type,
                        state_before: row.state_before,
                        state_after: row.state_after,
                        execution_details: row.execution_details,
                        connection_type: row.connection_type,
                        next_node_id: row.next_node_id,
                        started_at: row.started_at,
                        completed_at: row.completed_at,
                        duration_ms: row.duration_ms,
                        error_message: row.error_message,
                        error_details: row.error_details }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = flow_execution_steps)]
pub struct NewStepRow<'a> {
    pub session_id: &'a Uuid,
    pub step_number: i32,
    pub node_id: &'a str,
    pub node_type: &'a str,
    pub state_before: &'a Value,
    pub state_after: &'a Value,
    pub execution_details: &'a Value,
    pub connection_type: Option<&'a str>,
    pub next_node_id: Option<&'a str>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<&'a str>,
    pub error_details: Option<&'a Value>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = trace_access_audit)]
pub struct NewAuditRow<'a> {
    pub session_id: &'a Uuid,
    pub accessed_by: Option<&'a Uuid>,
    pub access_type: &'a str,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub data_accessed: Option<&'a Value>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = event_outbox)]
pub struct NewOutboxRow<'a> {
    pub event_type: &'a str,
    pub payload: &'a Value,
    pub destination: &'a str,
    pub priority: &'a str,
}

#[derive(Queryable, Debug, Clone)]
pub struct OutboxRow {
    pub id: i64,
    pub event_type: String,
    pub payload: Value,
    pub destination: String,
    pub priority: String,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers transaccionales compartidos
// ---------------------------------------------------------------------------

/// Inserta un evento de dominio en el outbox dentro de la transacción dada.
pub(crate) fn insert_outbox_event(tx: &mut PgConnection, event: &DomainEvent) -> Result<(), PersistenceError> {
    diesel::insert_into(event_outbox::table).values(NewOutboxRow { event_type: &event.event_type,
                                                                   payload: &event.payload,
                                                                   destination: &event.destination,
                                                                   priority: &event.priority })
                                            .execute(tx)?;
    Ok(())
}

/// Carga una sesión por id dentro de la transacción dada.
pub(crate) fn load_session(tx: &mut PgConnection, session_id: Uuid) -> Result<Option<Session>, PersistenceError> {
    let row: Option<SessionRow> = conversation_sessions::table.find(session_id)
                                                              .first(tx)
                                                              .optional()?;
    Ok(row.map(Session::from))
}
