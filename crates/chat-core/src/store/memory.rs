//! Backend en memoria de `ChatStore` + `FlowAuthoring`.
//!
//! - Volátil: útil para tests, demos y como referencia de semántica; el
//!   backend Postgres debe observar paridad 1:1 con lo que se hace aquí.
//! - Thread-safe vía un único mutex interno (la granularidad fina la aporta
//!   el advisory lock por sesión del controlador, no este mutex).
//! - El "outbox" es un vector ordenado por id; `drain_pending` hace de
//!   dispatcher para pruebas de orden de entrega.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use log::debug;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::EngineError;
use crate::event::{self, DomainEvent};
use crate::model::{Connection, ConnectionSpec, ExecutionStep, Flow, FlowFilter, FlowGraph, FlowPatch, FlowSpec,
                   Interaction, NewExecutionStep, NewInteraction, NewSession, NewTraceAccess, Node, NodePatch,
                   NodeSpec, Session, SessionFilter, SessionSummary};
use crate::snapshot::{extract_connections, extract_nodes, project_snapshot};
use crate::store::{ChatStore, FlowAuthoring, SessionUpdate, UpdateOutcome};
use crate::validate::validate_graph;
use crate::concurrency::{resolve_revision_conflict, RevisionDecision};
use chat_domain::hashing::state_hash;
use chat_domain::types::SessionStatus;
use chat_domain::version::bump_minor;

/// Fila del outbox en memoria (espejo de la tabla `event_outbox`).
#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub id: i64,
    pub event_type: String,
    pub payload: Value,
    pub destination: String,
    pub priority: String,
    pub created_at: chrono::DateTime<Utc>,
    pub delivered_at: Option<chrono::DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

/// Registro de auditoría en memoria.
#[derive(Debug, Clone)]
pub struct TraceAccessRow {
    pub session_id: Uuid,
    pub accessed_by: Option<Uuid>,
    pub access_type: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub data_accessed: Option<Value>,
    pub accessed_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    flows: HashMap<Uuid, Flow>,
    nodes: HashMap<Uuid, Vec<Node>>,
    connections: HashMap<Uuid, Vec<Connection>>,
    sessions: HashMap<Uuid, Session>,
    token_index: HashMap<String, Uuid>,
    history: HashMap<Uuid, Vec<Interaction>>,
    steps: HashMap<Uuid, Vec<ExecutionStep>>,
    audits: Vec<TraceAccessRow>,
    outbox: Vec<OutboxRow>,
    outbox_seq: i64,
}

impl Inner {
    fn enqueue(&mut self, event: &DomainEvent) {
        self.outbox_seq += 1;
        self.outbox.push(OutboxRow { id: self.outbox_seq,
                                     event_type: event.event_type.clone(),
                                     payload: event.payload.clone(),
                                     destination: event.destination.clone(),
                                     priority: event.priority.clone(),
                                     created_at: Utc::now(),
                                     delivered_at: None,
                                     attempts: 0,
                                     last_error: None });
    }

    fn sync_snapshot(&mut self, flow_id: Uuid) -> Result<(), EngineError> {
        let nodes = self.nodes.get(&flow_id).cloned().unwrap_or_default();
        let connections = self.connections.get(&flow_id).cloned().unwrap_or_default();
        let flow = self.flows
                       .get_mut(&flow_id)
                       .ok_or_else(|| EngineError::NotFound(format!("flow {flow_id}")))?;
        flow.flow_data = project_snapshot(&flow.flow_data, &nodes, &connections);
        flow.updated_at = Utc::now();
        Ok(())
    }

    fn materialize_graph(&mut self, flow_id: Uuid, flow_data: &Value) -> Result<(), EngineError> {
        let now = Utc::now();
        for spec in extract_nodes(flow_data) {
            let nodes = self.nodes.entry(flow_id).or_default();
            if nodes.iter().any(|n| n.node_id == spec.node_id) {
                return Err(EngineError::Integrity(format!("duplicate node_id '{}'", spec.node_id)));
            }
            nodes.push(Node { id: Uuid::new_v4(),
                              flow_id,
                              node_id: spec.node_id,
                              node_type: spec.node_type,
                              template: spec.template,
                              content: spec.content,
                              position: spec.position.unwrap_or_else(|| serde_json::json!({"x": 0, "y": 0})),
                              info: spec.info,
                              created_at: now,
                              updated_at: now });
        }
        for spec in extract_connections(flow_data) {
            self.insert_connection(flow_id, spec)?;
        }
        Ok(())
    }

    fn insert_connection(&mut self, flow_id: Uuid, spec: ConnectionSpec) -> Result<Connection, EngineError> {
        let node_ids: Vec<String> = self.nodes
                                        .get(&flow_id)
                                        .map(|ns| ns.iter().map(|n| n.node_id.clone()).collect())
                                        .unwrap_or_default();
        if !node_ids.contains(&spec.source_node_id) {
            return Err(EngineError::Integrity(format!("connection source '{}' does not exist", spec.source_node_id)));
        }
        if !node_ids.contains(&spec.target_node_id) {
            return Err(EngineError::Integrity(format!("connection target '{}' does not exist", spec.target_node_id)));
        }
        let connections = self.connections.entry(flow_id).or_default();
        if connections.iter().any(|c| {
                                 c.source_node_id == spec.source_node_id
                                 && c.target_node_id == spec.target_node_id
                                 && c.connection_type == spec.connection_type
                             })
        {
            return Err(EngineError::Integrity(format!("duplicate connection {} -> {} ({})",
                                                      spec.source_node_id,
                                                      spec.target_node_id,
                                                      spec.connection_type.as_str())));
        }
        let connection = Connection { id: Uuid::new_v4(),
                                      flow_id,
                                      source_node_id: spec.source_node_id,
                                      target_node_id: spec.target_node_id,
                                      connection_type: spec.connection_type,
                                      conditions: spec.conditions,
                                      info: spec.info,
                                      created_at: Utc::now() };
        connections.push(connection.clone());
        Ok(connection)
    }

    fn delete_session_rows(&mut self, session_id: Uuid) {
        if let Some(session) = self.sessions.remove(&session_id) {
            self.token_index.remove(&session.session_token);
            self.history.remove(&session_id);
            self.steps.remove(&session_id);
            let event = event::session_deleted(&session);
            self.enqueue(&event);
        }
    }
}

/// Store en memoria con paridad de contrato con el backend Postgres.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("store mutex poisoned")
    }

    /// Filas del outbox (para inspección en tests y demos).
    pub fn outbox_rows(&self) -> Vec<OutboxRow> {
        self.lock().outbox.clone()
    }

    /// Dispatcher mínimo: marca como entregadas y devuelve, en orden de id,
    /// las filas pendientes.
    pub fn drain_pending(&self, limit: usize) -> Vec<OutboxRow> {
        let mut inner = self.lock();
        let now = Utc::now();
        let mut drained = Vec::new();
        for row in inner.outbox.iter_mut() {
            if row.delivered_at.is_none() {
                row.delivered_at = Some(now);
                row.attempts += 1;
                drained.push(row.clone());
                if drained.len() >= limit {
                    break;
                }
            }
        }
        drained
    }

    /// Registros de auditoría (inspección en tests).
    pub fn audit_rows(&self) -> Vec<TraceAccessRow> {
        self.lock().audits.clone()
    }
}

impl ChatStore for InMemoryStore {
    fn flow(&self, flow_id: Uuid) -> Result<Flow, EngineError> {
        self.lock()
            .flows
            .get(&flow_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("flow {flow_id}")))
    }

    fn node(&self, flow_id: Uuid, node_id: &str) -> Result<Node, EngineError> {
        self.lock()
            .nodes
            .get(&flow_id)
            .and_then(|ns| ns.iter().find(|n| n.node_id == node_id))
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("node '{node_id}' in flow {flow_id}")))
    }

    fn connections_from(&self, flow_id: Uuid, source_node_id: &str) -> Result<Vec<Connection>, EngineError> {
        Ok(self.lock()
               .connections
               .get(&flow_id)
               .map(|cs| cs.iter().filter(|c| c.source_node_id == source_node_id).cloned().collect())
               .unwrap_or_default())
    }

    fn create_session(&self, new: NewSession) -> Result<Session, EngineError> {
        let mut inner = self.lock();
        if !inner.flows.contains_key(&new.flow_id) {
            return Err(EngineError::NotFound(format!("flow {}", new.flow_id)));
        }
        if inner.token_index.contains_key(&new.session_token) {
            return Err(EngineError::Integrity("duplicate session token".into()));
        }
        let now = Utc::now();
        let session = Session { id: Uuid::new_v4(),
                                flow_id: new.flow_id,
                                user_id: new.user_id,
                                session_token: new.session_token.clone(),
                                current_node_id: new.current_node_id,
                                state_hash: Some(state_hash(&new.state)),
                                state: new.state,
                                info: new.info,
                                status: SessionStatus::Active,
                                revision: 1,
                                trace_enabled: new.trace_enabled,
                                trace_level: new.trace_level,
                                started_at: now,
                                last_activity_at: now,
                                ended_at: None };
        inner.token_index.insert(new.session_token, session.id);
        inner.sessions.insert(session.id, session.clone());
        let started = event::session_started(&session);
        inner.enqueue(&started);
        debug!("session created id={} token={}", session.id, session.session_token);
        Ok(session)
    }

    fn session_by_token(&self, token: &str) -> Result<Option<Session>, EngineError> {
        let inner = self.lock();
        Ok(inner.token_index.get(token).and_then(|id| inner.sessions.get(id)).cloned())
    }

    fn session_by_id(&self, session_id: Uuid) -> Result<Option<Session>, EngineError> {
        Ok(self.lock().sessions.get(&session_id).cloned())
    }

    fn sessions_for_user(&self, user_id: Uuid, active_only: bool) -> Result<Vec<Session>, EngineError> {
        let inner = self.lock();
        let mut sessions: Vec<Session> = inner.sessions
                                              .values()
                                              .filter(|s| s.user_id == Some(user_id))
                                              .filter(|s| !active_only || s.status == SessionStatus::Active)
                                              .cloned()
                                              .collect();
        sessions.sort_by_key(|s| s.started_at);
        Ok(sessions)
    }

    fn commit_tick(&self,
                   update: &SessionUpdate,
                   interactions: &[NewInteraction],
                   step: Option<&NewExecutionStep>)
                   -> Result<UpdateOutcome, EngineError> {
        let mut inner = self.lock();
        let old = inner.sessions
                       .get(&update.session_id)
                       .cloned()
                       .ok_or_else(|| EngineError::NotFound(format!("session {}", update.session_id)))?;

        if let RevisionDecision::Reject(reason) =
            resolve_revision_conflict(&old, update.expected_revision, update.user_initiated)
        {
            return Ok(UpdateOutcome::Rejected { current: old, reason });
        }

        let mut updated = old.clone();
        updated.state = update.new_state.clone();
        updated.state_hash = Some(state_hash(&updated.state));
        if let Some(node_id) = &update.current_node_id {
            updated.current_node_id = Some(node_id.clone());
        }
        updated.revision = old.revision + 1;
        updated.last_activity_at = Utc::now();

        // Misma transacción: mutación + historial + paso de traza + outbox
        for interaction in interactions {
            let row = Interaction { id: Uuid::new_v4(),
                                    session_id: update.session_id,
                                    node_id: interaction.node_id.clone(),
                                    interaction_type: interaction.interaction_type,
                                    content: interaction.content.clone(),
                                    created_at: Utc::now() };
            inner.history.entry(update.session_id).or_default().push(row);
        }
        if let Some(step) = step {
            push_step(&mut inner, step);
        }
        for event in event::session_updated_events(&old, &updated) {
            inner.enqueue(&event);
        }
        inner.sessions.insert(update.session_id, updated.clone());
        Ok(UpdateOutcome::Applied(updated))
    }

    fn touch_session(&self, session_id: Uuid) -> Result<(), EngineError> {
        let mut inner = self.lock();
        let session = inner.sessions
                           .get_mut(&session_id)
                           .ok_or_else(|| EngineError::NotFound(format!("session {session_id}")))?;
        session.last_activity_at = Utc::now();
        Ok(())
    }

    fn end_session(&self, session_id: Uuid, status: SessionStatus) -> Result<Session, EngineError> {
        let mut inner = self.lock();
        let old = inner.sessions
                       .get(&session_id)
                       .cloned()
                       .ok_or_else(|| EngineError::NotFound(format!("session {session_id}")))?;
        // Idempotente sobre estados terminales
        if old.status.is_terminal() {
            return Ok(old);
        }
        let mut updated = old.clone();
        updated.status = status;
        updated.ended_at = Some(Utc::now());
        updated.last_activity_at = Utc::now();
        for event in event::session_updated_events(&old, &updated) {
            inner.enqueue(&event);
        }
        inner.sessions.insert(session_id, updated.clone());
        Ok(updated)
    }

    fn delete_session(&self, session_id: Uuid) -> Result<(), EngineError> {
        self.lock().delete_session_rows(session_id);
        Ok(())
    }

    fn add_interaction(&self, session_id: Uuid, interaction: &NewInteraction) -> Result<(), EngineError> {
        let mut inner = self.lock();
        if !inner.sessions.contains_key(&session_id) {
            return Err(EngineError::NotFound(format!("session {session_id}")));
        }
        let row = Interaction { id: Uuid::new_v4(),
                                session_id,
                                node_id: interaction.node_id.clone(),
                                interaction_type: interaction.interaction_type,
                                content: interaction.content.clone(),
                                created_at: Utc::now() };
        inner.history.entry(session_id).or_default().push(row);
        Ok(())
    }

    fn history(&self,
               session_id: Uuid,
               limit: Option<usize>,
               offset: Option<usize>)
               -> Result<Vec<Interaction>, EngineError> {
        let inner = self.lock();
        let rows = inner.history.get(&session_id).cloned().unwrap_or_default();
        let offset = offset.unwrap_or(0);
        let limit = limit.unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    fn next_step_number(&self, session_id: Uuid) -> Result<i32, EngineError> {
        let inner = self.lock();
        let max = inner.steps
                       .get(&session_id)
                       .and_then(|ss| ss.iter().map(|s| s.step_number).max())
                       .unwrap_or(0);
        Ok(max + 1)
    }

    fn record_step(&self, step: &NewExecutionStep) -> Result<(), EngineError> {
        let mut inner = self.lock();
        push_step(&mut inner, step);
        Ok(())
    }

    fn session_steps(&self, session_id: Uuid) -> Result<Vec<ExecutionStep>, EngineError> {
        let mut rows = self.lock().steps.get(&session_id).cloned().unwrap_or_default();
        rows.sort_by_key(|s| s.step_number);
        Ok(rows)
    }

    fn log_trace_access(&self, access: &NewTraceAccess) -> Result<(), EngineError> {
        self.lock().audits.push(TraceAccessRow { session_id: access.session_id,
                                                 accessed_by: access.accessed_by,
                                                 access_type: access.access_type.clone(),
                                                 ip_address: access.ip_address.clone(),
                                                 user_agent: access.user_agent.clone(),
                                                 data_accessed: access.data_accessed.clone(),
                                                 accessed_at: Utc::now() });
        Ok(())
    }

    fn list_flow_sessions(&self, flow_id: Uuid, filter: &SessionFilter) -> Result<Vec<SessionSummary>, EngineError> {
        let inner = self.lock();
        let mut sessions: Vec<&Session> = inner.sessions.values().filter(|s| s.flow_id == flow_id).collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        let mut items = Vec::new();
        for session in sessions {
            if let Some(status) = filter.status {
                if session.status != status {
                    continue;
                }
            }
            if let Some(user_id) = filter.user_id {
                if session.user_id != Some(user_id) {
                    continue;
                }
            }
            if let Some(from) = filter.from {
                if session.started_at < from {
                    continue;
                }
            }
            if let Some(to) = filter.to {
                if session.started_at > to {
                    continue;
                }
            }
            let steps = inner.steps.get(&session.id).cloned().unwrap_or_default();
            let error_count = steps.iter().filter(|s| s.error_message.is_some()).count() as i64;
            let has_errors = error_count > 0;
            if let Some(wanted) = filter.has_errors {
                if wanted != has_errors {
                    continue;
                }
            }
            let mut ordered = steps.clone();
            ordered.sort_by_key(|s| s.step_number);
            items.push(SessionSummary { id: session.id,
                                        session_token: session.session_token.clone(),
                                        user_id: session.user_id,
                                        flow_id: session.flow_id,
                                        status: session.status,
                                        started_at: session.started_at,
                                        ended_at: session.ended_at,
                                        total_steps: steps.len() as i64,
                                        error_count,
                                        has_errors,
                                        path_summary: ordered.iter().take(10).map(|s| s.node_id.clone()).collect() });
        }
        let offset = filter.offset;
        let limit = if filter.limit == 0 { 20 } else { filter.limit };
        Ok(items.into_iter().skip(offset).take(limit).collect())
    }

    fn enqueue_event(&self, event: &DomainEvent) -> Result<(), EngineError> {
        self.lock().enqueue(event);
        Ok(())
    }
}

/// Inserta un paso respetando la unicidad de `(session_id, step_number)`
/// (idempotencia de appends reintentados).
fn push_step(inner: &mut Inner, step: &NewExecutionStep) {
    let rows = inner.steps.entry(step.session_id).or_default();
    if rows.iter().any(|s| s.step_number == step.step_number) {
        return;
    }
    rows.push(ExecutionStep { id: Uuid::new_v4(),
                              session_id: step.session_id,
                              step_number: step.step_number,
                              node_id: step.node_id.clone(),
                              node_type: step.node_type.clone(),
                              state_before: step.state_before.clone(),
                              state_after: step.state_after.clone(),
                              execution_details: step.execution_details.clone(),
                              connection_type: step.connection_type.clone(),
                              next_node_id: step.next_node_id.clone(),
                              started_at: step.started_at,
                              completed_at: step.completed_at,
                              duration_ms: step.duration_ms,
                              error_message: step.error_message.clone(),
                              error_details: step.error_details.clone() });
}

impl FlowAuthoring for InMemoryStore {
    fn create_flow(&self, spec: FlowSpec) -> Result<Flow, EngineError> {
        let mut inner = self.lock();
        let now = Utc::now();
        let flow = Flow { id: Uuid::new_v4(),
                          name: spec.name,
                          description: spec.description,
                          version: if spec.version.is_empty() { "1.0.0".into() } else { spec.version },
                          entry_node_id: spec.entry_node_id,
                          flow_data: spec.flow_data.clone(),
                          info: spec.info,
                          contract: spec.contract,
                          is_published: false,
                          is_active: true,
                          trace_enabled: spec.trace_enabled,
                          trace_sample_rate: spec.trace_sample_rate.clamp(0, 100),
                          retention_days: spec.retention_days.unwrap_or(crate::constants::DEFAULT_RETENTION_DAYS),
                          created_by: spec.created_by,
                          published_by: None,
                          created_at: now,
                          updated_at: now,
                          published_at: None };
        let flow_id = flow.id;
        inner.flows.insert(flow_id, flow);
        // Todo-o-nada como la transacción del backend Postgres
        if let Err(err) = inner.materialize_graph(flow_id, &spec.flow_data) {
            inner.flows.remove(&flow_id);
            inner.nodes.remove(&flow_id);
            inner.connections.remove(&flow_id);
            return Err(err);
        }
        inner.sync_snapshot(flow_id)?;
        let flow = inner.flows.get(&flow_id).cloned().expect("flow recién insertado");
        let created = event::flow_created(&flow);
        inner.enqueue(&created);
        Ok(flow)
    }

    fn update_flow(&self, flow_id: Uuid, patch: FlowPatch) -> Result<Flow, EngineError> {
        let mut inner = self.lock();
        {
            let flow = inner.flows
                            .get_mut(&flow_id)
                            .ok_or_else(|| EngineError::NotFound(format!("flow {flow_id}")))?;
            if let Some(name) = patch.name {
                flow.name = name;
            }
            if let Some(description) = patch.description {
                flow.description = Some(description);
            }
            if let Some(entry) = patch.entry_node_id {
                flow.entry_node_id = entry;
            }
            if let Some(info) = patch.info {
                flow.info = info;
            }
            if let Some(contract) = patch.contract {
                flow.contract = Some(contract);
            }
            if let Some(active) = patch.is_active {
                flow.is_active = active;
            }
            if let Some(enabled) = patch.trace_enabled {
                flow.trace_enabled = enabled;
            }
            if let Some(rate) = patch.trace_sample_rate {
                flow.trace_sample_rate = rate.clamp(0, 100);
            }
            if let Some(days) = patch.retention_days {
                flow.retention_days = days;
            }
            flow.updated_at = Utc::now();
        }
        inner.sync_snapshot(flow_id)?;
        let flow = inner.flows.get(&flow_id).cloned().expect("flow existente");
        let updated = event::flow_updated(&flow);
        inner.enqueue(&updated);
        Ok(flow)
    }

    fn delete_flow(&self, flow_id: Uuid) -> Result<(), EngineError> {
        let mut inner = self.lock();
        if inner.flows.remove(&flow_id).is_none() {
            return Err(EngineError::NotFound(format!("flow {flow_id}")));
        }
        inner.nodes.remove(&flow_id);
        inner.connections.remove(&flow_id);
        let session_ids: Vec<Uuid> = inner.sessions
                                          .values()
                                          .filter(|s| s.flow_id == flow_id)
                                          .map(|s| s.id)
                                          .collect();
        for session_id in session_ids {
            inner.delete_session_rows(session_id);
        }
        Ok(())
    }

    fn add_node(&self, flow_id: Uuid, spec: NodeSpec) -> Result<Node, EngineError> {
        let mut inner = self.lock();
        if !inner.flows.contains_key(&flow_id) {
            return Err(EngineError::NotFound(format!("flow {flow_id}")));
        }
        let now = Utc::now();
        {
            let nodes = inner.nodes.entry(flow_id).or_default();
            if nodes.iter().any(|n| n.node_id == spec.node_id) {
                return Err(EngineError::Integrity(format!("duplicate node_id '{}'", spec.node_id)));
            }
            nodes.push(Node { id: Uuid::new_v4(),
                              flow_id,
                              node_id: spec.node_id.clone(),
                              node_type: spec.node_type,
                              template: spec.template,
                              content: spec.content,
                              position: spec.position.unwrap_or_else(|| serde_json::json!({"x": 0, "y": 0})),
                              info: spec.info,
                              created_at: now,
                              updated_at: now });
        }
        inner.sync_snapshot(flow_id)?;
        let node = inner.nodes
                        .get(&flow_id)
                        .and_then(|ns| ns.iter().find(|n| n.node_id == spec.node_id))
                        .cloned()
                        .expect("nodo recién insertado");
        let flow = inner.flows.get(&flow_id).cloned().expect("flow existente");
        let updated = event::flow_updated(&flow);
        inner.enqueue(&updated);
        Ok(node)
    }

    fn update_node(&self, flow_id: Uuid, node_id: &str, patch: NodePatch) -> Result<Node, EngineError> {
        let mut inner = self.lock();
        {
            let node = inner.nodes
                            .get_mut(&flow_id)
                            .and_then(|ns| ns.iter_mut().find(|n| n.node_id == node_id))
                            .ok_or_else(|| EngineError::NotFound(format!("node '{node_id}'")))?;
            if let Some(node_type) = patch.node_type {
                node.node_type = node_type;
            }
            if let Some(template) = patch.template {
                node.template = Some(template);
            }
            if let Some(content) = patch.content {
                node.content = content;
            }
            if let Some(position) = patch.position {
                node.position = position;
            }
            if let Some(info) = patch.info {
                node.info = info;
            }
            node.updated_at = Utc::now();
        }
        inner.sync_snapshot(flow_id)?;
        let node = inner.nodes
                        .get(&flow_id)
                        .and_then(|ns| ns.iter().find(|n| n.node_id == node_id))
                        .cloned()
                        .expect("nodo existente");
        let flow = inner.flows.get(&flow_id).cloned().expect("flow existente");
        let updated = event::flow_updated(&flow);
        inner.enqueue(&updated);
        Ok(node)
    }

    fn delete_node(&self, flow_id: Uuid, node_id: &str) -> Result<(), EngineError> {
        let mut inner = self.lock();
        let nodes = inner.nodes
                         .get_mut(&flow_id)
                         .ok_or_else(|| EngineError::NotFound(format!("flow {flow_id}")))?;
        let before = nodes.len();
        nodes.retain(|n| n.node_id != node_id);
        if nodes.len() == before {
            return Err(EngineError::NotFound(format!("node '{node_id}'")));
        }
        // Cascada: las conexiones que tocan el nodo se van con él
        if let Some(connections) = inner.connections.get_mut(&flow_id) {
            connections.retain(|c| c.source_node_id != node_id && c.target_node_id != node_id);
        }
        inner.sync_snapshot(flow_id)?;
        let flow = inner.flows.get(&flow_id).cloned().expect("flow existente");
        let updated = event::flow_updated(&flow);
        inner.enqueue(&updated);
        Ok(())
    }

    fn update_node_positions(&self, flow_id: Uuid, positions: &[(String, Value)]) -> Result<(), EngineError> {
        let mut inner = self.lock();
        {
            let nodes = inner.nodes
                             .get_mut(&flow_id)
                             .ok_or_else(|| EngineError::NotFound(format!("flow {flow_id}")))?;
            for (node_id, position) in positions {
                if let Some(node) = nodes.iter_mut().find(|n| &n.node_id == node_id) {
                    node.position = position.clone();
                    node.updated_at = Utc::now();
                }
            }
        }
        inner.sync_snapshot(flow_id)?;
        let flow = inner.flows.get(&flow_id).cloned().expect("flow existente");
        let updated = event::flow_updated(&flow);
        inner.enqueue(&updated);
        Ok(())
    }

    fn add_connection(&self, flow_id: Uuid, spec: ConnectionSpec) -> Result<Connection, EngineError> {
        let mut inner = self.lock();
        if !inner.flows.contains_key(&flow_id) {
            return Err(EngineError::NotFound(format!("flow {flow_id}")));
        }
        let connection = inner.insert_connection(flow_id, spec)?;
        inner.sync_snapshot(flow_id)?;
        let flow = inner.flows.get(&flow_id).cloned().expect("flow existente");
        let updated = event::flow_updated(&flow);
        inner.enqueue(&updated);
        Ok(connection)
    }

    fn delete_connection(&self, flow_id: Uuid, connection_id: Uuid) -> Result<(), EngineError> {
        let mut inner = self.lock();
        let connections = inner.connections
                               .get_mut(&flow_id)
                               .ok_or_else(|| EngineError::NotFound(format!("flow {flow_id}")))?;
        let before = connections.len();
        connections.retain(|c| c.id != connection_id);
        if connections.len() == before {
            return Err(EngineError::NotFound(format!("connection {connection_id}")));
        }
        inner.sync_snapshot(flow_id)?;
        let flow = inner.flows.get(&flow_id).cloned().expect("flow existente");
        let updated = event::flow_updated(&flow);
        inner.enqueue(&updated);
        Ok(())
    }

    fn publish_flow(&self,
                    flow_id: Uuid,
                    published_by: Option<Uuid>,
                    new_version: Option<String>)
                    -> Result<Flow, EngineError> {
        let graph = self.flow_with_graph(flow_id)?;
        let report = validate_graph(&graph);
        if !report.is_publishable() {
            return Err(EngineError::Validation(report.errors.join("; ")));
        }
        for warning in &report.warnings {
            log::warn!("publish flow {flow_id}: {warning}");
        }

        let mut inner = self.lock();
        let flow = inner.flows
                        .get_mut(&flow_id)
                        .ok_or_else(|| EngineError::NotFound(format!("flow {flow_id}")))?;
        flow.is_published = true;
        flow.published_at = Some(Utc::now());
        flow.published_by = published_by;
        flow.version = match new_version {
            Some(version) => version,
            None => bump_minor(&flow.version),
        };
        flow.updated_at = Utc::now();
        let flow = flow.clone();
        let published = event::flow_published(&flow);
        inner.enqueue(&published);
        Ok(flow)
    }

    fn unpublish_flow(&self, flow_id: Uuid) -> Result<Flow, EngineError> {
        let mut inner = self.lock();
        let flow = inner.flows
                        .get_mut(&flow_id)
                        .ok_or_else(|| EngineError::NotFound(format!("flow {flow_id}")))?;
        flow.is_published = false;
        flow.published_at = None;
        flow.published_by = None;
        flow.updated_at = Utc::now();
        let flow = flow.clone();
        let updated = event::flow_updated(&flow);
        inner.enqueue(&updated);
        Ok(flow)
    }

    fn clone_flow(&self, source_id: Uuid, new_name: &str, new_version: &str) -> Result<Flow, EngineError> {
        let mut inner = self.lock();
        let source = inner.flows
                          .get(&source_id)
                          .cloned()
                          .ok_or_else(|| EngineError::NotFound(format!("flow {source_id}")))?;
        let source_nodes = inner.nodes.get(&source_id).cloned().unwrap_or_default();
        let source_connections = inner.connections.get(&source_id).cloned().unwrap_or_default();

        // Cascarón vacío; el snapshot se sincroniza al final
        let now = Utc::now();
        let clone = Flow { id: Uuid::new_v4(),
                           name: new_name.to_string(),
                           description: source.description.clone(),
                           version: new_version.to_string(),
                           entry_node_id: source.entry_node_id.clone(),
                           flow_data: Value::Object(serde_json::Map::new()),
                           info: source.info.clone(),
                           contract: source.contract.clone(),
                           is_published: false,
                           is_active: true,
                           trace_enabled: source.trace_enabled,
                           trace_sample_rate: source.trace_sample_rate,
                           retention_days: source.retention_days,
                           created_by: source.created_by,
                           published_by: None,
                           created_at: now,
                           updated_at: now,
                           published_at: None };
        let clone_id = clone.id;
        inner.flows.insert(clone_id, clone);

        // Copia masiva con PK frescos preservando los node_id lógicos
        let cloned_nodes: Vec<Node> = source_nodes.iter()
                                                  .map(|n| Node { id: Uuid::new_v4(),
                                                                  flow_id: clone_id,
                                                                  node_id: n.node_id.clone(),
                                                                  node_type: n.node_type,
                                                                  template: n.template.clone(),
                                                                  content: n.content.clone(),
                                                                  position: n.position.clone(),
                                                                  info: n.info.clone(),
                                                                  created_at: now,
                                                                  updated_at: now })
                                                  .collect();
        let cloned_connections: Vec<Connection> =
            source_connections.iter()
                              .map(|c| Connection { id: Uuid::new_v4(),
                                                    flow_id: clone_id,
                                                    source_node_id: c.source_node_id.clone(),
                                                    target_node_id: c.target_node_id.clone(),
                                                    connection_type: c.connection_type,
                                                    conditions: c.conditions.clone(),
                                                    info: c.info.clone(),
                                                    created_at: now })
                              .collect();
        inner.nodes.insert(clone_id, cloned_nodes);
        inner.connections.insert(clone_id, cloned_connections);

        // Si la fuente no tenía filas relacionales, preservar su snapshot
        if inner.nodes.get(&clone_id).map(|n| n.is_empty()).unwrap_or(true) {
            if let Some(flow) = inner.flows.get_mut(&clone_id) {
                flow.flow_data = source.flow_data.clone();
            }
        } else {
            inner.sync_snapshot(clone_id)?;
        }
        let flow = inner.flows.get(&clone_id).cloned().expect("clon recién insertado");
        let created = event::flow_created(&flow);
        inner.enqueue(&created);
        Ok(flow)
    }

    fn find_published_flows(&self) -> Result<Vec<Flow>, EngineError> {
        let inner = self.lock();
        let mut flows: Vec<Flow> = inner.flows
                                        .values()
                                        .filter(|f| f.is_published && f.is_active)
                                        .cloned()
                                        .collect();
        flows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(flows)
    }

    fn flow_with_graph(&self, flow_id: Uuid) -> Result<FlowGraph, EngineError> {
        let inner = self.lock();
        let flow = inner.flows
                        .get(&flow_id)
                        .cloned()
                        .ok_or_else(|| EngineError::NotFound(format!("flow {flow_id}")))?;
        Ok(FlowGraph { flow,
                       nodes: inner.nodes.get(&flow_id).cloned().unwrap_or_default(),
                       connections: inner.connections.get(&flow_id).cloned().unwrap_or_default() })
    }

    fn list_flows(&self, filter: &FlowFilter) -> Result<(Vec<Flow>, usize), EngineError> {
        let inner = self.lock();
        let mut flows: Vec<Flow> = inner.flows
                                        .values()
                                        .filter(|f| filter.published.map(|p| f.is_published == p).unwrap_or(true))
                                        .filter(|f| filter.active.map(|a| f.is_active == a).unwrap_or(true))
                                        .filter(|f| {
                                            filter.version.as_deref().map(|v| f.version == v).unwrap_or(true)
                                        })
                                        .filter(|f| match &filter.search {
                                            Some(needle) => {
                                                let needle = needle.to_lowercase();
                                                f.name.to_lowercase().contains(&needle)
                                                || f.description
                                                    .as_deref()
                                                    .map(|d| d.to_lowercase().contains(&needle))
                                                    .unwrap_or(false)
                                            }
                                            None => true,
                                        })
                                        .cloned()
                                        .collect();
        flows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let total = flows.len();
        let limit = if filter.limit == 0 { 100 } else { filter.limit };
        Ok((flows.into_iter().skip(filter.skip).take(limit).collect(), total))
    }
}
