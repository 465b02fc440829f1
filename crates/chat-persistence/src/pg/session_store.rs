//! `ChatStore` sobre Postgres: sesiones, historial, traza y outbox.
//!
//! `commit_tick` ejecuta mutación + historial + paso de traza + eventos como
//! UNA transacción Diesel, con la política de revisiones compartida del core
//! (paridad con el backend en memoria). El trigger `notify_flow_event` cubre
//! el riel NOTIFY; aquí solo se insertan las filas del riel durable.

use chrono::Utc;
use diesel::prelude::*;
use diesel::Connection as _;
use log::debug;
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::schema::{conversation_history, conversation_sessions, flow_connections, flow_definitions,
                    flow_execution_steps, flow_nodes, trace_access_audit};
use chat_core::concurrency::{resolve_revision_conflict, RevisionDecision};
use chat_core::errors::EngineError;
use chat_core::event::{self, DomainEvent};
use chat_core::model::{Connection, ExecutionStep, Flow, Interaction, NewExecutionStep, NewInteraction, NewSession,
                       NewTraceAccess, Node, Session, SessionFilter, SessionSummary};
use chat_core::store::{ChatStore, SessionUpdate, UpdateOutcome};
use chat_domain::hashing::state_hash;
use chat_domain::types::SessionStatus;

use super::{insert_outbox_event, load_session, ConnectionRow, FlowRow, InteractionRow, NewInteractionRow,
            NewSessionRow, NewStepRow, NodeRow, PgChatStore, SessionRow, StepRow};

fn apply_session_update(tx: &mut PgConnection,
                        old: &Session,
                        update: &SessionUpdate)
                        -> Result<Session, PersistenceError> {
    let hash = state_hash(&update.new_state);
    diesel::update(conversation_sessions::table.find(update.session_id))
        .set((conversation_sessions::state.eq(&update.new_state),
              conversation_sessions::state_hash.eq(Some(hash)),
              conversation_sessions::revision.eq(old.revision + 1),
              conversation_sessions::last_activity_at.eq(Utc::now())))
        .execute(tx)?;
    if let Some(node_id) = &update.current_node_id {
        diesel::update(conversation_sessions::table.find(update.session_id))
            .set(conversation_sessions::current_node_id.eq(Some(node_id.as_str())))
            .execute(tx)?;
    }
    load_session(tx, update.session_id)?.ok_or(PersistenceError::NotFound)
}

fn insert_interactions(tx: &mut PgConnection,
                       session_id: Uuid,
                       interactions: &[NewInteraction])
                       -> Result<(), PersistenceError> {
    for interaction in interactions {
        diesel::insert_into(conversation_history::table)
            .values(NewInteractionRow { session_id: &session_id,
                                        node_id: &interaction.node_id,
                                        interaction_type: interaction.interaction_type.as_str(),
                                        content: &interaction.content })
            .execute(tx)?;
    }
    Ok(())
}

fn insert_step(tx: &mut PgConnection, step: &NewExecutionStep) -> Result<(), PersistenceError> {
    // Idempotente por (session_id, step_number): un append reintentado no
    // duplica el paso
    diesel::insert_into(flow_execution_steps::table)
        .values(NewStepRow { session_id: &step.session_id,
                             step_number: step.step_number,
                             node_id: &step.node_id,
                             node_type: &step.node_type,
                             state_before: &step.state_before,
                             state_after: &step.state_after,
                             execution_details: &step.execution_details,
                             connection_type: step.connection_type.as_deref(),
                             next_node_id: step.next_node_id.as_deref(),
                             started_at: step.started_at,
                             completed_at: step.completed_at,
                             duration_ms: step.duration_ms,
                             error_message: step.error_message.as_deref(),
                             error_details: step.error_details.as_ref() })
        .on_conflict_do_nothing()
        .execute(tx)?;
    Ok(())
}

impl ChatStore for PgChatStore {
    fn flow(&self, flow_id: Uuid) -> Result<Flow, EngineError> {
        let mut conn = self.conn()?;
        let row: Option<FlowRow> = flow_definitions::table.find(flow_id)
                                                          .first(&mut conn)
                                                          .optional()
                                                          .map_err(PersistenceError::from)?;
        row.map(Flow::from).ok_or_else(|| EngineError::NotFound(format!("flow {flow_id}")))
    }

    fn node(&self, flow_id: Uuid, node_id: &str) -> Result<Node, EngineError> {
        let mut conn = self.conn()?;
        let row: Option<NodeRow> = flow_nodes::table.filter(flow_nodes::flow_id.eq(flow_id))
                                                    .filter(flow_nodes::node_id.eq(node_id))
                                                    .first(&mut conn)
                                                    .optional()
                                                    .map_err(PersistenceError::from)?;
        row.map(Node::from)
           .ok_or_else(|| EngineError::NotFound(format!("node '{node_id}' in flow {flow_id}")))
    }

    fn connections_from(&self, flow_id: Uuid, source_node_id: &str) -> Result<Vec<Connection>, EngineError> {
        let mut conn = self.conn()?;
        let rows: Vec<ConnectionRow> = flow_connections::table.filter(flow_connections::flow_id.eq(flow_id))
                                                              .filter(flow_connections::source_node_id.eq(source_node_id))
                                                              .order((flow_connections::created_at.asc(),
                                                                      flow_connections::id.asc()))
                                                              .load(&mut conn)
                                                              .map_err(PersistenceError::from)?;
        Ok(rows.into_iter().map(Connection::from).collect())
    }

    fn create_session(&self, new: NewSession) -> Result<Session, EngineError> {
        let mut conn = self.conn()?;
        let session = conn.transaction::<Session, PersistenceError, _>(|tx| {
                              let hash = state_hash(&new.state);
                              diesel::insert_into(conversation_sessions::table)
                                  .values(NewSessionRow { flow_id: &new.flow_id,
                                                          user_id: new.user_id.as_ref(),
                                                          session_token: &new.session_token,
                                                          current_node_id: new.current_node_id.as_deref(),
                                                          state: &new.state,
                                                          info: &new.info,
                                                          status: SessionStatus::Active.as_str(),
                                                          revision: 1,
                                                          trace_enabled: new.trace_enabled,
                                                          trace_level: new.trace_level.as_str(),
                                                          state_hash: Some(hash.as_str()) })
                                  .execute(tx)?;
                              let row: SessionRow =
                                  conversation_sessions::table.filter(conversation_sessions::session_token
                                                                          .eq(&new.session_token))
                                                              .first(tx)?;
                              let session = Session::from(row);
                              let started = event::session_started(&session);
                              insert_outbox_event(tx, &started)?;
                              Ok(session)
                          })?;
        debug!("session created id={} token={}", session.id, session.session_token);
        Ok(session)
    }

    fn session_by_token(&self, token: &str) -> Result<Option<Session>, EngineError> {
        let mut conn = self.conn()?;
        let row: Option<SessionRow> = conversation_sessions::table.filter(conversation_sessions::session_token.eq(token))
                                                                  .first(&mut conn)
                                                                  .optional()
                                                                  .map_err(PersistenceError::from)?;
        Ok(row.map(Session::from))
    }

    fn session_by_id(&self, session_id: Uuid) -> Result<Option<Session>, EngineError> {
        let mut conn = self.conn()?;
        Ok(load_session(&mut conn, session_id)?)
    }

    fn sessions_for_user(&self, user_id: Uuid, active_only: bool) -> Result<Vec<Session>, EngineError> {
        let mut conn = self.conn()?;
        let mut query = conversation_sessions::table.filter(conversation_sessions::user_id.eq(user_id))
                                                    .into_boxed();
        if active_only {
            query = query.filter(conversation_sessions::status.eq(SessionStatus::Active.as_str()));
        }
        let rows: Vec<SessionRow> = query.order(conversation_sessions::started_at.asc())
                                         .load(&mut conn)
                                         .map_err(PersistenceError::from)?;
        Ok(rows.into_iter().map(Session::from).collect())
    }

    fn commit_tick(&self,
                   update: &SessionUpdate,
                   interactions: &[NewInteraction],
                   step: Option<&NewExecutionStep>)
                   -> Result<UpdateOutcome, EngineError> {
        let mut conn = self.conn()?;
        let outcome = conn.transaction::<UpdateOutcome, PersistenceError, _>(|tx| {
                              let old = load_session(tx, update.session_id)?.ok_or(PersistenceError::NotFound)?;

                              if let RevisionDecision::Reject(reason) =
                                  resolve_revision_conflict(&old, update.expected_revision, update.user_initiated)
                              {
                                  return Ok(UpdateOutcome::Rejected { current: old, reason });
                              }

                              let updated = apply_session_update(tx, &old, update)?;
                              insert_interactions(tx, update.session_id, interactions)?;
                              if let Some(step) = step {
                                  insert_step(tx, step)?;
                              }
                              for event in event::session_updated_events(&old, &updated) {
                                  insert_outbox_event(tx, &event)?;
                              }
                              Ok(UpdateOutcome::Applied(updated))
                          })?;
        Ok(outcome)
    }

    fn touch_session(&self, session_id: Uuid) -> Result<(), EngineError> {
        let mut conn = self.conn()?;
        let changed = diesel::update(conversation_sessions::table.find(session_id))
            .set(conversation_sessions::last_activity_at.eq(Utc::now()))
            .execute(&mut conn)
            .map_err(PersistenceError::from)?;
        if changed == 0 {
            return Err(EngineError::NotFound(format!("session {session_id}")));
        }
        Ok(())
    }

    fn end_session(&self, session_id: Uuid, status: SessionStatus) -> Result<Session, EngineError> {
        let mut conn = self.conn()?;
        let session = conn.transaction::<Session, PersistenceError, _>(|tx| {
                              let old = load_session(tx, session_id)?.ok_or(PersistenceError::NotFound)?;
                              // Idempotente sobre estados terminales
                              if old.status.is_terminal() {
                                  return Ok(old);
                              }
                              diesel::update(conversation_sessions::table.find(session_id))
                                  .set((conversation_sessions::status.eq(status.as_str()),
                                        conversation_sessions::ended_at.eq(Some(Utc::now())),
                                        conversation_sessions::last_activity_at.eq(Utc::now())))
                                  .execute(tx)?;
                              let updated = load_session(tx, session_id)?.ok_or(PersistenceError::NotFound)?;
                              for event in event::session_updated_events(&old, &updated) {
                                  insert_outbox_event(tx, &event)?;
                              }
                              Ok(updated)
                          })?;
        Ok(session)
    }

    fn delete_session(&self, session_id: Uuid) -> Result<(), EngineError> {
        let mut conn = self.conn()?;
        conn.transaction::<(), PersistenceError, _>(|tx| {
                if let Some(session) = load_session(tx, session_id)? {
                    let deleted = event::session_deleted(&session);
                    insert_outbox_event(tx, &deleted)?;
                    diesel::delete(conversation_sessions::table.find(session_id)).execute(tx)?;
                }
                Ok(())
            })?;
        Ok(())
    }

    fn add_interaction(&self, session_id: Uuid, interaction: &NewInteraction) -> Result<(), EngineError> {
        let mut conn = self.conn()?;
        insert_interactions(&mut conn, session_id, std::slice::from_ref(interaction))?;
        Ok(())
    }

    fn history(&self,
               session_id: Uuid,
               limit: Option<usize>,
               offset: Option<usize>)
               -> Result<Vec<Interaction>, EngineError> {
        let mut conn = self.conn()?;
        let mut query = conversation_history::table.filter(conversation_history::session_id.eq(session_id))
                                                   .order(conversation_history::created_at.asc())
                                                   .into_boxed();
        if let Some(offset) = offset {
            query = query.offset(offset as i64);
        }
        if let Some(limit) = limit {
            query = query.limit(limit as i64);
        }
        let rows: Vec<InteractionRow> = query.load(&mut conn).map_err(PersistenceError::from)?;
        Ok(rows.into_iter().map(Interaction::from).collect())
    }

    fn next_step_number(&self, session_id: Uuid) -> Result<i32, EngineError> {
        let mut conn = self.conn()?;
        let max: Option<i32> = flow_execution_steps::table.filter(flow_execution_steps::session_id.eq(session_id))
                                                          .select(diesel::dsl::max(flow_execution_steps::step_number))
                                                          .first(&mut conn)
                                                          .map_err(PersistenceError::from)?;
        Ok(max.unwrap_or(0) + 1)
    }

    fn record_step(&self, step: &NewExecutionStep) -> Result<(), EngineError> {
        let mut conn = self.conn()?;
        insert_step(&mut conn, step)?;
        Ok(())
    }

    fn session_steps(&self, session_id: Uuid) -> Result<Vec<ExecutionStep>, EngineError> {
        let mut conn = self.conn()?;
        let rows: Vec<StepRow> = flow_execution_steps::table.filter(flow_execution_steps::session_id.eq(session_id))
                                                            .order(flow_execution_steps::step_number.asc())
                                                            .load(&mut conn)
                                                            .map_err(PersistenceError::from)?;
        Ok(rows.into_iter().map(ExecutionStep::from).collect())
    }

    fn log_trace_access(&self, access: &NewTraceAccess) -> Result<(), EngineError> {
        let mut conn = self.conn()?;
        diesel::insert_into(trace_access_audit::table)
            .values(super::NewAuditRow { session_id: &access.session_id,
                                         accessed_by: access.accessed_by.as_ref(),
                                         access_type: &access.access_type,
                                         ip_address: access.ip_address.as_deref(),
                                         user_agent: access.user_agent.as_deref(),
                                         data_accessed: access.data_accessed.as_ref() })
            .execute(&mut conn)
            .map_err(PersistenceError::from)?;
        Ok(())
    }

    fn list_flow_sessions(&self, flow_id: Uuid, filter: &SessionFilter) -> Result<Vec<SessionSummary>, EngineError> {
        let mut conn = self.conn()?;
        let mut query = conversation_sessions::table.filter(conversation_sessions::flow_id.eq(flow_id))
                                                    .order(conversation_sessions::started_at.desc())
                                                    .into_boxed();
        if let Some(status) = filter.status {
            query = query.filter(conversation_sessions::status.eq(status.as_str()));
        }
        if let Some(user_id) = filter.user_id {
            query = query.filter(conversation_sessions::user_id.eq(user_id));
        }
        if let Some(from) = filter.from {
            query = query.filter(conversation_sessions::started_at.ge(from));
        }
        if let Some(to) = filter.to {
            query = query.filter(conversation_sessions::started_at.le(to));
        }
        let limit = if filter.limit == 0 { 20 } else { filter.limit };
        let rows: Vec<SessionRow> = query.offset(filter.offset as i64)
                                         .limit(limit as i64)
                                         .load(&mut conn)
                                         .map_err(PersistenceError::from)?;

        let mut items = Vec::new();
        for row in rows {
            let session = Session::from(row);
            let steps: Vec<StepRow> =
                flow_execution_steps::table.filter(flow_execution_steps::session_id.eq(session.id))
                                           .order(flow_execution_steps::step_number.asc())
                                           .load(&mut conn)
                                           .map_err(PersistenceError::from)?;
            let error_count = steps.iter().filter(|s| s.error_message.is_some()).count() as i64;
            let has_errors = error_count > 0;
            // filtro por errores se aplica post-query (depende de la traza)
            if let Some(wanted) = filter.has_errors {
                if wanted != has_errors {
                    continue;
                }
            }
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
                                        path_summary: steps.iter()
                                                           .take(10)
                                                           .map(|s| s.node_id.clone())
                                                           .collect() });
        }
        Ok(items)
    }

    fn enqueue_event(&self, event: &DomainEvent) -> Result<(), EngineError> {
        let mut conn = self.conn()?;
        insert_outbox_event(&mut conn, event)?;
        Ok(())
    }
}
