//! `FlowAuthoring` sobre Postgres: CRUD de grafo con sincronización de
//! snapshot, publicación con bump de versión y clonado transaccional.
//!
//! La proyección/extracción de snapshots es la misma función pura del core
//! que usa el backend en memoria; acá solo se orquesta dentro de la
//! transacción y se reconstituye `flow_data` tras cada mutación de grafo.

use diesel::prelude::*;
use diesel::sql_types::Uuid as SqlUuid;
use diesel::Connection as _;
use log::warn;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::schema::{flow_connections, flow_definitions, flow_nodes};
use chat_core::errors::EngineError;
use chat_core::event;
use chat_core::model::{Connection, ConnectionSpec, Flow, FlowFilter, FlowGraph, FlowPatch, FlowSpec, Node,
                       NodePatch, NodeSpec};
use chat_core::snapshot::{extract_connections, extract_nodes, project_snapshot};
use chat_core::store::{ChatStore, FlowAuthoring};
use chat_core::validate::validate_graph;
use chat_domain::version::bump_minor;

use super::{insert_outbox_event, ConnectionRow, FlowRow, NewConnectionRow, NewFlowRow, NewNodeRow, NodeRow,
            PgChatStore};

fn load_flow(tx: &mut PgConnection, flow_id: Uuid) -> Result<Flow, PersistenceError> {
    let row: Option<FlowRow> = flow_definitions::table.find(flow_id).first(tx).optional()?;
    row.map(Flow::from).ok_or(PersistenceError::NotFound)
}

fn load_nodes(tx: &mut PgConnection, flow_id: Uuid) -> Result<Vec<Node>, PersistenceError> {
    let rows: Vec<NodeRow> = flow_nodes::table.filter(flow_nodes::flow_id.eq(flow_id))
                                              .order(flow_nodes::created_at.asc())
                                              .load(tx)?;
    Ok(rows.into_iter().map(Node::from).collect())
}

fn load_connections(tx: &mut PgConnection, flow_id: Uuid) -> Result<Vec<Connection>, PersistenceError> {
    let rows: Vec<ConnectionRow> = flow_connections::table.filter(flow_connections::flow_id.eq(flow_id))
                                                          .order(flow_connections::created_at.asc())
                                                          .load(tx)?;
    Ok(rows.into_iter().map(Connection::from).collect())
}

/// Reconstruye `flow_data` desde las filas canónicas (idempotente; preserva
/// el snapshot si no hay filas).
fn synchronize_flow_data(tx: &mut PgConnection, flow_id: Uuid) -> Result<(), PersistenceError> {
    let flow = load_flow(tx, flow_id)?;
    let nodes = load_nodes(tx, flow_id)?;
    let connections = load_connections(tx, flow_id)?;
    let snapshot = project_snapshot(&flow.flow_data, &nodes, &connections);
    diesel::update(flow_definitions::table.find(flow_id))
        .set((flow_definitions::flow_data.eq(snapshot), flow_definitions::updated_at.eq(chrono::Utc::now())))
        .execute(tx)?;
    Ok(())
}

fn insert_node(tx: &mut PgConnection, flow_id: Uuid, spec: &NodeSpec) -> Result<(), PersistenceError> {
    let position = spec.position.clone().unwrap_or_else(|| json!({"x": 0, "y": 0}));
    diesel::insert_into(flow_nodes::table).values(NewNodeRow { flow_id: &flow_id,
                                                               node_id: &spec.node_id,
                                                               node_type: spec.node_type.as_str(),
                                                               template: spec.template.as_deref(),
                                                               content: &spec.content,
                                                               position: &position,
                                                               info: &spec.info })
                                          .execute(tx)?;
    Ok(())
}

fn insert_connection(tx: &mut PgConnection, flow_id: Uuid, spec: &ConnectionSpec) -> Result<(), PersistenceError> {
    diesel::insert_into(flow_connections::table)
        .values(NewConnectionRow { flow_id: &flow_id,
                                   source_node_id: &spec.source_node_id,
                                   target_node_id: &spec.target_node_id,
                                   connection_type: spec.connection_type.as_str(),
                                   conditions: &spec.conditions,
                                   info: &spec.info })
        .execute(tx)?;
    Ok(())
}

fn emit_flow_updated(tx: &mut PgConnection, flow_id: Uuid) -> Result<Flow, PersistenceError> {
    let flow = load_flow(tx, flow_id)?;
    let updated = event::flow_updated(&flow);
    insert_outbox_event(tx, &updated)?;
    Ok(flow)
}

impl FlowAuthoring for PgChatStore {
    fn create_flow(&self, spec: FlowSpec) -> Result<Flow, EngineError> {
        let mut conn = self.conn()?;
        let flow = conn.transaction::<Flow, PersistenceError, _>(|tx| {
                           let id = Uuid::new_v4();
                           let version = if spec.version.is_empty() { "1.0.0".to_string() } else { spec.version.clone() };
                           diesel::insert_into(flow_definitions::table)
                               .values(NewFlowRow { id: &id,
                                                    name: &spec.name,
                                                    description: spec.description.as_deref(),
                                                    version: &version,
                                                    entry_node_id: &spec.entry_node_id,
                                                    flow_data: &spec.flow_data,
                                                    info: &spec.info,
                                                    contract: spec.contract.as_ref(),
                                                    trace_enabled: spec.trace_enabled,
                                                    trace_sample_rate: spec.trace_sample_rate.clamp(0, 100),
                                                    retention_days: spec.retention_days
                                                                        .unwrap_or(chat_core::constants::DEFAULT_RETENTION_DAYS),
                                                    created_by: spec.created_by.as_ref() })
                               .execute(tx)?;

                           // Materializa el grafo que venga dentro del snapshot
                           for node in extract_nodes(&spec.flow_data) {
                               insert_node(tx, id, &node)?;
                           }
                           for connection in extract_connections(&spec.flow_data) {
                               insert_connection(tx, id, &connection)?;
                           }
                           synchronize_flow_data(tx, id)?;

                           let flow = load_flow(tx, id)?;
                           let created = event::flow_created(&flow);
                           insert_outbox_event(tx, &created)?;
                           Ok(flow)
                       })?;
        Ok(flow)
    }

    fn update_flow(&self, flow_id: Uuid, patch: FlowPatch) -> Result<Flow, EngineError> {
        let mut conn = self.conn()?;
        let flow = conn.transaction::<Flow, PersistenceError, _>(|tx| {
                           // asegura NotFound antes de tocar nada
                           let _ = load_flow(tx, flow_id)?;
                           if let Some(name) = &patch.name {
                               diesel::update(flow_definitions::table.find(flow_id))
                                   .set(flow_definitions::name.eq(name))
                                   .execute(tx)?;
                           }
                           if let Some(description) = &patch.description {
                               diesel::update(flow_definitions::table.find(flow_id))
                                   .set(flow_definitions::description.eq(Some(description.clone())))
                                   .execute(tx)?;
                           }
                           if let Some(entry) = &patch.entry_node_id {
                               diesel::update(flow_definitions::table.find(flow_id))
                                   .set(flow_definitions::entry_node_id.eq(entry))
                                   .execute(tx)?;
                           }
                           if let Some(info) = &patch.info {
                               diesel::update(flow_definitions::table.find(flow_id))
                                   .set(flow_definitions::info.eq(info))
                                   .execute(tx)?;
                           }
                           if let Some(contract) = &patch.contract {
                               diesel::update(flow_definitions::table.find(flow_id))
                                   .set(flow_definitions::contract.eq(Some(contract.clone())))
                                   .execute(tx)?;
                           }
                           if let Some(active) = patch.is_active {
                               diesel::update(flow_definitions::table.find(flow_id))
                                   .set(flow_definitions::is_active.eq(active))
                                   .execute(tx)?;
                           }
                           if let Some(enabled) = patch.trace_enabled {
                               diesel::update(flow_definitions::table.find(flow_id))
                                   .set(flow_definitions::trace_enabled.eq(enabled))
                                   .execute(tx)?;
                           }
                           if let Some(rate) = patch.trace_sample_rate {
                               diesel::update(flow_definitions::table.find(flow_id))
                                   .set(flow_definitions::trace_sample_rate.eq(rate.clamp(0, 100)))
                                   .execute(tx)?;
                           }
                           if let Some(days) = patch.retention_days {
                               diesel::update(flow_definitions::table.find(flow_id))
                                   .set(flow_definitions::retention_days.eq(days))
                                   .execute(tx)?;
                           }
                           synchronize_flow_data(tx, flow_id)?;
                           emit_flow_updated(tx, flow_id)
                       })?;
        Ok(flow)
    }

    fn delete_flow(&self, flow_id: Uuid) -> Result<(), EngineError> {
        // Las sesiones se borran explícitamente primero para que el riel
        // durable reciba sus session_deleted (el trigger cubre NOTIFY).
        let session_ids: Vec<Uuid> = {
            let mut conn = self.conn()?;
            crate::schema::conversation_sessions::table
                .filter(crate::schema::conversation_sessions::flow_id.eq(flow_id))
                .select(crate::schema::conversation_sessions::id)
                .load(&mut conn)
                .map_err(PersistenceError::from)?
        };
        for session_id in session_ids {
            self.delete_session(session_id)?;
        }
        let mut conn = self.conn()?;
        let deleted = diesel::delete(flow_definitions::table.find(flow_id)).execute(&mut conn)
                                                                           .map_err(PersistenceError::from)?;
        if deleted == 0 {
            return Err(EngineError::NotFound(format!("flow {flow_id}")));
        }
        Ok(())
    }

    fn add_node(&self, flow_id: Uuid, spec: NodeSpec) -> Result<Node, EngineError> {
        let mut conn = self.conn()?;
        let node = conn.transaction::<Node, PersistenceError, _>(|tx| {
                           let _ = load_flow(tx, flow_id)?;
                           insert_node(tx, flow_id, &spec)?;
                           synchronize_flow_data(tx, flow_id)?;
                           emit_flow_updated(tx, flow_id)?;
                           let row: NodeRow = flow_nodes::table.filter(flow_nodes::flow_id.eq(flow_id))
                                                               .filter(flow_nodes::node_id.eq(&spec.node_id))
                                                               .first(tx)?;
                           Ok(Node::from(row))
                       })?;
        Ok(node)
    }

    fn update_node(&self, flow_id: Uuid, node_id: &str, patch: NodePatch) -> Result<Node, EngineError> {
        let mut conn = self.conn()?;
        let node = conn.transaction::<Node, PersistenceError, _>(|tx| {
                           let target = || {
                               flow_nodes::table.filter(flow_nodes::flow_id.eq(flow_id))
                                                .filter(flow_nodes::node_id.eq(node_id))
                           };
                           let existing: Option<NodeRow> = target().first(tx).optional()?;
                           let _ = existing.ok_or(PersistenceError::NotFound)?;
                           if let Some(node_type) = patch.node_type {
                               diesel::update(target()).set(flow_nodes::node_type.eq(node_type.as_str()))
                                                       .execute(tx)?;
                           }
                           if let Some(template) = &patch.template {
                               diesel::update(target()).set(flow_nodes::template.eq(Some(template.clone())))
                                                       .execute(tx)?;
                           }
                           if let Some(content) = &patch.content {
                               diesel::update(target()).set(flow_nodes::content.eq(content)).execute(tx)?;
                           }
                           if let Some(position) = &patch.position {
                               diesel::update(target()).set(flow_nodes::position.eq(position)).execute(tx)?;
                           }
                           if let Some(info) = &patch.info {
                               diesel::update(target()).set(flow_nodes::info.eq(info)).execute(tx)?;
                           }
                           diesel::update(target()).set(flow_nodes::updated_at.eq(chrono::Utc::now()))
                                                   .execute(tx)?;
                           synchronize_flow_data(tx, flow_id)?;
                           emit_flow_updated(tx, flow_id)?;
                           let row: NodeRow = target().first(tx)?;
                           Ok(Node::from(row))
                       })?;
        Ok(node)
    }

    fn delete_node(&self, flow_id: Uuid, node_id: &str) -> Result<(), EngineError> {
        let mut conn = self.conn()?;
        conn.transaction::<(), PersistenceError, _>(|tx| {
                // Cascada: las conexiones que tocan el nodo se van con él
                diesel::delete(flow_connections::table.filter(flow_connections::flow_id.eq(flow_id))
                                                      .filter(flow_connections::source_node_id.eq(node_id)
                                                              .or(flow_connections::target_node_id.eq(node_id))))
                    .execute(tx)?;
                let deleted = diesel::delete(flow_nodes::table.filter(flow_nodes::flow_id.eq(flow_id))
                                                              .filter(flow_nodes::node_id.eq(node_id)))
                    .execute(tx)?;
                if deleted == 0 {
                    return Err(PersistenceError::NotFound);
                }
                synchronize_flow_data(tx, flow_id)?;
                emit_flow_updated(tx, flow_id)?;
                Ok(())
            })?;
        Ok(())
    }

    fn update_node_positions(&self, flow_id: Uuid, positions: &[(String, Value)]) -> Result<(), EngineError> {
        let mut conn = self.conn()?;
        conn.transaction::<(), PersistenceError, _>(|tx| {
                for (node_id, position) in positions {
                    diesel::update(flow_nodes::table.filter(flow_nodes::flow_id.eq(flow_id))
                                                    .filter(flow_nodes::node_id.eq(node_id)))
                        .set((flow_nodes::position.eq(position), flow_nodes::updated_at.eq(chrono::Utc::now())))
                        .execute(tx)?;
                }
                synchronize_flow_data(tx, flow_id)?;
                emit_flow_updated(tx, flow_id)?;
                Ok(())
            })?;
        Ok(())
    }

    fn add_connection(&self, flow_id: Uuid, spec: ConnectionSpec) -> Result<Connection, EngineError> {
        let mut conn = self.conn()?;
        let connection = conn.transaction::<Connection, PersistenceError, _>(|tx| {
                                 let _ = load_flow(tx, flow_id)?;
                                 insert_connection(tx, flow_id, &spec)?;
                                 synchronize_flow_data(tx, flow_id)?;
                                 emit_flow_updated(tx, flow_id)?;
                                 let row: ConnectionRow =
                                     flow_connections::table.filter(flow_connections::flow_id.eq(flow_id))
                                                            .filter(flow_connections::source_node_id
                                                                    .eq(&spec.source_node_id))
                                                            .filter(flow_connections::target_node_id
                                                                    .eq(&spec.target_node_id))
                                                            .filter(flow_connections::connection_type
                                                                    .eq(spec.connection_type.as_str()))
                                                            .first(tx)?;
                                 Ok(Connection::from(row))
                             })?;
        Ok(connection)
    }

    fn delete_connection(&self, flow_id: Uuid, connection_id: Uuid) -> Result<(), EngineError> {
        let mut conn = self.conn()?;
        conn.transaction::<(), PersistenceError, _>(|tx| {
                let deleted = diesel::delete(flow_connections::table.find(connection_id)
                                                                    .filter(flow_connections::flow_id.eq(flow_id)))
                    .execute(tx)?;
                if deleted == 0 {
                    return Err(PersistenceError::NotFound);
                }
                synchronize_flow_data(tx, flow_id)?;
                emit_flow_updated(tx, flow_id)?;
                Ok(())
            })?;
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
            warn!("publish flow {flow_id}: {warning}");
        }

        let mut conn = self.conn()?;
        let flow = conn.transaction::<Flow, PersistenceError, _>(|tx| {
                           let current = load_flow(tx, flow_id)?;
                           let version = new_version.unwrap_or_else(|| bump_minor(&current.version));
                           diesel::update(flow_definitions::table.find(flow_id))
                               .set((flow_definitions::is_published.eq(true),
                                     flow_definitions::published_at.eq(Some(chrono::Utc::now())),
                                     flow_definitions::published_by.eq(published_by),
                                     flow_definitions::version.eq(version),
                                     flow_definitions::updated_at.eq(chrono::Utc::now())))
                               .execute(tx)?;
                           let flow = load_flow(tx, flow_id)?;
                           let published = event::flow_published(&flow);
                           insert_outbox_event(tx, &published)?;
                           Ok(flow)
                       })?;
        Ok(flow)
    }

    fn unpublish_flow(&self, flow_id: Uuid) -> Result<Flow, EngineError> {
        let mut conn = self.conn()?;
        let flow = conn.transaction::<Flow, PersistenceError, _>(|tx| {
                           let _ = load_flow(tx, flow_id)?;
                           diesel::update(flow_definitions::table.find(flow_id))
                               .set((flow_definitions::is_published.eq(false),
                                     flow_definitions::published_at.eq(None::<chrono::DateTime<chrono::Utc>>),
                                     flow_definitions::published_by.eq(None::<Uuid>),
                                     flow_definitions::updated_at.eq(chrono::Utc::now())))
                               .execute(tx)?;
                           emit_flow_updated(tx, flow_id)
                       })?;
        Ok(flow)
    }

    fn clone_flow(&self, source_id: Uuid, new_name: &str, new_version: &str) -> Result<Flow, EngineError> {
        let mut conn = self.conn()?;
        let flow = conn.transaction::<Flow, PersistenceError, _>(|tx| {
                           let source = load_flow(tx, source_id)?;
                           let clone_id = Uuid::new_v4();
                           let empty = Value::Object(Map::new());
                           diesel::insert_into(flow_definitions::table)
                               .values(NewFlowRow { id: &clone_id,
                                                    name: new_name,
                                                    description: source.description.as_deref(),
                                                    version: new_version,
                                                    entry_node_id: &source.entry_node_id,
                                                    flow_data: &empty,
                                                    info: &source.info,
                                                    contract: source.contract.as_ref(),
                                                    trace_enabled: source.trace_enabled,
                                                    trace_sample_rate: source.trace_sample_rate,
                                                    retention_days: source.retention_days,
                                                    created_by: source.created_by.as_ref() })
                               .execute(tx)?;

                           // Copia masiva con PK frescos, preservando los
                           // node_id lógicos y los endpoints de conexiones
                           diesel::sql_query(
                               "INSERT INTO flow_nodes (id, flow_id, node_id, node_type, template, content, position, info, created_at, updated_at) \
                                SELECT gen_random_uuid(), $1, node_id, node_type, template, content, position, info, now(), now() \
                                FROM flow_nodes WHERE flow_id = $2")
                               .bind::<SqlUuid, _>(clone_id)
                               .bind::<SqlUuid, _>(source_id)
                               .execute(tx)?;
                           diesel::sql_query(
                               "INSERT INTO flow_connections (id, flow_id, source_node_id, target_node_id, connection_type, conditions, info, created_at) \
                                SELECT gen_random_uuid(), $1, source_node_id, target_node_id, connection_type, conditions, info, now() \
                                FROM flow_connections WHERE flow_id = $2")
                               .bind::<SqlUuid, _>(clone_id)
                               .bind::<SqlUuid, _>(source_id)
                               .execute(tx)?;

                           // Sin filas relacionales en la fuente, preservar su snapshot
                           let cloned_nodes = load_nodes(tx, clone_id)?;
                           if cloned_nodes.is_empty() {
                               diesel::update(flow_definitions::table.find(clone_id))
                                   .set(flow_definitions::flow_data.eq(&source.flow_data))
                                   .execute(tx)?;
                           } else {
                               synchronize_flow_data(tx, clone_id)?;
                           }

                           let flow = load_flow(tx, clone_id)?;
                           let created = event::flow_created(&flow);
                           insert_outbox_event(tx, &created)?;
                           Ok(flow)
                       })?;
        Ok(flow)
    }

    fn find_published_flows(&self) -> Result<Vec<Flow>, EngineError> {
        let mut conn = self.conn()?;
        let rows: Vec<FlowRow> = flow_definitions::table.filter(flow_definitions::is_published.eq(true))
                                                        .filter(flow_definitions::is_active.eq(true))
                                                        .order(flow_definitions::updated_at.desc())
                                                        .load(&mut conn)
                                                        .map_err(PersistenceError::from)?;
        Ok(rows.into_iter().map(Flow::from).collect())
    }

    fn flow_with_graph(&self, flow_id: Uuid) -> Result<FlowGraph, EngineError> {
        let mut conn = self.conn()?;
        let flow = load_flow(&mut conn, flow_id)
            .map_err(|_| EngineError::NotFound(format!("flow {flow_id}")))?;
        let nodes = load_nodes(&mut conn, flow_id)?;
        let connections = load_connections(&mut conn, flow_id)?;
        Ok(FlowGraph { flow, nodes, connections })
    }

    fn list_flows(&self, filter: &FlowFilter) -> Result<(Vec<Flow>, usize), EngineError> {
        let mut conn = self.conn()?;
        let build = |filter: &FlowFilter| {
            let mut query = flow_definitions::table.into_boxed();
            if let Some(published) = filter.published {
                query = query.filter(flow_definitions::is_published.eq(published));
            }
            if let Some(active) = filter.active {
                query = query.filter(flow_definitions::is_active.eq(active));
            }
            if let Some(version) = &filter.version {
                query = query.filter(flow_definitions::version.eq(version.clone()));
            }
            if let Some(search) = &filter.search {
                let pattern = format!("%{search}%");
                query = query.filter(flow_definitions::name.ilike(pattern.clone())
                                     .or(flow_definitions::description.ilike(pattern)));
            }
            query
        };

        let rows: Vec<FlowRow> = build(filter).order(flow_definitions::updated_at.desc())
                                              .load(&mut conn)
                                              .map_err(PersistenceError::from)?;
        let total = rows.len();
        let limit = if filter.limit == 0 { 100 } else { filter.limit };
        let page = rows.into_iter().skip(filter.skip).take(limit).map(Flow::from).collect();
        Ok((page, total))
    }
}
