//! Eventos de dominio para los dos rieles de despacho (NOTIFY + outbox).
//!
//! Ambos rieles transportan el mismo schema JSON: `event_type`, ids,
//! nodo/estado previos y nuevos, `revision`/`previous_revision` y un
//! `timestamp` epoch. Este módulo es la única fuente de esos payloads para
//! que los backends (memoria y Postgres) mantengan paridad, incluida la
//! regla de supresión: un update que solo toca `last_activity_at` no emite
//! nada.

use chrono::Utc;
use serde_json::{json, Value};

use crate::constants::DEFAULT_EVENT_CHANNEL;
use crate::model::{Flow, Session};

/// Evento pendiente de despacho: se inserta al outbox en la misma
/// transacción que el cambio que lo origina.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    pub event_type: String,
    pub payload: Value,
    pub destination: String,
    pub priority: String,
}

impl DomainEvent {
    fn new(event_type: &str, payload: Value) -> Self {
        Self { event_type: event_type.to_string(),
               payload,
               destination: DEFAULT_EVENT_CHANNEL.to_string(),
               priority: "normal".to_string() }
    }
}

fn base_session_payload(event_type: &str, session: &Session) -> Value {
    json!({
        "event_type": event_type,
        "session_id": session.id.to_string(),
        "flow_id": session.flow_id.to_string(),
        "user_id": session.user_id.map(|u| u.to_string()),
        "current_node": session.current_node_id,
        "status": session.status.as_str(),
        "revision": session.revision,
        "timestamp": Utc::now().timestamp(),
    })
}

/// Evento de alta de sesión (INSERT).
pub fn session_started(session: &Session) -> DomainEvent {
    DomainEvent::new("session_started", base_session_payload("session_started", session))
}

/// Evento de borrado de sesión.
pub fn session_deleted(session: &Session) -> DomainEvent {
    DomainEvent::new("session_deleted", base_session_payload("session_deleted", session))
}

/// Eventos derivados de un UPDATE de sesión.
///
/// Prioridad: cambio de status > cambio de nodo > cambio de estado/revision.
/// Si solo cambió `last_activity_at` no se emite nada (supresión de ruido).
pub fn session_updated_events(old: &Session, new: &Session) -> Vec<DomainEvent> {
    let status_changed = old.status != new.status;
    let node_changed = old.current_node_id != new.current_node_id;
    let revision_changed = old.revision != new.revision;

    if !status_changed && !node_changed && !revision_changed {
        return Vec::new();
    }

    let (event_type, mut payload) = if status_changed {
        ("session_status_changed", base_session_payload("session_status_changed", new))
    } else if node_changed {
        ("node_changed", base_session_payload("node_changed", new))
    } else {
        ("session_updated", base_session_payload("session_updated", new))
    };

    if let Some(map) = payload.as_object_mut() {
        map.insert("previous_node".into(), json!(old.current_node_id));
        map.insert("previous_status".into(), json!(old.status.as_str()));
        map.insert("previous_revision".into(), json!(old.revision));
    }
    vec![DomainEvent::new(event_type, payload)]
}

fn flow_payload(event_type: &str, flow: &Flow) -> Value {
    json!({
        "event_type": event_type,
        "flow_id": flow.id.to_string(),
        "name": flow.name,
        "version": flow.version,
        "is_published": flow.is_published,
        "timestamp": Utc::now().timestamp(),
    })
}

pub fn flow_created(flow: &Flow) -> DomainEvent {
    DomainEvent::new("flow_created", flow_payload("flow_created", flow))
}

pub fn flow_updated(flow: &Flow) -> DomainEvent {
    DomainEvent::new("flow_updated", flow_payload("flow_updated", flow))
}

pub fn flow_published(flow: &Flow) -> DomainEvent {
    DomainEvent::new("flow_published", flow_payload("flow_published", flow))
}
