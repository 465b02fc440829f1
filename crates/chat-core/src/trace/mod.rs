//! Tracer de ejecución: sampling por flujo, enmascaramiento de PII,
//! ingesta directa o en buffer y auditoría de lecturas.
//!
//! Decisión de sampling por sesión (determinista sobre el token):
//! `trace_enabled=false` → off; `sample_rate >= 100` → on; si no,
//! `hash(token) mod 100 < sample_rate`. La decisión se congela al crear la
//! sesión (campo `trace_enabled` de la sesión).

pub mod details;

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::constants::TRACE_BUFFER_SIZE;
use crate::errors::EngineError;
use crate::model::{Flow, NewExecutionStep, NewTraceAccess};
use crate::store::ChatStore;
use chat_domain::hashing::sample_bucket;
use chat_domain::pii::PiiMasker;
use chat_domain::types::TraceLevel;

/// Reporte completo de traza de una sesión.
#[derive(Debug, Clone)]
pub struct TraceReport {
    pub session: Value,
    pub steps: Vec<Value>,
    pub total_steps: usize,
    pub total_duration_ms: i64,
}

/// Identidad del lector de una traza, para la auditoría.
#[derive(Debug, Clone, Default)]
pub struct TraceAccessContext {
    pub accessed_by: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Tracer con buffer opcional (hasta 10 registros o flush al terminar la
/// sesión). La ruta directa commitea un registro por llamada.
pub struct ExecutionTracer {
    masker: PiiMasker,
    buffered: bool,
    buffer: Mutex<Vec<NewExecutionStep>>,
    counters: Mutex<HashMap<Uuid, i32>>,
}

impl Default for ExecutionTracer {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ExecutionTracer {
    pub fn new(buffered: bool) -> Self {
        Self { masker: PiiMasker::new(),
               buffered,
               buffer: Mutex::new(Vec::new()),
               counters: Mutex::new(HashMap::new()) }
    }

    /// ¿La ingesta es batched? (El runtime decide si el paso viaja dentro de
    /// la transacción del commit o después, vía buffer.)
    pub fn is_buffered(&self) -> bool {
        self.buffered
    }

    /// Decide si una sesión nueva se traza, según config del flujo y el
    /// bucket determinista del token.
    pub fn should_trace(&self, flow: &Flow, session_token: &str) -> bool {
        if !flow.trace_enabled {
            return false;
        }
        if flow.trace_sample_rate >= 100 {
            return true;
        }
        if flow.trace_sample_rate <= 0 {
            return false;
        }
        (sample_bucket(session_token) as i32) < flow.trace_sample_rate
    }

    /// Nivel de traza para sesiones del flujo (`info.trace_level`, default
    /// standard).
    pub fn trace_level_for(&self, flow: &Flow) -> TraceLevel {
        flow.info
            .get("trace_level")
            .and_then(Value::as_str)
            .and_then(TraceLevel::parse)
            .unwrap_or(TraceLevel::Standard)
    }

    /// Número de paso siguiente, contando también lo que espera en buffer.
    pub fn next_step_number<S: ChatStore>(&self, store: &S, session_id: Uuid) -> Result<i32, EngineError> {
        let stored = store.next_step_number(session_id)?;
        let mut counters = self.counters.lock().expect("trace counters mutex poisoned");
        let next = (*counters.get(&session_id).unwrap_or(&0) + 1).max(stored);
        counters.insert(session_id, next);
        Ok(next)
    }

    /// Construye un paso con los estados ya enmascarados.
    #[allow(clippy::too_many_arguments)]
    pub fn build_step(&self,
                      session_id: Uuid,
                      step_number: i32,
                      node_id: &str,
                      node_type: &str,
                      state_before: &Value,
                      state_after: &Value,
                      execution_details: Value,
                      connection_type: Option<String>,
                      next_node_id: Option<String>,
                      started_at: chrono::DateTime<chrono::Utc>,
                      duration_ms: i64,
                      error_message: Option<String>,
                      error_details: Option<Value>)
                      -> NewExecutionStep {
        NewExecutionStep { session_id,
                           step_number,
                           node_id: node_id.to_string(),
                           node_type: node_type.to_string(),
                           state_before: self.masker.mask_state(state_before),
                           state_after: self.masker.mask_state(state_after),
                           execution_details,
                           connection_type,
                           next_node_id,
                           started_at,
                           completed_at: Some(chrono::Utc::now()),
                           duration_ms: Some(duration_ms),
                           error_message,
                           error_details }
    }

    /// Registra un paso: directo, o al buffer si la ingesta es batched.
    /// `session_ending` fuerza el flush para garantizar durabilidad antes de
    /// reportar la sesión terminal.
    pub fn record<S: ChatStore>(&self,
                                store: &S,
                                step: NewExecutionStep,
                                session_ending: bool)
                                -> Result<(), EngineError> {
        if !self.buffered {
            return store.record_step(&step);
        }
        let should_flush = {
            let mut buffer = self.buffer.lock().expect("trace buffer mutex poisoned");
            buffer.push(step);
            buffer.len() >= TRACE_BUFFER_SIZE || session_ending
        };
        if should_flush {
            self.flush(store)?;
        }
        Ok(())
    }

    /// Vacía el buffer hacia el store.
    pub fn flush<S: ChatStore>(&self, store: &S) -> Result<(), EngineError> {
        let drained: Vec<NewExecutionStep> = {
            let mut buffer = self.buffer.lock().expect("trace buffer mutex poisoned");
            buffer.drain(..).collect()
        };
        for step in &drained {
            store.record_step(step)?;
        }
        Ok(())
    }

    /// Lee la traza completa de una sesión, registrando la auditoría
    /// (`view_trace`) en el mismo acceso.
    pub fn get_session_trace<S: ChatStore>(&self,
                                           store: &S,
                                           session_id: Uuid,
                                           access: &TraceAccessContext)
                                           -> Result<TraceReport, EngineError> {
        let session = store.session_by_id(session_id)?
                           .ok_or_else(|| EngineError::NotFound(format!("session {session_id}")))?;
        let steps = store.session_steps(session_id)?;

        store.log_trace_access(&NewTraceAccess { session_id,
                                                 accessed_by: access.accessed_by,
                                                 access_type: "view_trace".to_string(),
                                                 ip_address: access.ip_address.clone(),
                                                 user_agent: access.user_agent.clone(),
                                                 data_accessed: Some(json!({"steps": steps.len()})) })?;

        let total_duration_ms: i64 = steps.iter().filter_map(|s| s.duration_ms).sum();
        let rendered: Vec<Value> = steps.iter()
                                        .map(|s| {
                                            json!({
                                                "id": s.id.to_string(),
                                                "step_number": s.step_number,
                                                "node_id": s.node_id,
                                                "node_type": s.node_type,
                                                "state_before": s.state_before,
                                                "state_after": s.state_after,
                                                "execution_details": s.execution_details,
                                                "connection_type": s.connection_type,
                                                "next_node_id": s.next_node_id,
                                                "duration_ms": s.duration_ms,
                                                "error_message": s.error_message,
                                                "error_details": s.error_details,
                                            })
                                        })
                                        .collect();

        Ok(TraceReport { session: json!({
                             "id": session.id.to_string(),
                             "session_token": session.session_token,
                             "user_id": session.user_id.map(|u| u.to_string()),
                             "flow_id": session.flow_id.to_string(),
                             "status": session.status.as_str(),
                             "started_at": session.started_at.to_rfc3339(),
                             "ended_at": session.ended_at.map(|t| t.to_rfc3339()),
                         }),
                         total_steps: rendered.len(),
                         steps: rendered,
                         total_duration_ms })
    }
}
