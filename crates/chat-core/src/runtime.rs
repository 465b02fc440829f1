//! Runtime de sesiones: la máquina de estados que avanza una sesión nodo a
//! nodo bajo su advisory lock.
//!
//! Estados por tick: STEPPING → (SUSPENDED_ON_INPUT | TERMINAL). Un tick
//! procesa cero o más nodos no bloqueantes y a lo sumo un nodo que suspende
//! (question sin input pendiente). Dentro del tick el estado es consistente
//! porque el lock se mantiene hasta el último commit.
//!
//! Política de errores (taxonomía §errores): las excepciones de procesador
//! se registran en el paso y se sigue por la arista failure si existe, si no
//! default; sin ninguna de las dos la sesión pasa a ABANDONED.

use chrono::Utc;
use log::{debug, warn};
use serde_json::{json, Map, Value};

use crate::concurrency::{default_lock_timeout, ConcurrencyController};
use crate::constants::MAX_STEPS_PER_TICK;
use crate::effects::{HttpExecutor, InternalApiHandler, NoInternalHandlers, ScriptExecutor, UnconfiguredHttp,
                     UnconfiguredScripts};
use crate::errors::EngineError;
use crate::model::{Connection, EmittedMessage, NewInteraction, NewSession, Node, Session, StepResult, UserInput};
use crate::processor::{process_node, NodeResolver, ProcessEnv};
use crate::store::{ChatStore, SessionUpdate, UpdateOutcome};
use crate::trace::ExecutionTracer;
use chat_domain::hashing::new_session_token;
use chat_domain::state::{deep_merge, ensure_roots, get_path};
use chat_domain::types::{ConnectionType, InputKind, InteractionType, NodeType, SessionStatus};
use uuid::Uuid;

/// Resultado de un tick para el caller.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// La sesión quedó suspendida esperando input del usuario.
    AwaitingInput {
        session: Session,
        messages: Vec<EmittedMessage>,
        prompt: Option<Value>,
        input_type: InputKind,
    },
    /// El flujo llegó a su fin (status COMPLETED).
    Completed { session: Session, messages: Vec<EmittedMessage> },
    /// El flujo no pudo continuar (status ABANDONED).
    Abandoned {
        session: Session,
        messages: Vec<EmittedMessage>,
        error: String,
    },
}

impl TickOutcome {
    pub fn session(&self) -> &Session {
        match self {
            TickOutcome::AwaitingInput { session, .. } => session,
            TickOutcome::Completed { session, .. } => session,
            TickOutcome::Abandoned { session, .. } => session,
        }
    }

    pub fn messages(&self) -> &[EmittedMessage] {
        match self {
            TickOutcome::AwaitingInput { messages, .. } => messages,
            TickOutcome::Completed { messages, .. } => messages,
            TickOutcome::Abandoned { messages, .. } => messages,
        }
    }
}

/// Transición resuelta tras procesar un nodo.
enum Transition {
    Next(Connection),
    Completed,
    Abandoned(String),
}

/// Elige la primera conexión del tipo pedido en orden de creación
/// (determinismo ante duplicados, que la publicación de todos modos
/// rechaza).
fn pick<'a>(connections: &'a [Connection], kind: ConnectionType) -> Option<&'a Connection> {
    connections.iter().find(|c| c.connection_type == kind)
}

fn resolve_transition(connections: &[Connection], result: &StepResult) -> Transition {
    if result.terminate {
        return Transition::Completed;
    }
    if result.success {
        let wanted = result.connection.unwrap_or(ConnectionType::Default);
        if let Some(conn) = pick(connections, wanted).or_else(|| pick(connections, ConnectionType::Default)) {
            return Transition::Next(conn.clone());
        }
        Transition::Completed
    } else {
        // Error: failure si existe, si no default; sin salidas → abandonar
        if let Some(conn) =
            pick(connections, ConnectionType::Failure).or_else(|| pick(connections, ConnectionType::Default))
        {
            return Transition::Next(conn.clone());
        }
        Transition::Abandoned(result.errors.join("; "))
    }
}

struct StoreResolver<'a, S: ChatStore> {
    store: &'a S,
    flow_id: Uuid,
}

impl<'a, S: ChatStore> NodeResolver for StoreResolver<'a, S> {
    fn resolve(&self, node_id: &str) -> Result<Node, EngineError> {
        self.store.node(self.flow_id, node_id)
    }
}

/// Motor de ejecución de sesiones sobre un par store + controlador.
pub struct ChatRuntime<S, C> {
    store: S,
    controller: C,
    tracer: ExecutionTracer,
    http: Box<dyn HttpExecutor>,
    scripts: Box<dyn ScriptExecutor>,
    internal: Box<dyn InternalApiHandler>,
}

impl<S, C> ChatRuntime<S, C>
    where S: ChatStore,
          C: ConcurrencyController
{
    /// Runtime sin efectos configurados (suficiente para flujos de
    /// mensajes/preguntas/condiciones/acciones puras).
    pub fn new(store: S, controller: C) -> Self {
        Self { store,
               controller,
               tracer: ExecutionTracer::default(),
               http: Box::new(UnconfiguredHttp),
               scripts: Box::new(UnconfiguredScripts),
               internal: Box::new(NoInternalHandlers) }
    }

    pub fn with_http(mut self, http: Box<dyn HttpExecutor>) -> Self {
        self.http = http;
        self
    }

    pub fn with_scripts(mut self, scripts: Box<dyn ScriptExecutor>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn with_internal(mut self, internal: Box<dyn InternalApiHandler>) -> Self {
        self.internal = internal;
        self
    }

    pub fn with_tracer(mut self, tracer: ExecutionTracer) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn tracer(&self) -> &ExecutionTracer {
        &self.tracer
    }

    /// Valida el contrato declarado del flujo contra el estado inicial.
    fn check_contract(flow_contract: &Option<Value>, state: &Value) -> Result<(), EngineError> {
        let Some(contract) = flow_contract else { return Ok(()) };
        let requires = contract.get("requires").and_then(Value::as_array).cloned().unwrap_or_default();
        for path in requires.iter().filter_map(Value::as_str) {
            let present = get_path(state, path).map(|v| !v.is_null()).unwrap_or(false);
            if !present {
                return Err(EngineError::Validation(format!("flow contract requires state path '{path}'")));
            }
        }
        Ok(())
    }

    /// Crea una sesión y ejecuta el primer tick.
    ///
    /// Estado inicial = `flow.info.initial_state` (si existe) + raíces
    /// reservadas + `initial_context` bajo `context`.
    pub fn start_session(&self,
                         flow_id: Uuid,
                         user_id: Option<Uuid>,
                         initial_context: Option<Value>)
                         -> Result<TickOutcome, EngineError> {
        let flow = self.store.flow(flow_id)?;
        if !flow.is_published || !flow.is_active {
            return Err(EngineError::Validation(format!("flow {flow_id} not found or not published")));
        }

        let mut state = flow.info
                            .get("initial_state")
                            .cloned()
                            .unwrap_or_else(|| Value::Object(Map::new()));
        ensure_roots(&mut state);
        if let Some(context) = initial_context {
            deep_merge(&mut state, &json!({ "context": context }));
        }
        Self::check_contract(&flow.contract, &state)?;

        let token = new_session_token();
        let trace_enabled = self.tracer.should_trace(&flow, &token);
        let session = self.store.create_session(NewSession { flow_id,
                                                             user_id,
                                                             session_token: token,
                                                             current_node_id: Some(flow.entry_node_id.clone()),
                                                             state,
                                                             info: Value::Object(Map::new()),
                                                             trace_enabled,
                                                             trace_level: self.tracer.trace_level_for(&flow) })?;
        self.store.add_interaction(session.id,
                                   &NewInteraction { node_id: flow.entry_node_id.clone(),
                                                     interaction_type: InteractionType::Action,
                                                     content: json!({
                                                         "action": "session_started",
                                                         "flow_id": flow_id.to_string(),
                                                     }) })?;
        debug!("session started id={} flow={}", session.id, flow_id);
        self.tick(session.id, None, true)
    }

    /// Reanuda una sesión suspendida con input del usuario.
    pub fn interact(&self, session_token: &str, input: UserInput) -> Result<TickOutcome, EngineError> {
        let session = self.store.session_by_token(session_token)?
                          .ok_or_else(|| EngineError::NotFound("session not found".into()))?;
        if session.status.is_terminal() {
            return Err(EngineError::Conflict("session already ended".into()));
        }
        self.tick(session.id, Some(input), true)
    }

    /// Termina una sesión explícitamente (caller externo).
    pub fn end(&self, session_token: &str, status: SessionStatus) -> Result<Session, EngineError> {
        let session = self.store.session_by_token(session_token)?
                          .ok_or_else(|| EngineError::NotFound("session not found".into()))?;
        let _guard = self.controller.acquire_session_lock(session.id, default_lock_timeout())?;
        let already_terminal = session.status.is_terminal();
        let node_id = session.current_node_id.clone().unwrap_or_else(|| "unknown".into());
        let ended = self.store.end_session(session.id, status)?;
        // Idempotente: un segundo end no re-registra el cierre
        if !already_terminal {
            self.store.add_interaction(ended.id,
                                       &NewInteraction { node_id,
                                                         interaction_type: InteractionType::Action,
                                                         content: json!({
                                                             "action": "session_ended",
                                                             "status": status.as_str(),
                                                         }) })?;
        }
        self.tracer.flush(&self.store)?;
        Ok(ended)
    }

    /// Un tick completo bajo el lock de la sesión.
    pub fn tick(&self,
                session_id: Uuid,
                input: Option<UserInput>,
                user_initiated: bool)
                -> Result<TickOutcome, EngineError> {
        let _guard = self.controller.acquire_session_lock(session_id, default_lock_timeout())?;

        let mut session = self.store.session_by_id(session_id)?
                              .ok_or_else(|| EngineError::NotFound(format!("session {session_id}")))?;
        if session.status.is_terminal() {
            return Err(EngineError::Conflict("session is terminal".into()));
        }
        let flow = self.store.flow(session.flow_id)?;
        let resolver = StoreResolver { store: &self.store, flow_id: flow.id };
        let env = ProcessEnv { http: self.http.as_ref(),
                               scripts: self.scripts.as_ref(),
                               internal: self.internal.as_ref(),
                               trace_level: session.trace_level };

        let mut pending_input = input;
        let mut collected: Vec<EmittedMessage> = Vec::new();
        let mut hops = 0usize;

        loop {
            hops += 1;
            if hops > MAX_STEPS_PER_TICK {
                return self.abandon(session, collected, "max steps per tick exceeded".into());
            }

            let node_id = session.current_node_id.clone().unwrap_or_else(|| flow.entry_node_id.clone());
            let node = match self.store.node(flow.id, &node_id) {
                Ok(node) => node,
                Err(err) => {
                    warn!("session {session_id}: current node '{node_id}' unavailable: {err}");
                    return self.abandon(session, collected, format!("node '{node_id}' not found"));
                }
            };

            let state_before = session.state.clone();
            let started_at = Utc::now();
            // Solo un nodo question consume el input pendiente
            let node_input = if node.node_type == NodeType::Question { pending_input.take() } else { None };
            let consumed = node_input.clone();

            let result = process_node(&env, &resolver, &node, &session, node_input.as_ref());
            let duration_ms = (Utc::now() - started_at).num_milliseconds();
            collected.extend(result.messages.clone());

            if result.expects_input {
                // Suspensión: historial + traza; el estado no muta, así que
                // no hay bump de revisión (y no se emite evento).
                for message in &result.messages {
                    self.store.add_interaction(session.id,
                                               &NewInteraction { node_id: node.node_id.clone(),
                                                                 interaction_type: InteractionType::Message,
                                                                 content: message_content(message) })?;
                }
                if session.trace_enabled {
                    let number = self.tracer.next_step_number(&self.store, session.id)?;
                    let step = self.tracer.build_step(session.id,
                                                      number,
                                                      &node.node_id,
                                                      node.node_type.as_str(),
                                                      &state_before,
                                                      &session.state,
                                                      result.details.clone(),
                                                      None,
                                                      None,
                                                      started_at,
                                                      duration_ms,
                                                      None,
                                                      None);
                    self.tracer.record(&self.store, step, false)?;
                }
                self.store.touch_session(session.id)?;
                return Ok(TickOutcome::AwaitingInput { session,
                                                       messages: collected,
                                                       prompt: result.prompt.clone(),
                                                       input_type: result.input_type.unwrap_or(InputKind::Text) });
            }

            // Variables pendientes → deep-merge sobre el estado
            let mut new_state = session.state.clone();
            deep_merge(&mut new_state, &result.variables);

            let connections = self.store.connections_from(flow.id, &node.node_id)?;
            let transition = resolve_transition(&connections, &result);
            let next_node_id = match &transition {
                Transition::Next(conn) => Some(conn.target_node_id.clone()),
                _ => None,
            };
            let connection_taken = match &transition {
                Transition::Next(conn) => Some(conn.connection_type.as_str().to_string()),
                _ => result.connection.map(|c| c.as_str().to_string()),
            };

            // Historial del paso: INPUT consumido, emisiones y errores
            let mut interactions = Vec::new();
            if let Some(input) = &consumed {
                interactions.push(NewInteraction { node_id: node.node_id.clone(),
                                                   interaction_type: InteractionType::Input,
                                                   content: json!({
                                                       "input": input.value,
                                                       "input_type": input.input_type.as_str(),
                                                   }) });
            }
            for message in &result.messages {
                interactions.push(NewInteraction { node_id: node.node_id.clone(),
                                                   interaction_type: InteractionType::Message,
                                                   content: message_content(message) });
            }
            if !result.errors.is_empty() {
                interactions.push(NewInteraction { node_id: node.node_id.clone(),
                                                   interaction_type: InteractionType::Action,
                                                   content: json!({
                                                       "action": "node_errors",
                                                       "errors": result.errors.clone(),
                                                   }) });
            }

            let error_message = if result.errors.is_empty() { None } else { Some(result.errors.join("; ")) };
            let step = if session.trace_enabled {
                let number = self.tracer.next_step_number(&self.store, session.id)?;
                Some(self.tracer.build_step(session.id,
                                            number,
                                            &node.node_id,
                                            node.node_type.as_str(),
                                            &state_before,
                                            &new_state,
                                            result.details.clone(),
                                            connection_taken,
                                            next_node_id.clone(),
                                            started_at,
                                            duration_ms,
                                            error_message,
                                            None))
            } else {
                None
            };
            // Ruta directa: el paso entra en la transacción del commit.
            // Ruta buffered: se registra tras el commit vía el tracer.
            let (tx_step, buffered_step) =
                if self.tracer.is_buffered() { (None, step) } else { (step, None) };

            let update = SessionUpdate { session_id: session.id,
                                         new_state,
                                         current_node_id: Some(next_node_id.clone()
                                                                           .unwrap_or_else(|| node.node_id.clone())),
                                         expected_revision: Some(session.revision),
                                         user_initiated };
            session = match self.store.commit_tick(&update, &interactions, tx_step.as_ref())? {
                UpdateOutcome::Applied(updated) => updated,
                UpdateOutcome::Rejected { reason, .. } => return Err(EngineError::Conflict(reason)),
            };
            let ending = matches!(transition, Transition::Completed | Transition::Abandoned(_));
            if let Some(step) = buffered_step {
                self.tracer.record(&self.store, step, ending)?;
            }

            // Contrato de refresh tras un nodo action: recargar del store
            // antes de despachar al siguiente nodo; si desapareció, seguir
            // con la copia en memoria.
            if node.node_type == NodeType::Action {
                if let Some(fresh) = self.store.session_by_id(session.id)? {
                    session = fresh;
                }
            }

            match transition {
                Transition::Next(_) => continue,
                Transition::Completed => {
                    let ended = self.store.end_session(session.id, SessionStatus::Completed)?;
                    self.store.add_interaction(ended.id,
                                               &NewInteraction { node_id: node.node_id.clone(),
                                                                 interaction_type: InteractionType::Action,
                                                                 content: json!({
                                                                     "action": "session_ended",
                                                                     "status": "COMPLETED",
                                                                 }) })?;
                    self.tracer.flush(&self.store)?;
                    return Ok(TickOutcome::Completed { session: ended, messages: collected });
                }
                Transition::Abandoned(error) => {
                    return self.abandon(session, collected, error);
                }
            }
        }
    }

    fn abandon(&self,
               session: Session,
               messages: Vec<EmittedMessage>,
               error: String)
               -> Result<TickOutcome, EngineError> {
        let node_id = session.current_node_id.clone().unwrap_or_else(|| "unknown".into());
        let ended = self.store.end_session(session.id, SessionStatus::Abandoned)?;
        self.store.add_interaction(ended.id,
                                   &NewInteraction { node_id,
                                                     interaction_type: InteractionType::Action,
                                                     content: json!({
                                                         "action": "session_abandoned",
                                                         "error": error,
                                                     }) })?;
        self.tracer.flush(&self.store)?;
        Ok(TickOutcome::Abandoned { session: ended, messages, error })
    }
}

fn message_content(message: &EmittedMessage) -> Value {
    json!({
        "type": message.kind,
        "content": message.content,
        "delay": message.delay,
    })
}
