//! chat-core: motor de flujos conversacionales.
//!
//! Propósito:
//! - Ejecutar grafos dirigidos de nodos tipados (message, question,
//!   condition, action, webhook, script, composite, start) en nombre de un
//!   usuario, produciendo mensajes, suspendiendo en límites de input y
//!   mutando la bolsa de estado de la sesión bajo control optimista de
//!   concurrencia.
//! - Definir los contratos de almacenamiento (`ChatStore`, `FlowAuthoring`)
//!   y de efectos (HTTP, scripts, handlers internos) con implementaciones en
//!   memoria de paridad exacta con el backend Postgres.
//!
//! Componentes principales:
//! - `model`: flujos, sesiones, pasos de traza y resultados de paso.
//! - `snapshot` / `validate`: sincronización snapshot ⇄ tablas canónicas y
//!   validación de grafos al publicar.
//! - `store`: traits + backend en memoria (incluye outbox).
//! - `concurrency`: advisory lock por sesión y política user-wins.
//! - `processor`: un procesador por clase de nodo.
//! - `action`: motor de acciones tipadas (set_variable, aggregate, api_call).
//! - `runtime`: la máquina de estados del tick.
//! - `trace`: tracer con sampling, masking de PII y auditoría de lecturas.
//! - `event`: payloads de eventos de dominio para NOTIFY + outbox.
//! - `service`: fachada de conversación para el adaptador externo.

pub mod action;
pub mod concurrency;
pub mod constants;
pub mod effects;
pub mod errors;
pub mod event;
pub mod model;
pub mod processor;
pub mod runtime;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod trace;
pub mod validate;

// Re-exports públicos principales
pub use concurrency::{safe_session_update, ConcurrencyController, InMemoryLocks};
pub use errors::EngineError;
pub use event::DomainEvent;
pub use model::{Flow, Session, StepResult, UserInput};
pub use runtime::{ChatRuntime, TickOutcome};
pub use service::{ChatResponse, ChatService};
pub use store::{ChatStore, FlowAuthoring, InMemoryStore, SessionUpdate, UpdateOutcome};
pub use trace::ExecutionTracer;
