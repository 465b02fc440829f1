//! chat-persistence
//!
//! Backends Postgres (Diesel) de los contratos del core: `ChatStore`,
//! `FlowAuthoring` y el controlador de concurrencia por advisory locks, más
//! el dispatcher del outbox y el cleanup de retención de trazas.
//!
//! Paridad: cada operación debe observar exactamente la misma semántica que
//! el backend en memoria de `chat-core` (la política de revisiones y los
//! payloads de eventos se comparten como funciones puras del core).
//!
//! Módulos:
//! - `pg`: implementaciones sobre Postgres (store, locks, outbox, trazas).
//! - `migrations`: runner embebido de migraciones Diesel (tablas + trigger
//!   `notify_flow_event`).
//! - `config`: carga de configuración desde .env.
//! - `schema`: tablas Diesel declaradas para compilar queries.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::init_dotenv;
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, OutboxDispatcher, PgChatStore, PgPool, PgSessionLocks,
             TraceCleanup};
