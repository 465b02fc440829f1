//! chat-domain: vocabulario del dominio conversacional.
//!
//! Propósito:
//! - Definir los tipos neutrales que comparten el motor y la persistencia:
//!   enums de nodos/conexiones/sesiones, navegación de rutas punteadas sobre
//!   la bolsa de estado, sustitución de plantillas `{{ruta}}`, predicados de
//!   condición y enmascaramiento de PII.
//! - Ninguna dependencia de base de datos ni de red: todo es lógica pura y
//!   determinista, fácil de testear sin infraestructura.
//!
//! Módulos:
//! - `types`: enums estables y el mapeo token externo ⇄ enum de conexiones.
//! - `state`: lectura/escritura por ruta punteada y deep-merge.
//! - `template`: sustitución de `{{ruta}}` y la variante de stripping para
//!   llamadas salientes.
//! - `predicate`: AST mínimo de predicados (`{var, op, value}` + and/or).
//! - `pii`: enmascaramiento de estado y credenciales en URLs.
//! - `hashing`: claves de lock, sampling determinista y hash de estado.
//! - `version`: bump de versión al publicar.

pub mod errors;
pub mod hashing;
pub mod pii;
pub mod predicate;
pub mod state;
pub mod template;
pub mod types;
pub mod version;

pub use errors::DomainError;
pub use pii::PiiMasker;
pub use predicate::Predicate;
pub use types::{
    ConnectionType, ExecutionContext, InputKind, InteractionType, NodeType, ScriptLanguage, SessionStatus, TraceLevel,
};
