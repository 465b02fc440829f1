//! Errores de persistencia.
//! Mapea errores de Diesel / conexión a variantes semánticas, y de ahí a la
//! taxonomía del motor (`EngineError`) al cruzar el límite del core.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

use chat_core::errors::EngineError;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("check violation: {0}")]
    CheckViolation(String),
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("not found")]
    NotFound,
    #[error("serialization conflict (retryable)")]
    SerializationConflict,
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::CheckViolation => Self::CheckViolation(info.message().to_string()),
                DatabaseErrorKind::ForeignKeyViolation => Self::ForeignKeyViolation(info.message().to_string()),
                DatabaseErrorKind::SerializationFailure => Self::SerializationConflict,
                other => Self::Unknown(format!("db error kind {:?}: {}", other, info.message())),
            },
            DieselError::DeserializationError(e) => Self::Unknown(format!("deser: {e}")),
            DieselError::SerializationError(e) => Self::Unknown(format!("ser: {e}")),
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            other => Self::Unknown(format!("unhandled diesel error: {other:?}")),
        }
    }
}

/// Mapeo hacia la taxonomía semántica del motor: violaciones de integridad
/// se reportan como tal, conflictos transitorios como Storage.
impl From<PersistenceError> for EngineError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound => EngineError::NotFound("row not found".into()),
            PersistenceError::UniqueViolation(m) | PersistenceError::ForeignKeyViolation(m) => {
                EngineError::Integrity(m)
            }
            PersistenceError::CheckViolation(m) => EngineError::Validation(m),
            PersistenceError::SerializationConflict => EngineError::Storage("serialization conflict".into()),
            PersistenceError::TransientIo(m) => EngineError::Storage(m),
            PersistenceError::Unknown(m) => EngineError::Storage(m),
        }
    }
}
