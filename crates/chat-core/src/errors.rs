//! Errores semánticos del motor.
//!
//! Las variantes siguen la taxonomía del sistema: NotFound/Conflict/
//! Validation/Integrity/Timeout/Remote/Internal. La capa de persistencia
//! mapea sus errores de driver a estas variantes antes de cruzar el límite
//! del core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum EngineError {
    #[error("not found: {0}")] NotFound(String),
    #[error("conflict: {0}")] Conflict(String),
    #[error("validation: {0}")] Validation(String),
    #[error("integrity: {0}")] Integrity(String),
    #[error("timeout: {0}")] Timeout(String),
    #[error("remote: {0}")] Remote(String),
    #[error("storage: {0}")] Storage(String),
    #[error("internal: {0}")] Internal(String),
}
