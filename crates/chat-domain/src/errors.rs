//! Errores del dominio (puros, sin infraestructura).

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum DomainError {
    #[error("invalid predicate: {0}")] Predicate(String),
    #[error("invalid state path: {0}")] InvalidPath(String),
    #[error("invalid value: {0}")] InvalidValue(String),
}
