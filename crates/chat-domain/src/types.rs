//! Enums estables del dominio y el mapeo de tokens externos.
//!
//! Los valores serializados (minúsculas para tipos de nodo, MAYÚSCULAS para
//! estados de sesión) son contrato observable: la capa de persistencia los
//! guarda como texto con CHECK constraints y el snapshot `flow_data` los
//! proyecta tal cual.

use serde::{Deserialize, Serialize};

/// Tipos de nodo soportados por el runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Start,
    Message,
    Question,
    Condition,
    Action,
    Webhook,
    Composite,
    Script,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Start => "start",
            NodeType::Message => "message",
            NodeType::Question => "question",
            NodeType::Condition => "condition",
            NodeType::Action => "action",
            NodeType::Webhook => "webhook",
            NodeType::Composite => "composite",
            NodeType::Script => "script",
        }
    }

    /// Parse case-insensitive. Devuelve `None` para tipos desconocidos; el
    /// snapshot decide el fallback (message) para no perder nodos dibujados
    /// por editores externos.
    pub fn parse(raw: &str) -> Option<NodeType> {
        match raw.to_ascii_lowercase().as_str() {
            "start" => Some(NodeType::Start),
            "message" => Some(NodeType::Message),
            "question" => Some(NodeType::Question),
            "condition" => Some(NodeType::Condition),
            "action" => Some(NodeType::Action),
            "webhook" => Some(NodeType::Webhook),
            "composite" => Some(NodeType::Composite),
            "script" => Some(NodeType::Script),
            _ => None,
        }
    }
}

/// Tipos de conexión (aristas etiquetadas del grafo).
///
/// El token externo (`DEFAULT`, `SUCCESS`, `FAILURE`, `$0`, `$1`) es el que
/// viaja en `flow_data`; el enum es la forma canónica relacional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Default,
    Success,
    Failure,
    Option0,
    Option1,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Default => "default",
            ConnectionType::Success => "success",
            ConnectionType::Failure => "failure",
            ConnectionType::Option0 => "option_0",
            ConnectionType::Option1 => "option_1",
        }
    }

    /// Token de wire usado en snapshots y editores.
    pub fn to_token(&self) -> &'static str {
        match self {
            ConnectionType::Default => "DEFAULT",
            ConnectionType::Success => "SUCCESS",
            ConnectionType::Failure => "FAILURE",
            ConnectionType::Option0 => "$0",
            ConnectionType::Option1 => "$1",
        }
    }

    /// Mapea un token externo al enum. Tokens desconocidos (incluido el
    /// legado `CONDITIONAL`) caen en `Default`.
    pub fn from_token(token: &str) -> ConnectionType {
        match token.to_ascii_uppercase().as_str() {
            "DEFAULT" => ConnectionType::Default,
            "SUCCESS" => ConnectionType::Success,
            "FAILURE" => ConnectionType::Failure,
            "$0" => ConnectionType::Option0,
            "$1" => ConnectionType::Option1,
            _ => ConnectionType::Default,
        }
    }

    /// Forma canónica persistida (`option_0`...). Inversa de `as_str`.
    pub fn parse(raw: &str) -> Option<ConnectionType> {
        match raw.to_ascii_lowercase().as_str() {
            "default" => Some(ConnectionType::Default),
            "success" => Some(ConnectionType::Success),
            "failure" => Some(ConnectionType::Failure),
            "option_0" => Some(ConnectionType::Option0),
            "option_1" => Some(ConnectionType::Option1),
            _ => None,
        }
    }

    /// Conexión `$i` para la opción i de un nodo question/condition.
    pub fn option(index: usize) -> Option<ConnectionType> {
        match index {
            0 => Some(ConnectionType::Option0),
            1 => Some(ConnectionType::Option1),
            _ => None,
        }
    }
}

/// Estado del ciclo de vida de una sesión.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Active,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Abandoned => "ABANDONED",
        }
    }

    pub fn parse(raw: &str) -> Option<SessionStatus> {
        match raw.to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(SessionStatus::Active),
            "COMPLETED" => Some(SessionStatus::Completed),
            "ABANDONED" => Some(SessionStatus::Abandoned),
            _ => None,
        }
    }

    /// Una sesión terminal no acepta más interacciones.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

/// Tipo de entrada en el historial de conversación (append-only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InteractionType {
    /// Emisión del bot.
    Message,
    /// Respuesta del usuario.
    Input,
    /// Evento de sistema.
    Action,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::Message => "MESSAGE",
            InteractionType::Input => "INPUT",
            InteractionType::Action => "ACTION",
        }
    }

    pub fn parse(raw: &str) -> Option<InteractionType> {
        match raw.to_ascii_uppercase().as_str() {
            "MESSAGE" => Some(InteractionType::Message),
            "INPUT" => Some(InteractionType::Input),
            "ACTION" => Some(InteractionType::Action),
            _ => None,
        }
    }
}

/// Nivel de traza por sesión. Advisory: `verbose` habilita console_logs y
/// cuerpos completos en los detalles de ejecución.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Standard,
    Verbose,
}

impl TraceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceLevel::Standard => "standard",
            TraceLevel::Verbose => "verbose",
        }
    }

    pub fn parse(raw: &str) -> Option<TraceLevel> {
        match raw.to_ascii_lowercase().as_str() {
            "standard" => Some(TraceLevel::Standard),
            "verbose" => Some(TraceLevel::Verbose),
            _ => None,
        }
    }
}

/// Lenguajes aceptados por los nodos script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLanguage {
    Javascript,
    Typescript,
}

impl ScriptLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptLanguage::Javascript => "javascript",
            ScriptLanguage::Typescript => "typescript",
        }
    }

    pub fn parse(raw: &str) -> Option<ScriptLanguage> {
        match raw.to_ascii_lowercase().as_str() {
            "javascript" => Some(ScriptLanguage::Javascript),
            "typescript" => Some(ScriptLanguage::Typescript),
            _ => None,
        }
    }
}

/// Dónde se ejecuta un nodo script: `frontend` se emite al adaptador cliente
/// y no corre en el servidor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionContext {
    Frontend,
    Backend,
    Mixed,
}

impl ExecutionContext {
    pub fn parse(raw: &str) -> Option<ExecutionContext> {
        match raw.to_ascii_lowercase().as_str() {
            "frontend" => Some(ExecutionContext::Frontend),
            "backend" => Some(ExecutionContext::Backend),
            "mixed" => Some(ExecutionContext::Mixed),
            _ => None,
        }
    }
}

/// Tipo de input que espera un nodo question suspendido.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Text,
    Choice,
}

impl InputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::Text => "text",
            InputKind::Choice => "choice",
        }
    }

    pub fn parse(raw: &str) -> Option<InputKind> {
        match raw.to_ascii_lowercase().as_str() {
            "text" => Some(InputKind::Text),
            "choice" => Some(InputKind::Choice),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_roundtrip_and_legacy_fallback() {
        assert_eq!(ConnectionType::from_token("$0"), ConnectionType::Option0);
        assert_eq!(ConnectionType::from_token("success"), ConnectionType::Success);
        // CONDITIONAL es legado: cae en default
        assert_eq!(ConnectionType::from_token("CONDITIONAL"), ConnectionType::Default);
        assert_eq!(ConnectionType::Option1.to_token(), "$1");
    }

    #[test]
    fn node_type_is_case_insensitive() {
        assert_eq!(NodeType::parse("SCRIPT"), Some(NodeType::Script));
        assert_eq!(NodeType::parse("Script"), Some(NodeType::Script));
        assert_eq!(NodeType::parse("unknown"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!SessionStatus::Active.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Abandoned.is_terminal());
    }
}
