//! Bordes con efectos: HTTP saliente, ejecución de scripts y handlers
//! internos.
//!
//! El core define los contratos; `chat-adapters` aporta implementaciones
//! reales (reqwest, subproceso). Las implementaciones "Unconfigured" de este
//! módulo permiten levantar el runtime sin efectos (tests, demos) y hacen
//! explícito el fallo si un flujo los necesita.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::errors::EngineError;
use chat_domain::types::ScriptLanguage;

/// Request HTTP ya templada y con el stripping aplicado.
#[derive(Debug, Clone)]
pub struct HttpRequestSpec {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

/// Respuesta observada (el ejecutor no interpreta códigos: eso es del
/// procesador).
#[derive(Debug, Clone)]
pub struct HttpResponseData {
    pub status: u16,
    pub body: Value,
    pub duration_ms: i64,
}

pub trait HttpExecutor: Send + Sync {
    fn execute(&self, request: &HttpRequestSpec) -> Result<HttpResponseData, EngineError>;
}

/// Trabajo de script listo para el sandbox.
#[derive(Debug, Clone)]
pub struct ScriptJob {
    pub code: String,
    pub language: ScriptLanguage,
    pub inputs: Map<String, Value>,
    /// URLs opacas que el ejecutor decide cómo resolver.
    pub dependencies: Vec<String>,
    pub timeout: Duration,
}

/// Resultado de una ejecución de script.
#[derive(Debug, Clone, Default)]
pub struct ScriptOutcome {
    pub outputs: Map<String, Value>,
    pub console_logs: Vec<String>,
    pub execution_time_ms: i64,
}

pub trait ScriptExecutor: Send + Sync {
    fn run(&self, job: &ScriptJob) -> Result<ScriptOutcome, EngineError>;
}

/// Handler in-process para `api_call` con `auth_type=internal`.
pub trait InternalApiHandler: Send + Sync {
    fn call(&self,
            endpoint: &str,
            method: &str,
            body: &Value,
            query: &[(String, String)])
            -> Result<Value, EngineError>;
}

/// HTTP sin configurar: todo intento es un error Remote explícito.
#[derive(Debug, Default)]
pub struct UnconfiguredHttp;

impl HttpExecutor for UnconfiguredHttp {
    fn execute(&self, request: &HttpRequestSpec) -> Result<HttpResponseData, EngineError> {
        Err(EngineError::Remote(format!("no HTTP executor configured for {} {}", request.method, request.url)))
    }
}

/// Scripts sin sandbox: error Validation explícito.
#[derive(Debug, Default)]
pub struct UnconfiguredScripts;

impl ScriptExecutor for UnconfiguredScripts {
    fn run(&self, job: &ScriptJob) -> Result<ScriptOutcome, EngineError> {
        Err(EngineError::Validation(format!("no script executor configured ({})", job.language.as_str())))
    }
}

/// Registro interno vacío.
#[derive(Debug, Default)]
pub struct NoInternalHandlers;

impl InternalApiHandler for NoInternalHandlers {
    fn call(&self, endpoint: &str, _method: &str, _body: &Value, _query: &[(String, String)]) -> Result<Value, EngineError> {
        Err(EngineError::Remote(format!("no internal handler registered for {endpoint}")))
    }
}
