//! Nodo script: ejecuta `content.code` en el sandbox declarado, con inputs
//! resueltos desde rutas de estado y outputs escritos de vuelta. Los
//! contextos `frontend` no corren en el servidor: el blob se emite al
//! adaptador cliente.

use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::constants::DEFAULT_SCRIPT_TIMEOUT_MS;
use crate::effects::ScriptJob;
use crate::model::{EmittedMessage, Node, Session, StepResult};
use crate::processor::ProcessEnv;
use crate::trace::details::{code_preview, limit_console_logs};
use chat_domain::state::{get_path, set_path};
use chat_domain::types::{ConnectionType, ExecutionContext, ScriptLanguage, TraceLevel};

/// Inputs declarados `{nombre: ruta.de.estado}` resueltos contra la sesión
/// (rutas ausentes → null).
fn resolve_inputs(content: &Value, state: &Value) -> Map<String, Value> {
    content.get("inputs")
           .and_then(Value::as_object)
           .map(|m| {
               m.iter()
                .map(|(name, path)| {
                    let value = path.as_str()
                                    .and_then(|p| get_path(state, p))
                                    .cloned()
                                    .unwrap_or(Value::Null);
                    (name.clone(), value)
                })
                .collect()
           })
           .unwrap_or_default()
}

/// Targets de salida: mapa `{nombre: ruta}` o lista de rutas (el nombre es
/// el último segmento).
fn output_targets(content: &Value) -> Vec<(String, String)> {
    match content.get("outputs") {
        Some(Value::Object(map)) => map.iter()
                                       .filter_map(|(name, path)| {
                                           path.as_str().map(|p| (name.clone(), p.to_string()))
                                       })
                                       .collect(),
        Some(Value::Array(paths)) => paths.iter()
                                          .filter_map(Value::as_str)
                                          .map(|path| {
                                              let name = path.rsplit('.').next().unwrap_or(path).to_string();
                                              (name, path.to_string())
                                          })
                                          .collect(),
        _ => Vec::new(),
    }
}

pub fn process(env: &ProcessEnv<'_>, node: &Node, session: &Session) -> StepResult {
    let content = &node.content;
    let code = content.get("code").and_then(Value::as_str).unwrap_or_default();
    let language = content.get("language")
                          .and_then(Value::as_str)
                          .and_then(ScriptLanguage::parse)
                          .unwrap_or(ScriptLanguage::Javascript);
    let execution_context = content.get("execution_context")
                                   .and_then(Value::as_str)
                                   .and_then(ExecutionContext::parse)
                                   .unwrap_or(ExecutionContext::Backend);
    let timeout_ms = content.get("timeout").and_then(Value::as_u64).unwrap_or(DEFAULT_SCRIPT_TIMEOUT_MS);
    let dependencies: Vec<String> = content.get("dependencies")
                                           .and_then(Value::as_array)
                                           .map(|d| {
                                               d.iter().filter_map(Value::as_str).map(str::to_string).collect()
                                           })
                                           .unwrap_or_default();

    if code.trim().is_empty() {
        return StepResult { success: false,
                            connection: Some(ConnectionType::Failure),
                            errors: vec![format!("script node '{}' has no code", node.node_id)],
                            details: json!({"type": "script", "error": "missing code"}),
                            ..StepResult::default() };
    }

    let inputs = resolve_inputs(content, &session.state);

    // Scripts frontend: se emiten al cliente, el servidor no los ejecuta
    if execution_context == ExecutionContext::Frontend {
        return StepResult { messages: vec![EmittedMessage { kind: "client_script".into(),
                                                            content: json!({
                                                                "code": code,
                                                                "language": language.as_str(),
                                                                "inputs": inputs.clone(),
                                                                "dependencies": dependencies,
                                                            }),
                                                            delay: None }],
                            details: json!({
                                "type": "script",
                                "language": language.as_str(),
                                "code_preview": code_preview(code),
                                "execution_context": "frontend",
                                "inputs": inputs,
                            }),
                            ..StepResult::default() };
    }

    let job = ScriptJob { code: code.to_string(),
                          language,
                          inputs: inputs.clone(),
                          dependencies,
                          timeout: Duration::from_millis(timeout_ms) };

    match env.scripts.run(&job) {
        Ok(outcome) => {
            let mut variables = Value::Object(Map::new());
            for (name, path) in output_targets(content) {
                let value = outcome.outputs.get(&name).cloned().unwrap_or(Value::Null);
                set_path(&mut variables, &path, value);
            }
            let console_logs = if env.trace_level == TraceLevel::Verbose {
                json!(limit_console_logs(&outcome.console_logs))
            } else {
                Value::Null
            };
            StepResult { variables,
                         details: json!({
                             "type": "script",
                             "language": language.as_str(),
                             "code_preview": code_preview(code),
                             "inputs": inputs,
                             "outputs": outcome.outputs,
                             "console_logs": console_logs,
                             "error": Value::Null,
                             "execution_time_ms": outcome.execution_time_ms,
                         }),
                         ..StepResult::default() }
        }
        Err(err) => StepResult { success: false,
                                 connection: Some(ConnectionType::Failure),
                                 errors: vec![err.to_string()],
                                 details: json!({
                                     "type": "script",
                                     "language": language.as_str(),
                                     "code_preview": code_preview(code),
                                     "inputs": inputs,
                                     "outputs": {},
                                     "error": err.to_string(),
                                 }),
                                 ..StepResult::default() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{NoInternalHandlers, ScriptExecutor, ScriptOutcome, UnconfiguredHttp};
    use crate::errors::EngineError;
    use crate::processor::testutil::{env, make_node, session_with_state};
    use chat_domain::types::NodeType;
    use serde_json::json;

    /// Sandbox de prueba: devuelve `result = inputs.value * 2`.
    struct Doubler;
    impl ScriptExecutor for Doubler {
        fn run(&self, job: &ScriptJob) -> Result<ScriptOutcome, EngineError> {
            let value = job.inputs.get("value").and_then(Value::as_f64).unwrap_or(0.0);
            let mut outputs = Map::new();
            outputs.insert("result".into(), json!(value * 2.0));
            Ok(ScriptOutcome { outputs, console_logs: vec!["ran".into()], execution_time_ms: 1 })
        }
    }

    struct TimesOut;
    impl ScriptExecutor for TimesOut {
        fn run(&self, _job: &ScriptJob) -> Result<ScriptOutcome, EngineError> {
            Err(EngineError::Timeout("script exceeded 5ms deadline".into()))
        }
    }

    #[test]
    fn backend_script_writes_outputs_to_state_paths() {
        let http = UnconfiguredHttp;
        let scripts = Doubler;
        let internal = NoInternalHandlers;
        let env = env(&http, &scripts, &internal);
        let session = session_with_state(json!({"temp": {"answer": 21}}));
        let node = make_node("s1",
                             NodeType::Script,
                             json!({
                                 "code": "outputs.result = inputs.value * 2;",
                                 "language": "javascript",
                                 "inputs": {"value": "temp.answer"},
                                 "outputs": ["temp.result"],
                             }));
        let result = process(&env, &node, &session);
        assert!(result.success);
        assert_eq!(result.variables["temp"]["result"], json!(42.0));
        assert_eq!(result.details["execution_time_ms"], json!(1));
    }

    #[test]
    fn frontend_scripts_are_emitted_not_executed() {
        let http = UnconfiguredHttp;
        let scripts = TimesOut; // nunca debería llamarse
        let internal = NoInternalHandlers;
        let env = env(&http, &scripts, &internal);
        let session = session_with_state(json!({}));
        let node = make_node("s1",
                             NodeType::Script,
                             json!({
                                 "code": "render();",
                                 "language": "javascript",
                                 "execution_context": "frontend",
                             }));
        let result = process(&env, &node, &session);
        assert!(result.success);
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].kind, "client_script");
    }

    #[test]
    fn timeout_records_error_and_takes_failure() {
        let http = UnconfiguredHttp;
        let scripts = TimesOut;
        let internal = NoInternalHandlers;
        let env = env(&http, &scripts, &internal);
        let session = session_with_state(json!({}));
        let node = make_node("s1", NodeType::Script, json!({"code": "loop {}", "language": "javascript"}));
        let result = process(&env, &node, &session);
        assert!(!result.success);
        assert_eq!(result.connection, Some(ConnectionType::Failure));
        assert!(result.errors[0].contains("deadline"));
    }
}
