//! Motor de acciones: ejecuta la lista tipada de un nodo action.
//!
//! Cada acción acumula escrituras en un mapa de variables pendientes que el
//! runtime funde (deep-merge) en el estado al commitear el paso. Las
//! sustituciones de plantilla ven el "estado efectivo": el estado de la
//! sesión con las pendientes ya aplicadas, para que una acción pueda leer lo
//! que escribió la anterior.

pub mod aggregate;
pub mod api_call;

use serde_json::{json, Map, Value};

use crate::effects::{HttpExecutor, InternalApiHandler};
use aggregate::{aggregate as run_aggregate, AggregateSpec};
use api_call::run_api_call;
use chat_domain::state::{deep_merge, set_path};
use chat_domain::template::substitute_value;

/// Resultado de ejecutar la lista de acciones de un nodo.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// Variables pendientes (objeto) a fundir en el estado.
    pub variables: Value,
    /// Registro por acción para la traza.
    pub executed: Vec<Value>,
    pub errors: Vec<String>,
    /// `false` si alguna acción lanzó sin ser absorbida por fallback.
    pub success: bool,
}

fn effective_state(state: &Value, pending: &Value) -> Value {
    let mut merged = state.clone();
    deep_merge(&mut merged, pending);
    merged
}

/// Ejecuta en orden la lista de acciones contra el estado de la sesión.
pub fn run_actions(http: &dyn HttpExecutor,
                   internal: &dyn InternalApiHandler,
                   state: &Value,
                   actions: &[Value])
                   -> ActionOutcome {
    let mut pending = Value::Object(Map::new());
    let mut executed = Vec::new();
    let mut errors = Vec::new();
    let mut success = true;

    for action in actions {
        let action_type = action.get("type").and_then(Value::as_str).unwrap_or("");
        let view = effective_state(state, &pending);
        match action_type {
            "set_variable" => {
                let variable = action.get("variable").and_then(Value::as_str);
                match variable {
                    Some(path) => {
                        let raw = action.get("value").cloned().unwrap_or(Value::Null);
                        let value = substitute_value(&raw, &view);
                        set_path(&mut pending, path, value.clone());
                        executed.push(json!({"type": "set_variable", "variable": path, "value": value}));
                    }
                    None => {
                        errors.push("set_variable action missing 'variable'".to_string());
                        success = false;
                        executed.push(json!({"type": "set_variable", "status": "error"}));
                    }
                }
            }
            "aggregate" => match AggregateSpec::parse(action) {
                Ok(spec) => match run_aggregate(&view, &spec) {
                    Ok(value) => {
                        set_path(&mut pending, &spec.target, value.clone());
                        executed.push(json!({
                            "type": "aggregate",
                            "operation": spec.operation,
                            "source": spec.source,
                            "target": spec.target,
                            "value": value,
                        }));
                    }
                    Err(err) => {
                        // Las demás acciones siguen; el error queda registrado
                        errors.push(err.clone());
                        success = false;
                        executed.push(json!({"type": "aggregate", "status": "error", "error": err}));
                    }
                },
                Err(err) => {
                    errors.push(err.clone());
                    success = false;
                    executed.push(json!({"type": "aggregate", "status": "error", "error": err}));
                }
            },
            "api_call" => {
                let result = run_api_call(http, internal, &view, action);
                for (target, value) in &result.variables {
                    set_path(&mut pending, target, value.clone());
                }
                if let Some(err) = result.error {
                    errors.push(err);
                    success = false;
                }
                executed.push(json!({"type": "api_call", "detail": result.detail}));
            }
            other => {
                errors.push(format!("unknown action type '{other}'"));
                success = false;
                executed.push(json!({"type": other, "status": "error"}));
            }
        }
    }

    ActionOutcome { variables: pending, executed, errors, success }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{NoInternalHandlers, UnconfiguredHttp};
    use serde_json::json;

    #[test]
    fn set_variable_resolves_templates_against_pending_writes() {
        let state = json!({"user": {"name": "Ada"}});
        let actions = vec![json!({"type": "set_variable", "variable": "temp.greeting", "value": "hi {{user.name}}"}),
                           json!({"type": "set_variable", "variable": "temp.copy", "value": "{{temp.greeting}}"})];
        let outcome = run_actions(&UnconfiguredHttp, &NoInternalHandlers, &state, &actions);
        assert!(outcome.success);
        assert_eq!(outcome.variables["temp"]["greeting"], json!("hi Ada"));
        // la segunda acción ve la escritura pendiente de la primera
        assert_eq!(outcome.variables["temp"]["copy"], json!("hi Ada"));
    }

    #[test]
    fn aggregate_failure_is_recorded_but_other_actions_proceed() {
        let state = json!({"temp": {"xs": [1, 2]}});
        let actions = vec![json!({"type": "aggregate", "source": "temp.missing", "operation": "sum", "target": "out.a"}),
                           json!({"type": "aggregate", "source": "temp.xs", "operation": "sum", "target": "out.b"})];
        let outcome = run_actions(&UnconfiguredHttp, &NoInternalHandlers, &state, &actions);
        assert!(!outcome.success);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.variables["out"]["b"], json!(3));
        assert!(outcome.variables["out"].get("a").is_none());
    }

    #[test]
    fn api_call_without_fallback_records_remote_error() {
        let state = json!({});
        let actions = vec![json!({"type": "api_call", "endpoint": "https://api.example.com/x", "auth_type": "external"})];
        let outcome = run_actions(&UnconfiguredHttp, &NoInternalHandlers, &state, &actions);
        assert!(!outcome.success);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn api_call_fallback_absorbs_the_failure_and_maps_response() {
        let state = json!({});
        let actions = vec![json!({
            "type": "api_call",
            "endpoint": "/internal/recommendations",
            "auth_type": "internal",
            "response_mapping": {"temp.books": "recommendations"},
            "fallback_response": {"recommendations": ["stub-book"]},
        })];
        let outcome = run_actions(&UnconfiguredHttp, &NoInternalHandlers, &state, &actions);
        assert!(outcome.success, "fallback absorbe el fallo: {:?}", outcome.errors);
        assert_eq!(outcome.variables["temp"]["books"], json!(["stub-book"]));
    }
}
