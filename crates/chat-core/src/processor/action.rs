//! Nodo action: delega en el motor de acciones (`crate::action`) y arma los
//! detalles de traza. El contrato de refresh posterior (recargar la sesión
//! del store antes del siguiente nodo) lo cumple el runtime.

use serde_json::{json, Value};

use crate::action::run_actions;
use crate::model::{Node, Session, StepResult};
use crate::processor::ProcessEnv;
use chat_domain::types::ConnectionType;

pub fn process(env: &ProcessEnv<'_>, node: &Node, session: &Session) -> StepResult {
    let actions = node.content
                      .get("actions")
                      .and_then(Value::as_array)
                      .cloned()
                      .unwrap_or_default();

    let outcome = run_actions(env.http, env.internal, &session.state, &actions);

    let connection = if outcome.success { ConnectionType::Default } else { ConnectionType::Failure };
    StepResult { success: outcome.success,
                 variables: outcome.variables.clone(),
                 connection: Some(connection),
                 errors: outcome.errors,
                 details: json!({
                     "type": "action",
                     "action_type": node.content.get("action_type").and_then(Value::as_str).unwrap_or(""),
                     "actions_executed": outcome.executed,
                     "variables_changed": outcome.variables,
                 }),
                 ..StepResult::default() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{NoInternalHandlers, UnconfiguredHttp, UnconfiguredScripts};
    use crate::processor::testutil::{env, make_node, session_with_state};
    use chat_domain::types::NodeType;
    use serde_json::json;

    #[test]
    fn aggregate_action_produces_pending_variables() {
        let http = UnconfiguredHttp;
        let scripts = UnconfiguredScripts;
        let internal = NoInternalHandlers;
        let env = env(&http, &scripts, &internal);
        let session = session_with_state(json!({"temp": {"quiz": [{"score": 5}, {"score": 8}, {"score": 7}]}}));
        let node = make_node("a1",
                             NodeType::Action,
                             json!({
                                 "actions": [{
                                     "type": "aggregate",
                                     "source": "temp.quiz",
                                     "field": "score",
                                     "operation": "sum",
                                     "target": "results.total",
                                 }],
                             }));
        let result = process(&env, &node, &session);
        assert!(result.success);
        assert_eq!(result.variables["results"]["total"], json!(20));
        assert_eq!(result.details["actions_executed"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn failing_action_routes_to_failure_connection() {
        let http = UnconfiguredHttp;
        let scripts = UnconfiguredScripts;
        let internal = NoInternalHandlers;
        let env = env(&http, &scripts, &internal);
        let session = session_with_state(json!({}));
        let node = make_node("a1",
                             NodeType::Action,
                             json!({"actions": [{"type": "api_call", "endpoint": "https://x.test", "auth_type": "external"}]}));
        let result = process(&env, &node, &session);
        assert!(!result.success);
        assert_eq!(result.connection, Some(ConnectionType::Failure));
    }
}
