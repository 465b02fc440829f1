//! Nodo composite: referencia a un sub-grafo. Ejecuta en línea la lista de
//! nodos hijos (`content.children`) y retorna a la continuación del padre al
//! terminar. Los composites no suspenden: un hijo question se registra como
//! error de validación y se continúa.

use serde_json::{json, Value};

use crate::model::{Node, Session, StepResult};
use crate::processor::{process_node, NodeResolver, ProcessEnv};
use chat_domain::state::deep_merge;
use chat_domain::types::NodeType;

pub fn process(env: &ProcessEnv<'_>, resolver: &dyn NodeResolver, node: &Node, session: &Session) -> StepResult {
    let children: Vec<String> = node.content
                                    .get("children")
                                    .or_else(|| node.content.get("nodes"))
                                    .and_then(Value::as_array)
                                    .map(|c| c.iter().filter_map(Value::as_str).map(str::to_string).collect())
                                    .unwrap_or_default();

    let mut result = StepResult::default();
    let mut executed = Vec::new();
    // Cada hijo ve el estado con las escrituras de los anteriores aplicadas
    let mut working = session.clone();

    for child_id in &children {
        let child = match resolver.resolve(child_id) {
            Ok(child) => child,
            Err(err) => {
                result.errors.push(format!("composite child '{child_id}': {err}"));
                result.success = false;
                continue;
            }
        };
        if child.node_type == NodeType::Question {
            result.errors
                  .push(format!("composite child '{child_id}' is a question node; composites do not suspend"));
            result.success = false;
            executed.push(json!({"node_id": child_id, "status": "skipped"}));
            continue;
        }
        let child_result = process_node(env, resolver, &child, &working, None);
        deep_merge(&mut working.state, &child_result.variables);
        deep_merge(&mut result.variables, &child_result.variables);
        result.messages.extend(child_result.messages);
        if !child_result.success {
            result.success = false;
        }
        result.errors.extend(child_result.errors);
        executed.push(json!({
            "node_id": child_id,
            "type": child.node_type.as_str(),
            "success": child_result.success,
        }));
    }

    result.details = json!({
        "type": "composite",
        "children_executed": executed,
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{NoInternalHandlers, UnconfiguredHttp, UnconfiguredScripts};
    use crate::errors::EngineError;
    use crate::processor::testutil::{env, make_node, session_with_state};
    use serde_json::json;
    use std::collections::HashMap;

    struct MapResolver(HashMap<String, Node>);
    impl NodeResolver for MapResolver {
        fn resolve(&self, node_id: &str) -> Result<Node, EngineError> {
            self.0
                .get(node_id)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(format!("node '{node_id}'")))
        }
    }

    #[test]
    fn children_run_in_order_and_share_writes() {
        let http = UnconfiguredHttp;
        let scripts = UnconfiguredScripts;
        let internal = NoInternalHandlers;
        let env = env(&http, &scripts, &internal);

        let mut nodes = HashMap::new();
        nodes.insert("set".to_string(),
                     make_node("set",
                               NodeType::Action,
                               json!({"actions": [{"type": "set_variable", "variable": "temp.greeting", "value": "hola"}]})));
        nodes.insert("say".to_string(),
                     make_node("say",
                               NodeType::Message,
                               json!({"messages": [{"type": "text", "content": "{{temp.greeting}} mundo"}]})));
        let resolver = MapResolver(nodes);

        let session = session_with_state(json!({}));
        let composite = make_node("c1", NodeType::Composite, json!({"children": ["set", "say"]}));
        let result = process(&env, &resolver, &composite, &session);

        assert!(result.success);
        assert_eq!(result.variables["temp"]["greeting"], json!("hola"));
        // el hijo message vio la escritura del hijo action
        assert_eq!(result.messages[0].content, json!("hola mundo"));
    }

    #[test]
    fn question_children_are_rejected() {
        let http = UnconfiguredHttp;
        let scripts = UnconfiguredScripts;
        let internal = NoInternalHandlers;
        let env = env(&http, &scripts, &internal);

        let mut nodes = HashMap::new();
        nodes.insert("q".to_string(), make_node("q", NodeType::Question, json!({"question": "?"})));
        let resolver = MapResolver(nodes);

        let session = session_with_state(json!({}));
        let composite = make_node("c1", NodeType::Composite, json!({"children": ["q"]}));
        let result = process(&env, &resolver, &composite, &session);
        assert!(!result.success);
        assert!(result.errors[0].contains("do not suspend"));
    }
}
