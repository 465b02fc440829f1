//! Nodo condition: evalúa `content.conditions[i].if` en orden de
//! declaración; el primero verdadero elige la conexión `$i`; ninguno →
//! default. Cada evaluación queda registrada para la traza.

use serde_json::{json, Value};

use crate::model::{Node, Session, StepResult};
use chat_domain::predicate::Predicate;
use chat_domain::types::ConnectionType;

pub fn process(node: &Node, session: &Session) -> StepResult {
    let conditions = node.content
                         .get("conditions")
                         .and_then(Value::as_array)
                         .cloned()
                         .unwrap_or_default();

    let mut evaluated = Vec::new();
    let mut matched: Option<usize> = None;
    let mut errors = Vec::new();

    for (index, condition) in conditions.iter().enumerate() {
        let expression = condition.get("if").cloned().unwrap_or(Value::Null);
        let (result, error) = match Predicate::parse(&expression) {
            Ok(predicate) => (predicate.eval(&session.state), None),
            Err(err) => (false, Some(err.to_string())),
        };
        if let Some(err) = &error {
            errors.push(format!("condition {index}: {err}"));
        }
        evaluated.push(json!({
            "index": index,
            "expression": expression,
            "result": result,
            "error": error,
        }));
        if matched.is_none() && result {
            matched = Some(index);
        }
    }

    let connection = match matched {
        Some(index) => match ConnectionType::option(index) {
            Some(conn) => conn,
            None => {
                // Solo existen tokens $0/$1; índices mayores caen en default
                log::warn!("condition node '{}' matched index {} beyond option connections", node.node_id, index);
                ConnectionType::Default
            }
        },
        None => ConnectionType::Default,
    };

    StepResult { connection: Some(connection),
                 errors,
                 details: json!({
                     "type": "condition",
                     "conditions_evaluated": evaluated,
                     "matched_condition_index": matched,
                     "connection_taken": connection.as_str(),
                 }),
                 ..StepResult::default() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::testutil::{make_node, session_with_state};
    use chat_domain::types::NodeType;
    use serde_json::json;

    fn condition_node(conditions: Value) -> Node {
        make_node("c1", NodeType::Condition, json!({"conditions": conditions}))
    }

    #[test]
    fn first_truthy_condition_selects_its_option() {
        let session = session_with_state(json!({"user": {"age": 9}}));
        let node = condition_node(json!([
            {"if": {"var": "user.age", "op": "<", "value": 8}},
            {"if": {"var": "user.age", "op": ">=", "value": 8}},
        ]));
        let result = process(&node, &session);
        assert_eq!(result.connection, Some(ConnectionType::Option1));
        assert_eq!(result.details["matched_condition_index"], json!(1));
        let evaluated = result.details["conditions_evaluated"].as_array().unwrap();
        assert_eq!(evaluated.len(), 2);
        assert_eq!(evaluated[0]["result"], json!(false));
        assert_eq!(evaluated[1]["result"], json!(true));
    }

    #[test]
    fn no_truthy_condition_falls_to_default() {
        let session = session_with_state(json!({}));
        let node = condition_node(json!([{"if": {"var": "user.age", "op": ">", "value": 100}}]));
        let result = process(&node, &session);
        assert_eq!(result.connection, Some(ConnectionType::Default));
        assert_eq!(result.details["matched_condition_index"], json!(null));
    }

    #[test]
    fn malformed_predicates_record_errors_and_count_as_false() {
        let session = session_with_state(json!({}));
        let node = condition_node(json!([{"if": {"op": "=="}}]));
        let result = process(&node, &session);
        assert_eq!(result.connection, Some(ConnectionType::Default));
        assert_eq!(result.errors.len(), 1);
    }
}
