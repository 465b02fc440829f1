//! Nodo question: renderiza el prompt y suspende el runtime si aún no hay
//! input. Al reanudar escribe `content.variable` en la ruta indicada y
//! transiciona: choice → conexión `$i` del índice elegido; text → default.

use serde_json::{json, Map, Value};

use crate::model::{EmittedMessage, Node, Session, StepResult, UserInput};
use chat_domain::state::set_path;
use chat_domain::template::substitute;
use chat_domain::types::{ConnectionType, InputKind};

fn question_text(node: &Node) -> String {
    node.content
        .get("question")
        .or_else(|| node.content.get("text"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn input_kind(node: &Node) -> InputKind {
    node.content
        .get("input_type")
        .and_then(Value::as_str)
        .and_then(InputKind::parse)
        .unwrap_or(InputKind::Text)
}

fn options(node: &Node) -> Vec<Value> {
    node.content.get("options").and_then(Value::as_array).cloned().unwrap_or_default()
}

/// Busca la opción elegida: por `value`, por `label`/`text`, o por índice
/// numérico del input.
fn match_option(options: &[Value], input: &str) -> Option<(usize, Value)> {
    for (index, option) in options.iter().enumerate() {
        match option {
            Value::String(s) if s == input => return Some((index, option.clone())),
            Value::Object(map) => {
                let value = map.get("value");
                let label = map.get("label").or_else(|| map.get("text"));
                if value.and_then(Value::as_str) == Some(input) || label.and_then(Value::as_str) == Some(input) {
                    return Some((index, value.cloned().unwrap_or_else(|| option.clone())));
                }
            }
            _ => {}
        }
    }
    // Índice posicional como último recurso ("0", "1", ...)
    input.parse::<usize>().ok().and_then(|index| {
                                    options.get(index).map(|option| {
                                                          let value = option.get("value")
                                                                            .cloned()
                                                                            .unwrap_or_else(|| option.clone());
                                                          (index, value)
                                                      })
                                })
}

pub fn process(node: &Node, session: &Session, input: Option<&UserInput>) -> StepResult {
    let rendered = substitute(&question_text(node), &session.state);
    let kind = input_kind(node);
    let opts = options(node);

    let options_value = if opts.is_empty() { Value::Null } else { json!(opts.clone()) };

    let Some(input) = input else {
        // Sin input: emitir el prompt y suspender
        return StepResult { expects_input: true,
                            input_type: Some(kind),
                            messages: vec![EmittedMessage { kind: "text".into(),
                                                            content: json!(rendered.clone()),
                                                            delay: None }],
                            prompt: Some(json!({
                                "question": rendered.clone(),
                                "input_type": kind.as_str(),
                                "options": options_value.clone(),
                            })),
                            connection: None,
                            details: json!({
                                "type": "question",
                                "question_text": question_text(node),
                                "rendered_question": rendered,
                                "options": options_value,
                                "input_type": kind.as_str(),
                            }),
                            ..StepResult::default() };
    };

    let mut variables = Value::Object(Map::new());
    let mut errors = Vec::new();
    let variable_path = node.content.get("variable").and_then(Value::as_str);

    let (connection, stored_value) = match kind {
        InputKind::Choice => match match_option(&opts, &input.value) {
            Some((index, value)) => {
                let connection = ConnectionType::option(index).unwrap_or(ConnectionType::Default);
                (connection, value)
            }
            None => {
                errors.push(format!("input '{}' does not match any option", input.value));
                (ConnectionType::Default, json!(input.value))
            }
        },
        InputKind::Text => (ConnectionType::Default, json!(input.value)),
    };

    match variable_path {
        Some(path) => set_path(&mut variables, path, stored_value.clone()),
        None => errors.push(format!("question node '{}' has no 'variable' target", node.node_id)),
    }

    StepResult { success: errors.is_empty(),
                 variables,
                 connection: Some(connection),
                 errors,
                 details: json!({
                     "type": "question",
                     "question_text": question_text(node),
                     "rendered_question": rendered,
                     "options": options_value,
                     "user_response": input.value,
                     "input_type": kind.as_str(),
                 }),
                 ..StepResult::default() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::testutil::{make_node, session_with_state};
    use chat_domain::types::NodeType;
    use serde_json::json;

    fn question_node(content: Value) -> Node {
        make_node("q1", NodeType::Question, content)
    }

    #[test]
    fn suspends_with_rendered_prompt_when_no_input() {
        let session = session_with_state(json!({"user": {"name": "Ada"}}));
        let node = question_node(json!({"question": "¿Listo, {{user.name}}?", "input_type": "text", "variable": "user.ready"}));
        let result = process(&node, &session, None);
        assert!(result.expects_input);
        assert_eq!(result.input_type, Some(InputKind::Text));
        assert_eq!(result.prompt.as_ref().unwrap()["question"], json!("¿Listo, Ada?"));
        assert!(result.connection.is_none());
    }

    #[test]
    fn text_answer_writes_variable_and_takes_default() {
        let session = session_with_state(json!({}));
        let node = question_node(json!({"question": "¿Nombre?", "input_type": "text", "variable": "user.name"}));
        let input = UserInput { value: "Ada".into(), input_type: InputKind::Text };
        let result = process(&node, &session, Some(&input));
        assert!(result.success);
        assert_eq!(result.variables["user"]["name"], json!("Ada"));
        assert_eq!(result.connection, Some(ConnectionType::Default));
    }

    #[test]
    fn choice_answer_selects_option_connection() {
        let session = session_with_state(json!({}));
        let node = question_node(json!({
            "question": "¿Género?",
            "input_type": "choice",
            "variable": "user.genre",
            "options": [
                {"label": "Aventura", "value": "adventure"},
                {"label": "Misterio", "value": "mystery"},
            ],
        }));
        let input = UserInput { value: "mystery".into(), input_type: InputKind::Choice };
        let result = process(&node, &session, Some(&input));
        assert_eq!(result.connection, Some(ConnectionType::Option1));
        assert_eq!(result.variables["user"]["genre"], json!("mystery"));
    }

    #[test]
    fn unmatched_choice_falls_back_to_default_with_error() {
        let session = session_with_state(json!({}));
        let node = question_node(json!({
            "question": "?",
            "input_type": "choice",
            "variable": "user.pick",
            "options": [{"label": "A", "value": "a"}],
        }));
        let input = UserInput { value: "zzz".into(), input_type: InputKind::Choice };
        let result = process(&node, &session, Some(&input));
        assert!(!result.success);
        assert_eq!(result.connection, Some(ConnectionType::Default));
        // la respuesta cruda se conserva igualmente
        assert_eq!(result.variables["user"]["pick"], json!("zzz"));
    }
}
