//! Nodo message: renderiza `content.messages` con sustitución de plantillas
//! y los emite como historial MESSAGE. Transiciona por default.

use serde_json::{json, Value};

use crate::model::{EmittedMessage, Node, Session, StepResult};
use chat_domain::template::substitute_value;

pub fn process(node: &Node, session: &Session) -> StepResult {
    let raw_messages = node.content
                           .get("messages")
                           .and_then(Value::as_array)
                           .cloned()
                           .unwrap_or_default();

    let mut messages = Vec::new();
    let mut rendered_texts = Vec::new();
    let mut media_urls = Vec::new();
    for raw in &raw_messages {
        let kind = raw.get("type").and_then(Value::as_str).unwrap_or("text").to_string();
        let content = raw.get("content").cloned().unwrap_or(Value::Null);
        let rendered = substitute_value(&content, &session.state);
        if let Some(text) = rendered.as_str() {
            rendered_texts.push(text.to_string());
        }
        if kind == "image" || kind == "media" {
            if let Some(url) = rendered.as_str() {
                media_urls.push(url.to_string());
            }
        }
        messages.push(EmittedMessage { kind,
                                       content: rendered,
                                       delay: raw.get("delay").and_then(Value::as_f64) });
    }

    let template_texts: Vec<Value> = raw_messages.iter()
                                                 .filter_map(|m| m.get("content").cloned())
                                                 .collect();
    StepResult { messages,
                 details: json!({
                     "type": "message",
                     "message_template": template_texts,
                     "rendered_message": rendered_texts.join("\n"),
                     "media_urls": media_urls,
                 }),
                 ..StepResult::default() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::testutil::{make_node, session_with_state};
    use chat_domain::types::NodeType;
    use serde_json::json;

    #[test]
    fn renders_templates_and_emits_messages() {
        let session = session_with_state(json!({"user": {"name": "Ada"}}));
        let node = make_node("m1",
                             NodeType::Message,
                             json!({"messages": [{"type": "text", "content": "Hola {{user.name}}", "delay": 1.0}]}));
        let result = process(&node, &session);
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].content, json!("Hola Ada"));
        assert_eq!(result.messages[0].delay, Some(1.0));
        assert_eq!(result.details["rendered_message"], json!("Hola Ada"));
        assert!(!result.expects_input);
    }

    #[test]
    fn missing_messages_list_emits_nothing() {
        let session = session_with_state(json!({}));
        let node = make_node("m1", NodeType::Message, json!({}));
        let result = process(&node, &session);
        assert!(result.messages.is_empty());
        assert!(result.success);
    }
}
