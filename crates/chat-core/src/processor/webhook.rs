//! Nodo webhook: request HTTP con URL/headers/body templados. 2xx elige la
//! conexión success, cualquier otra cosa failure. El par request/response
//! queda en la traza con headers sensibles redactados y cuerpos grandes
//! resumidos.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::constants::DEFAULT_WEBHOOK_TIMEOUT_MS;
use crate::effects::HttpRequestSpec;
use crate::model::{Node, Session, StepResult};
use crate::processor::ProcessEnv;
use crate::trace::details::{redact_headers, truncate_response_body};
use chat_domain::pii::PiiMasker;
use chat_domain::template::{strip_unresolved, substitute, substitute_value};
use chat_domain::types::ConnectionType;

pub fn process(env: &ProcessEnv<'_>, node: &Node, session: &Session) -> StepResult {
    let masker = PiiMasker::new();
    let Some(url_raw) = node.content.get("url").and_then(Value::as_str) else {
        return StepResult { success: false,
                            connection: Some(ConnectionType::Failure),
                            errors: vec![format!("webhook node '{}' has no url", node.node_id)],
                            details: json!({"type": "webhook", "error": "missing url"}),
                            ..StepResult::default() };
    };

    let url = substitute(url_raw, &session.state);
    let method = node.content
                     .get("method")
                     .and_then(Value::as_str)
                     .unwrap_or("POST")
                     .to_uppercase();
    let headers_value = node.content
                            .get("headers")
                            .map(|h| substitute_value(h, &session.state))
                            .unwrap_or_else(|| Value::Object(Map::new()));
    let headers: BTreeMap<String, String> =
        headers_value.as_object()
                     .map(|m| {
                         m.iter()
                          .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                          .collect()
                     })
                     .unwrap_or_default();
    let body = node.content
                   .get("body")
                   .map(|b| strip_unresolved(&substitute_value(b, &session.state)));
    let timeout_ms = node.content
                         .get("timeout")
                         .and_then(Value::as_u64)
                         .unwrap_or(DEFAULT_WEBHOOK_TIMEOUT_MS);

    let request = HttpRequestSpec { method: method.clone(),
                                    url: url.clone(),
                                    headers: headers.clone(),
                                    query: Vec::new(),
                                    body: body.clone(),
                                    timeout: Duration::from_millis(timeout_ms) };

    let header_detail = redact_headers(&json!(headers));
    match env.http.execute(&request) {
        Ok(response) => {
            let ok = (200..300).contains(&response.status);
            StepResult { success: ok,
                         connection: Some(if ok { ConnectionType::Success } else { ConnectionType::Failure }),
                         errors: if ok {
                             Vec::new()
                         } else {
                             vec![format!("webhook {} returned status {}", url, response.status)]
                         },
                         details: json!({
                             "type": "webhook",
                             "url": masker.mask_url_credentials(&url),
                             "method": method,
                             "request_headers": header_detail,
                             "response_status": response.status,
                             "response_body": truncate_response_body(&response.body),
                             "duration_ms": response.duration_ms,
                             "error": Value::Null,
                         }),
                         ..StepResult::default() }
        }
        Err(err) => StepResult { success: false,
                                 connection: Some(ConnectionType::Failure),
                                 errors: vec![err.to_string()],
                                 details: json!({
                                     "type": "webhook",
                                     "url": masker.mask_url_credentials(&url),
                                     "method": method,
                                     "request_headers": header_detail,
                                     "response_status": Value::Null,
                                     "response_body": Value::Null,
                                     "duration_ms": Value::Null,
                                     "error": err.to_string(),
                                 }),
                                 ..StepResult::default() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{HttpExecutor, HttpResponseData, NoInternalHandlers, UnconfiguredScripts};
    use crate::errors::EngineError;
    use crate::processor::testutil::{env, make_node, session_with_state};
    use chat_domain::types::NodeType;
    use serde_json::json;
    use std::sync::Mutex;

    /// Doble de HTTP que captura el request y responde con lo configurado.
    struct FakeHttp {
        status: u16,
        body: Value,
        seen: Mutex<Vec<HttpRequestSpec>>,
    }

    impl FakeHttp {
        fn new(status: u16, body: Value) -> Self {
            Self { status, body, seen: Mutex::new(Vec::new()) }
        }
    }

    impl HttpExecutor for FakeHttp {
        fn execute(&self, request: &HttpRequestSpec) -> Result<HttpResponseData, EngineError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(HttpResponseData { status: self.status, body: self.body.clone(), duration_ms: 5 })
        }
    }

    #[test]
    fn two_xx_takes_success_and_redacts_auth_headers() {
        let http = FakeHttp::new(200, json!({"ok": true}));
        let scripts = UnconfiguredScripts;
        let internal = NoInternalHandlers;
        let env = env(&http, &scripts, &internal);
        let session = session_with_state(json!({"context": {"school_id": 7}}));
        let node = make_node("w1",
                             NodeType::Webhook,
                             json!({
                                 "url": "https://api.example.com/schools/{{context.school_id}}",
                                 "method": "GET",
                                 "headers": {"Authorization": "Bearer secret", "Accept": "application/json"},
                             }));
        let result = process(&env, &node, &session);
        assert!(result.success);
        assert_eq!(result.connection, Some(ConnectionType::Success));
        assert_eq!(result.details["request_headers"]["Authorization"], json!("[REDACTED]"));
        assert_eq!(result.details["request_headers"]["Accept"], json!("application/json"));
        // la URL templada llegó resuelta al ejecutor
        let seen = http.seen.lock().unwrap();
        assert_eq!(seen[0].url, "https://api.example.com/schools/7");
    }

    #[test]
    fn non_2xx_takes_failure() {
        let http = FakeHttp::new(500, json!({"error": "boom"}));
        let scripts = UnconfiguredScripts;
        let internal = NoInternalHandlers;
        let env = env(&http, &scripts, &internal);
        let session = session_with_state(json!({}));
        let node = make_node("w1", NodeType::Webhook, json!({"url": "https://api.example.com/x"}));
        let result = process(&env, &node, &session);
        assert!(!result.success);
        assert_eq!(result.connection, Some(ConnectionType::Failure));
        assert_eq!(result.details["response_status"], json!(500));
    }

    #[test]
    fn big_response_bodies_are_summarized() {
        let http = FakeHttp::new(200, json!({"blob": "x".repeat(3000)}));
        let scripts = UnconfiguredScripts;
        let internal = NoInternalHandlers;
        let env = env(&http, &scripts, &internal);
        let session = session_with_state(json!({}));
        let node = make_node("w1", NodeType::Webhook, json!({"url": "https://api.example.com/x"}));
        let result = process(&env, &node, &session);
        assert_eq!(result.details["response_body"]["_truncated"], json!(true));
    }
}
