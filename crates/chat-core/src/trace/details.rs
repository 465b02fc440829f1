//! Helpers de los `execution_details` tipados por clase de nodo.
//!
//! Redacción de headers sensibles, truncado de cuerpos grandes y previews de
//! código. Los procesadores construyen sus detalles con estos helpers para
//! que la traza nunca contenga credenciales ni payloads desbordados.

use serde_json::{json, Map, Value};

use crate::constants::{CONSOLE_LOG_LIMIT, RESPONSE_BODY_LIMIT_BYTES, TRACE_PREVIEW_CHARS};

/// Headers que siempre se redactan en la traza.
const SENSITIVE_HEADERS: [&str; 4] = ["authorization", "x-api-key", "cookie", "x-auth-token"];

/// Redacta headers de autenticación (case-insensitive).
pub fn redact_headers(headers: &Value) -> Value {
    match headers.as_object() {
        Some(map) => {
            let redacted: Map<String, Value> =
                map.iter()
                   .map(|(key, value)| {
                       if SENSITIVE_HEADERS.contains(&key.to_ascii_lowercase().as_str()) {
                           (key.clone(), json!("[REDACTED]"))
                       } else {
                           (key.clone(), value.clone())
                       }
                   })
                   .collect();
            Value::Object(redacted)
        }
        None => json!({}),
    }
}

/// Resume cuerpos de respuesta por encima de 1 KiB.
pub fn truncate_response_body(body: &Value) -> Value {
    let rendered = body.to_string();
    if rendered.len() <= RESPONSE_BODY_LIMIT_BYTES {
        return body.clone();
    }
    let preview: String = rendered.chars().take(TRACE_PREVIEW_CHARS).collect();
    json!({
        "_truncated": true,
        "_size_bytes": rendered.len(),
        "_preview": preview,
    })
}

/// Primeros 500 caracteres de un bloque de código.
pub fn code_preview(code: &str) -> String {
    code.chars().take(TRACE_PREVIEW_CHARS).collect()
}

/// Recorta la lista de logs de consola al límite de la traza.
pub fn limit_console_logs(logs: &[String]) -> Vec<String> {
    logs.iter().take(CONSOLE_LOG_LIMIT).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_headers_are_redacted_case_insensitively() {
        let headers = json!({"Authorization": "Bearer tok", "X-API-Key": "k", "Accept": "json"});
        let out = redact_headers(&headers);
        assert_eq!(out["Authorization"], json!("[REDACTED]"));
        assert_eq!(out["X-API-Key"], json!("[REDACTED]"));
        assert_eq!(out["Accept"], json!("json"));
    }

    #[test]
    fn big_bodies_become_summaries() {
        let body = json!({"blob": "x".repeat(2000)});
        let out = truncate_response_body(&body);
        assert_eq!(out["_truncated"], json!(true));
        assert!(out["_size_bytes"].as_u64().unwrap() > 1024);
        assert!(out["_preview"].as_str().unwrap().len() <= TRACE_PREVIEW_CHARS);
    }

    #[test]
    fn small_bodies_pass_verbatim() {
        let body = json!({"ok": true});
        assert_eq!(truncate_response_body(&body), body);
    }
}
