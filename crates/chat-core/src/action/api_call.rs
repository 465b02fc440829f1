//! Acción `api_call`: llamada HTTP saliente o despacho a un handler interno.
//!
//! Pipeline del payload: sustitución de plantillas contra el estado efectivo
//! → stripping de tokens sin resolver (colapsan a null) → envío. En éxito se
//! aplica `response_mapping` (ruta destino ← ruta del campo de respuesta)
//! sobre las variables pendientes; en fallo, `fallback_response` (si existe)
//! se trata como si fuera la respuesta y la acción cuenta como absorbida.

use std::collections::BTreeMap;
use std::time::Duration;

use log::warn;
use serde_json::Value;

use crate::constants::DEFAULT_WEBHOOK_TIMEOUT_MS;
use crate::effects::{HttpExecutor, HttpRequestSpec, InternalApiHandler};
use chat_domain::state::get_path;
use chat_domain::template::{strip_unresolved, substitute, substitute_value};

/// Resultado de una api_call ya resuelto a variables.
#[derive(Debug, Clone)]
pub struct ApiCallResult {
    /// Escrituras derivadas del response_mapping.
    pub variables: Vec<(String, Value)>,
    /// Error no absorbido por fallback (None = éxito o absorbido).
    pub error: Option<String>,
    /// Registro para la traza (endpoint, estado, fallback usado).
    pub detail: Value,
}

fn mapping_pairs(mapping: &Value) -> Vec<(String, String)> {
    mapping.as_object()
           .map(|m| {
               m.iter()
                .filter_map(|(target, source)| source.as_str().map(|s| (target.clone(), s.to_string())))
                .collect()
           })
           .unwrap_or_default()
}

/// Aplica el response_mapping sobre una respuesta. Las rutas de origen
/// aceptan el prefijo opcional `response.`.
fn apply_mapping(response: &Value, mapping: &Value) -> Vec<(String, Value)> {
    mapping_pairs(mapping).into_iter()
                          .map(|(target, source)| {
                              let path = source.strip_prefix("response.").unwrap_or(&source);
                              let value = get_path(response, path).cloned().unwrap_or(Value::Null);
                              (target, value)
                          })
                          .collect()
}

fn query_pairs(query: &Value) -> Vec<(String, String)> {
    query.as_object()
         .map(|m| {
             m.iter()
              .map(|(k, v)| {
                  let rendered = match v {
                      Value::String(s) => s.clone(),
                      Value::Null => String::new(),
                      other => other.to_string(),
                  };
                  (k.clone(), rendered)
              })
              .collect()
         })
         .unwrap_or_default()
}

fn header_pairs(headers: &Value) -> BTreeMap<String, String> {
    headers.as_object()
           .map(|m| {
               m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
           })
           .unwrap_or_default()
}

/// Ejecuta una acción api_call contra el estado efectivo.
pub fn run_api_call(http: &dyn HttpExecutor,
                    internal: &dyn InternalApiHandler,
                    state: &Value,
                    action: &Value)
                    -> ApiCallResult {
    let Some(endpoint_raw) = action.get("endpoint").and_then(Value::as_str) else {
        return ApiCallResult { variables: Vec::new(),
                               error: Some("api_call action missing 'endpoint'".into()),
                               detail: Value::Null };
    };
    let endpoint = substitute(endpoint_raw, state);
    let method = action.get("method").and_then(Value::as_str).unwrap_or("POST").to_uppercase();
    let auth_type = action.get("auth_type").and_then(Value::as_str).unwrap_or("internal");

    // Plantillas resueltas y luego stripping: nunca sale un `{{…}}` literal
    let body = action.get("body")
                     .map(|b| strip_unresolved(&substitute_value(b, state)))
                     .unwrap_or(Value::Null);
    let query = action.get("query_params")
                      .map(|q| strip_unresolved(&substitute_value(q, state)))
                      .unwrap_or(Value::Null);
    let headers = action.get("headers")
                        .map(|h| substitute_value(h, state))
                        .unwrap_or(Value::Null);
    let mapping = action.get("response_mapping").cloned().unwrap_or(Value::Null);
    let query_list = query_pairs(&query);

    let outcome = if auth_type == "internal" {
        internal.call(&endpoint, &method, &body, &query_list)
    } else {
        let request = HttpRequestSpec { method: method.clone(),
                                        url: endpoint.clone(),
                                        headers: header_pairs(&headers),
                                        query: query_list,
                                        body: if body.is_null() { None } else { Some(body.clone()) },
                                        timeout: Duration::from_millis(action.get("timeout")
                                                                             .and_then(Value::as_u64)
                                                                             .unwrap_or(DEFAULT_WEBHOOK_TIMEOUT_MS)) };
        http.execute(&request).and_then(|resp| {
                                   if (200..300).contains(&resp.status) {
                                       Ok(resp.body)
                                   } else {
                                       Err(crate::errors::EngineError::Remote(format!("api_call {} returned status {}",
                                                                                      endpoint, resp.status)))
                                   }
                               })
    };

    match outcome {
        Ok(response) => ApiCallResult { variables: apply_mapping(&response, &mapping),
                                        error: None,
                                        detail: serde_json::json!({
                                            "endpoint": endpoint,
                                            "method": method,
                                            "auth_type": auth_type,
                                            "status": "ok",
                                        }) },
        Err(err) => {
            // fallback_response: sus contenidos cuentan como la respuesta
            if let Some(fallback) = action.get("fallback_response") {
                warn!("api_call {endpoint} failed, using fallback_response: {err}");
                return ApiCallResult { variables: apply_mapping(fallback, &mapping),
                                       error: None,
                                       detail: serde_json::json!({
                                           "endpoint": endpoint,
                                           "method": method,
                                           "auth_type": auth_type,
                                           "status": "fallback",
                                           "error": err.to_string(),
                                       }) };
            }
            ApiCallResult { variables: Vec::new(),
                            error: Some(err.to_string()),
                            detail: serde_json::json!({
                                "endpoint": endpoint,
                                "method": method,
                                "auth_type": auth_type,
                                "status": "error",
                                "error": err.to_string(),
                            }) }
        }
    }
}
