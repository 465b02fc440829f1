//! Registro de handlers internos para api_call con `auth_type=internal`.
//!
//! Los handlers son closures in-process registradas por prefijo de endpoint
//! (la plataforma anfitriona registra las suyas: recomendaciones, perfiles,
//! evaluaciones). El registro hace match por prefijo más largo, lo que
//! permite montar familias enteras (`/internal/`) y especializar rutas.

use std::collections::BTreeMap;
use std::sync::RwLock;

use log::debug;
use serde_json::Value;

use chat_core::effects::InternalApiHandler;
use chat_core::errors::EngineError;

/// Firma de un handler interno.
pub type HandlerFn = Box<dyn Fn(&str, &str, &Value, &[(String, String)]) -> Result<Value, EngineError> + Send + Sync>;

/// Registro de handlers por prefijo de endpoint.
#[derive(Default)]
pub struct InternalHandlerRegistry {
    handlers: RwLock<BTreeMap<String, HandlerFn>>,
}

impl InternalHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra un handler bajo un prefijo (`/internal/recommendations`).
    pub fn register<F>(&self, prefix: &str, handler: F)
        where F: Fn(&str, &str, &Value, &[(String, String)]) -> Result<Value, EngineError> + Send + Sync + 'static
    {
        self.handlers
            .write()
            .expect("registry lock poisoned")
            .insert(prefix.to_string(), Box::new(handler));
    }
}

impl InternalApiHandler for InternalHandlerRegistry {
    fn call(&self,
            endpoint: &str,
            method: &str,
            body: &Value,
            query: &[(String, String)])
            -> Result<Value, EngineError> {
        let handlers = self.handlers.read().expect("registry lock poisoned");
        // prefijo más largo primero
        let matched = handlers.iter()
                              .filter(|(prefix, _)| endpoint.starts_with(prefix.as_str()))
                              .max_by_key(|(prefix, _)| prefix.len());
        match matched {
            Some((prefix, handler)) => {
                debug!("internal handler '{prefix}' serving {method} {endpoint}");
                handler(endpoint, method, body, query)
            }
            None => Err(EngineError::Remote(format!("no internal handler registered for {endpoint}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn longest_prefix_wins() {
        let registry = InternalHandlerRegistry::new();
        registry.register("/internal/", |_, _, _, _| Ok(json!({"handler": "generic"})));
        registry.register("/internal/recommendations", |_, _, _, _| Ok(json!({"handler": "recs"})));

        let out = registry.call("/internal/recommendations", "POST", &json!({}), &[]).unwrap();
        assert_eq!(out["handler"], json!("recs"));
        let out = registry.call("/internal/profiles", "GET", &json!({}), &[]).unwrap();
        assert_eq!(out["handler"], json!("generic"));
    }

    #[test]
    fn unregistered_endpoint_is_a_remote_error() {
        let registry = InternalHandlerRegistry::new();
        let err = registry.call("/nope", "POST", &json!({}), &[]).unwrap_err();
        assert!(matches!(err, EngineError::Remote(_)));
    }

    #[test]
    fn handlers_see_body_and_query() {
        let registry = InternalHandlerRegistry::new();
        registry.register("/echo", |_, method, body, query| {
                    Ok(json!({"method": method, "body": body, "query": query.len()}))
                });
        let out = registry.call("/echo", "PUT", &json!({"x": 1}), &[("a".into(), "b".into())]).unwrap();
        assert_eq!(out["method"], json!("PUT"));
        assert_eq!(out["body"], json!({"x": 1}));
        assert_eq!(out["query"], json!(1));
    }
}
