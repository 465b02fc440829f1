//! Ejecutor HTTP saliente sobre reqwest (blocking).
//!
//! El timeout del request es el deadline del nodo: excederlo es un error
//! Timeout que el procesador registra y enruta por failure. Respuestas
//! no-JSON se devuelven como string crudo.

use std::time::Instant;

use log::debug;
use serde_json::Value;

use chat_core::effects::{HttpExecutor, HttpRequestSpec, HttpResponseData};
use chat_core::errors::EngineError;

#[derive(Debug, Default)]
pub struct ReqwestHttpExecutor;

impl ReqwestHttpExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl HttpExecutor for ReqwestHttpExecutor {
    fn execute(&self, request: &HttpRequestSpec) -> Result<HttpResponseData, EngineError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(request.timeout)
            .build()
            .map_err(|e| EngineError::Internal(format!("http client build: {e}")))?;

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| EngineError::Validation(format!("invalid http method '{}'", request.method)))?;

        let mut builder = client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let started = Instant::now();
        let response = builder.send().map_err(|e| {
                                         if e.is_timeout() {
                                             EngineError::Timeout(format!("request to {} timed out", request.url))
                                         } else {
                                             EngineError::Remote(format!("request to {} failed: {e}", request.url))
                                         }
                                     })?;
        let status = response.status().as_u16();
        let text = response.text()
                           .map_err(|e| EngineError::Remote(format!("reading response body: {e}")))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        let duration_ms = started.elapsed().as_millis() as i64;
        debug!("http {} {} -> {} in {}ms", request.method, request.url, status, duration_ms);
        Ok(HttpResponseData { status, body, duration_ms })
    }
}
