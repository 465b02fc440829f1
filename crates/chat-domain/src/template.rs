//! Sustitución de plantillas `{{ruta.en.estado}}`.
//!
//! Dos pasadas que comparten el mismo tokenizador (regex):
//! - `substitute`/`substitute_value`: reemplaza tokens resolubles por su
//!   valor y deja intactos los que no resuelven (quedan "sin resolver").
//! - `strip_unresolved`: pasada previa a cualquier llamada saliente; todo
//!   string que aún contenga `{{…}}` (solo o con texto alrededor) colapsa a
//!   `null` para no filtrar placeholders literales.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::state::get_path;

static TEMPLATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("regex de plantilla válida"));

/// Renderiza un valor para interpolarlo dentro de texto.
fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Sustituye todos los tokens resolubles de `template` mirando `state`.
/// Los tokens cuya ruta no existe se conservan tal cual (sin resolver).
pub fn substitute(template: &str, state: &Value) -> String {
    TEMPLATE_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let path = &caps[1];
            match get_path(state, path) {
                Some(value) => render_scalar(value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Sustitución recursiva sobre un `Value` arbitrario.
///
/// Un string que es exactamente un token (`"{{context.school_id}}"`) se
/// reemplaza por el valor tipado (número, objeto...), no por su forma en
/// texto; strings con texto alrededor se interpolan. Objetos y listas se
/// recorren; el resto pasa sin cambios.
pub fn substitute_value(value: &Value, state: &Value) -> Value {
    match value {
        Value::String(s) => {
            if let Some(caps) = TEMPLATE_RE.captures(s) {
                if caps.get(0).map(|m| m.as_str().len()) == Some(s.trim().len()) {
                    return match get_path(state, &caps[1]) {
                        Some(resolved) => resolved.clone(),
                        None => value.clone(),
                    };
                }
            }
            Value::String(substitute(s, state))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_value(v, state)).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), substitute_value(v, state))).collect())
        }
        other => other.clone(),
    }
}

/// ¿Contiene el string al menos un token de plantilla?
pub fn contains_template(text: &str) -> bool {
    TEMPLATE_RE.is_match(text)
}

/// Reemplaza recursivamente todo string con `{{…}}` por `null`.
///
/// Regla de stripping: tanto el string puro-token como el que mezcla token y
/// texto colapsan enteros a `null`. Escalares no-string pasan intactos.
pub fn strip_unresolved(value: &Value) -> Value {
    match value {
        Value::String(s) if contains_template(s) => Value::Null,
        Value::Array(items) => Value::Array(items.iter().map(strip_unresolved).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), strip_unresolved(v))).collect()),
        other => other.clone(),
    }
}
