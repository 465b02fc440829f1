//! Bolsa de estado jerárquica: lectura/escritura por ruta punteada y
//! deep-merge.
//!
//! El estado de una sesión es un `serde_json::Value` arbitrario con tres
//! raíces reservadas (`user`, `temp`, `context`). Las escrituras crean los
//! mapas intermedios que falten; las lecturas de rutas ausentes devuelven
//! `None` (los predicados tratan null como falsy).

use serde_json::{Map, Value};

/// Raíces reservadas de la bolsa de estado.
pub const RESERVED_ROOTS: [&str; 3] = ["user", "temp", "context"];

/// Lee la ruta punteada `path` dentro de `state`.
pub fn get_path<'a>(state: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = state;
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Escribe `value` en la ruta punteada `path`, creando mapas intermedios.
/// Un valor intermedio que no sea mapa se reemplaza por uno (la escritura
/// del autor del flujo gana sobre el escalar previo).
pub fn set_path(state: &mut Value, path: &str, value: Value) {
    if !state.is_object() {
        *state = Value::Object(Map::new());
    }
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return;
    }
    let mut current = state;
    for segment in &segments[..segments.len() - 1] {
        let map = current.as_object_mut().expect("current siempre es objeto aquí");
        let entry = map.entry(segment.to_string()).or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry;
    }
    let map = current.as_object_mut().expect("current siempre es objeto aquí");
    map.insert(segments[segments.len() - 1].to_string(), value);
}

/// Deep-merge de `incoming` sobre `original`, in place.
///
/// Semántica: para claves presentes en ambos, si los dos valores son objetos
/// se recursa; en cualquier otro caso `incoming` reemplaza. Claves nuevas se
/// insertan.
pub fn deep_merge(original: &mut Value, incoming: &Value) {
    match (original, incoming) {
        (Value::Object(orig), Value::Object(inc)) => {
            for (key, value) in inc {
                match orig.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value);
                    }
                    Some(existing) => *existing = value.clone(),
                    None => {
                        orig.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (original, incoming) => *original = incoming.clone(),
    }
}

/// Garantiza que `user`, `temp` y `context` existan como objetos.
pub fn ensure_roots(state: &mut Value) {
    if !state.is_object() {
        *state = Value::Object(Map::new());
    }
    let map = state.as_object_mut().expect("acabamos de garantizar objeto");
    for root in RESERVED_ROOTS {
        let entry = map.entry(root.to_string()).or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_path_reads_nested_values() {
        let state = json!({"user": {"profile": {"age": 9}}});
        assert_eq!(get_path(&state, "user.profile.age"), Some(&json!(9)));
        assert_eq!(get_path(&state, "user.missing"), None);
        assert_eq!(get_path(&state, "user.profile.age.deeper"), None);
    }

    #[test]
    fn set_path_creates_intermediate_maps() {
        let mut state = json!({});
        set_path(&mut state, "results.total", json!(20));
        assert_eq!(state, json!({"results": {"total": 20}}));
    }

    #[test]
    fn set_path_replaces_scalar_intermediates() {
        let mut state = json!({"temp": 1});
        set_path(&mut state, "temp.x", json!(true));
        assert_eq!(state, json!({"temp": {"x": true}}));
    }

    #[test]
    fn deep_merge_recurses_into_maps_and_replaces_scalars() {
        let mut original = json!({"user": {"name": "a", "age": 8}, "keep": 1});
        let incoming = json!({"user": {"age": 9}, "new": true});
        deep_merge(&mut original, &incoming);
        assert_eq!(original, json!({"user": {"name": "a", "age": 9}, "keep": 1, "new": true}));
    }

    #[test]
    fn deep_merge_replaces_list_wholesale() {
        let mut original = json!({"xs": [1, 2, 3]});
        deep_merge(&mut original, &json!({"xs": [9]}));
        assert_eq!(original, json!({"xs": [9]}));
    }

    #[test]
    fn ensure_roots_is_idempotent() {
        let mut state = json!({"context": {"school_id": 5}});
        ensure_roots(&mut state);
        ensure_roots(&mut state);
        assert_eq!(state["context"], json!({"school_id": 5}));
        assert!(state["user"].is_object());
        assert!(state["temp"].is_object());
    }
}
