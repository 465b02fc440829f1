//! Operación `aggregate`: agregaciones sobre listas en la bolsa de estado.
//!
//! `source` es una ruta punteada a una lista; `field` (opcional, también
//! punteada) proyecta cada elemento antes de operar. Operaciones numéricas:
//! sum/avg/min/max; count es cardinalidad; collect concatena (aplanando un
//! nivel cuando el proyectado es lista); merge combina dicts con estrategia
//! sum/max/last.

use serde_json::{Map, Number, Value};

use chat_domain::state::get_path;

/// Spec ya parseada de una acción aggregate.
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub source: String,
    pub field: Option<String>,
    pub operation: String,
    pub target: String,
    pub merge_strategy: String,
}

impl AggregateSpec {
    pub fn parse(action: &Value) -> Result<AggregateSpec, String> {
        let source = action.get("source")
                           .and_then(Value::as_str)
                           .ok_or("aggregate action missing 'source'")?;
        let target = action.get("target")
                           .and_then(Value::as_str)
                           .ok_or("aggregate action missing 'target'")?;
        let operation = action.get("operation")
                              .and_then(Value::as_str)
                              .ok_or("aggregate action missing 'operation'")?;
        Ok(AggregateSpec { source: source.to_string(),
                           field: action.get("field").and_then(Value::as_str).map(str::to_string),
                           operation: operation.to_string(),
                           target: target.to_string(),
                           merge_strategy: action.get("merge_strategy")
                                                 .and_then(Value::as_str)
                                                 .unwrap_or("last")
                                                 .to_string() })
    }
}

/// Número JSON desde f64, preservando enteros cuando es exacto.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn project<'a>(item: &'a Value, field: &Option<String>) -> Option<&'a Value> {
    match field {
        Some(path) => get_path(item, path),
        None => Some(item),
    }
}

fn numeric_values(items: &[Value], field: &Option<String>) -> Vec<f64> {
    items.iter()
         .filter_map(|item| project(item, field))
         .filter_map(Value::as_f64)
         .collect()
}

/// Ejecuta la agregación y devuelve el valor a escribir en `target`.
pub fn aggregate(state: &Value, spec: &AggregateSpec) -> Result<Value, String> {
    let source = get_path(state, &spec.source)
        .ok_or_else(|| format!("aggregate source '{}' not found in state", spec.source))?;
    let items = source.as_array()
                      .ok_or_else(|| format!("aggregate source '{}' is not a list", spec.source))?;

    match spec.operation.as_str() {
        "sum" => Ok(number_value(numeric_values(items, &spec.field).iter().sum())),
        "count" => Ok(Value::Number(Number::from(items.len() as i64))),
        "avg" => {
            let values = numeric_values(items, &spec.field);
            if values.is_empty() {
                return Err(format!("aggregate avg over empty list '{}'", spec.source));
            }
            Ok(number_value(values.iter().sum::<f64>() / values.len() as f64))
        }
        "min" | "max" => {
            let values = numeric_values(items, &spec.field);
            if values.is_empty() {
                return Err(format!("aggregate {} over empty list '{}'", spec.operation, spec.source));
            }
            let folded = if spec.operation == "min" {
                values.iter().cloned().fold(f64::INFINITY, f64::min)
            } else {
                values.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
            };
            Ok(number_value(folded))
        }
        "collect" => {
            let mut collected = Vec::new();
            for item in items {
                match project(item, &spec.field) {
                    // Proyectados lista: se aplana un nivel
                    Some(Value::Array(inner)) => collected.extend(inner.iter().cloned()),
                    Some(value) => collected.push(value.clone()),
                    None => {}
                }
            }
            Ok(Value::Array(collected))
        }
        "merge" => merge_dicts(items, &spec.field, &spec.merge_strategy),
        other => Err(format!("unknown aggregate operation '{other}'")),
    }
}

fn merge_dicts(items: &[Value], field: &Option<String>, strategy: &str) -> Result<Value, String> {
    let mut merged: Map<String, Value> = Map::new();
    for item in items {
        let Some(dict) = project(item, field).and_then(Value::as_object) else {
            continue;
        };
        for (key, value) in dict {
            match strategy {
                "sum" => {
                    // Claves ausentes cuentan como cero
                    let current = merged.get(key).and_then(Value::as_f64).unwrap_or(0.0);
                    let incoming = value.as_f64().unwrap_or(0.0);
                    merged.insert(key.clone(), number_value(current + incoming));
                }
                "max" => match (merged.get(key).and_then(Value::as_f64), value.as_f64()) {
                    (Some(current), Some(incoming)) => {
                        if incoming > current {
                            merged.insert(key.clone(), number_value(incoming));
                        }
                    }
                    (None, Some(incoming)) => {
                        merged.insert(key.clone(), number_value(incoming));
                    }
                    _ => {}
                },
                "last" => {
                    merged.insert(key.clone(), value.clone());
                }
                other => return Err(format!("unknown merge_strategy '{other}'")),
            }
        }
    }
    Ok(Value::Object(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(source: &str, field: Option<&str>, operation: &str, strategy: Option<&str>) -> AggregateSpec {
        AggregateSpec { source: source.into(),
                        field: field.map(str::to_string),
                        operation: operation.into(),
                        target: "out".into(),
                        merge_strategy: strategy.unwrap_or("last").into() }
    }

    #[test]
    fn sum_projects_field_from_objects() {
        let state = json!({"temp": {"quiz": [{"score": 5}, {"score": 8}, {"score": 7}]}});
        let out = aggregate(&state, &spec("temp.quiz", Some("score"), "sum", None)).unwrap();
        assert_eq!(out, json!(20));
    }

    #[test]
    fn merge_max_keeps_per_key_maximum() {
        let state = json!({"temp": {"a": [{"x": 3, "y": 5}, {"x": 4, "y": 3}, {"x": 2, "z": 9}]}});
        let out = aggregate(&state, &spec("temp.a", None, "merge", Some("max"))).unwrap();
        assert_eq!(out, json!({"x": 4, "y": 5, "z": 9}));
    }

    #[test]
    fn min_over_empty_list_is_a_typed_error() {
        let state = json!({"temp": {"xs": []}});
        let err = aggregate(&state, &spec("temp.xs", None, "min", None)).unwrap_err();
        assert!(err.contains("empty list"));
        // sum y count sí tienen valor definido para lista vacía
        assert_eq!(aggregate(&state, &spec("temp.xs", None, "sum", None)).unwrap(), json!(0));
        assert_eq!(aggregate(&state, &spec("temp.xs", None, "count", None)).unwrap(), json!(0));
    }

    #[test]
    fn collect_flattens_one_level() {
        let state = json!({"temp": {"sel": [{"tags": ["a", "b"]}, {"tags": ["c"]}]}});
        let out = aggregate(&state, &spec("temp.sel", Some("tags"), "collect", None)).unwrap();
        assert_eq!(out, json!(["a", "b", "c"]));
    }

    #[test]
    fn missing_source_is_an_error() {
        let state = json!({});
        assert!(aggregate(&state, &spec("temp.nope", None, "sum", None)).is_err());
    }
}
