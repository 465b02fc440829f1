//! AST mínimo de predicados para nodos condition.
//!
//! El grafo guarda cada predicado como JSON opaco; aquí lo interpretamos con
//! una forma estable: `{var, op, value}` con ops `==, !=, <, <=, >, >=, in,
//! contains`, más combinadores `{"and": [...]}` / `{"or": [...]}`. Rutas
//! ausentes evalúan a null y null es falsy en toda comparación.

use serde_json::Value;

use crate::errors::DomainError;
use crate::state::get_path;

/// Operadores de comparación soportados.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Contains,
}

impl PredicateOp {
    fn parse(raw: &str) -> Option<PredicateOp> {
        match raw {
            "==" | "eq" => Some(PredicateOp::Eq),
            "!=" | "ne" => Some(PredicateOp::Ne),
            "<" | "lt" => Some(PredicateOp::Lt),
            "<=" | "le" => Some(PredicateOp::Le),
            ">" | "gt" => Some(PredicateOp::Gt),
            ">=" | "ge" => Some(PredicateOp::Ge),
            "in" => Some(PredicateOp::In),
            "contains" => Some(PredicateOp::Contains),
            _ => None,
        }
    }
}

/// Predicado compilado desde su forma JSON.
#[derive(Debug, Clone)]
pub enum Predicate {
    Compare { var: String, op: PredicateOp, value: Value },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Compila el JSON de un predicado. Formas aceptadas:
    /// `{"var": "user.age", "op": ">=", "value": 8}`,
    /// `{"and": [p1, p2]}`, `{"or": [p1, p2]}`.
    pub fn parse(raw: &Value) -> Result<Predicate, DomainError> {
        let obj = raw.as_object().ok_or_else(|| DomainError::Predicate("el predicado debe ser un objeto".into()))?;

        if let Some(branches) = obj.get("and") {
            return Self::parse_branches(branches, "and").map(Predicate::And);
        }
        if let Some(branches) = obj.get("or") {
            return Self::parse_branches(branches, "or").map(Predicate::Or);
        }

        let var = obj.get("var")
                     .and_then(Value::as_str)
                     .ok_or_else(|| DomainError::Predicate("falta 'var'".into()))?;
        let op_raw = obj.get("op")
                        .and_then(Value::as_str)
                        .ok_or_else(|| DomainError::Predicate("falta 'op'".into()))?;
        let op = PredicateOp::parse(op_raw).ok_or_else(|| DomainError::Predicate(format!("op desconocido: {op_raw}")))?;
        let value = obj.get("value").cloned().unwrap_or(Value::Null);
        Ok(Predicate::Compare { var: var.to_string(), op, value })
    }

    fn parse_branches(raw: &Value, kind: &str) -> Result<Vec<Predicate>, DomainError> {
        let list = raw.as_array()
                      .ok_or_else(|| DomainError::Predicate(format!("'{kind}' debe ser una lista")))?;
        list.iter().map(Predicate::parse).collect()
    }

    /// Evalúa el predicado contra la bolsa de estado.
    pub fn eval(&self, state: &Value) -> bool {
        match self {
            Predicate::And(branches) => branches.iter().all(|p| p.eval(state)),
            Predicate::Or(branches) => branches.iter().any(|p| p.eval(state)),
            Predicate::Compare { var, op, value } => {
                let actual = get_path(state, var).cloned().unwrap_or(Value::Null);
                compare(&actual, *op, value)
            }
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn compare(actual: &Value, op: PredicateOp, expected: &Value) -> bool {
    match op {
        PredicateOp::Eq => actual == expected,
        PredicateOp::Ne => actual != expected,
        PredicateOp::Lt | PredicateOp::Le | PredicateOp::Gt | PredicateOp::Ge => {
            // null es falsy: sin ambos números no hay orden
            match (as_number(actual), as_number(expected)) {
                (Some(a), Some(b)) => match op {
                    PredicateOp::Lt => a < b,
                    PredicateOp::Le => a <= b,
                    PredicateOp::Gt => a > b,
                    PredicateOp::Ge => a >= b,
                    _ => unreachable!(),
                },
                _ => false,
            }
        }
        PredicateOp::In => match expected {
            Value::Array(items) => items.contains(actual),
            Value::String(s) => actual.as_str().map(|a| s.contains(a)).unwrap_or(false),
            _ => false,
        },
        PredicateOp::Contains => match actual {
            Value::Array(items) => items.contains(expected),
            Value::String(s) => expected.as_str().map(|e| s.contains(e)).unwrap_or(false),
            _ => false,
        },
    }
}
