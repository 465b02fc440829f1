//! Modelo de flujos: definición, nodos y conexiones.
//!
//! `Flow.flow_data` es el snapshot denormalizado del grafo; las filas de
//! `Node`/`Connection` son la forma canónica. La sincronización entre ambas
//! vive en `crate::snapshot`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use chat_domain::types::{ConnectionType, NodeType};

/// Definición persistida de un flujo (unidad de publicación).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub version: String,
    pub entry_node_id: String,
    /// Snapshot denormalizado `{nodes, connections, ...claves de autor}`.
    pub flow_data: Value,
    pub info: Value,
    /// Contrato opcional: `{"requires": [rutas], "returns": [rutas]}`.
    pub contract: Option<Value>,
    pub is_published: bool,
    pub is_active: bool,
    pub trace_enabled: bool,
    /// 0..=100; ver sampling determinista del tracer.
    pub trace_sample_rate: i32,
    pub retention_days: i32,
    pub created_by: Option<Uuid>,
    pub published_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Fila canónica de un nodo del grafo. `(flow_id, node_id)` es único.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub node_id: String,
    pub node_type: NodeType,
    pub template: Option<String>,
    pub content: Value,
    pub position: Value,
    pub info: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Arista dirigida etiquetada. `(flow_id, source, target, type)` es único.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub source_node_id: String,
    pub target_node_id: String,
    pub connection_type: ConnectionType,
    pub conditions: Value,
    pub info: Value,
    pub created_at: DateTime<Utc>,
}

/// Flujo con su grafo cargado eager (nodos + conexiones).
#[derive(Debug, Clone)]
pub struct FlowGraph {
    pub flow: Flow,
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
}

/// Datos para crear un flujo. Si `flow_data` trae nodos/conexiones se
/// materializan en las tablas canónicas dentro de la misma transacción.
#[derive(Debug, Clone, Default)]
pub struct FlowSpec {
    pub name: String,
    pub description: Option<String>,
    pub version: String,
    pub entry_node_id: String,
    pub flow_data: Value,
    pub info: Value,
    pub contract: Option<Value>,
    pub trace_enabled: bool,
    pub trace_sample_rate: i32,
    pub retention_days: Option<i32>,
    pub created_by: Option<Uuid>,
}

/// Patch parcial de campos no-grafo de un flujo.
#[derive(Debug, Clone, Default)]
pub struct FlowPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub entry_node_id: Option<String>,
    pub info: Option<Value>,
    pub contract: Option<Value>,
    pub is_active: Option<bool>,
    pub trace_enabled: Option<bool>,
    pub trace_sample_rate: Option<i32>,
    pub retention_days: Option<i32>,
}

/// Datos para crear un nodo.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub node_id: String,
    pub node_type: NodeType,
    pub template: Option<String>,
    pub content: Value,
    pub position: Option<Value>,
    pub info: Value,
}

/// Patch parcial de un nodo existente.
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub node_type: Option<NodeType>,
    pub template: Option<String>,
    pub content: Option<Value>,
    pub position: Option<Value>,
    pub info: Option<Value>,
}

/// Datos para crear una conexión.
#[derive(Debug, Clone)]
pub struct ConnectionSpec {
    pub source_node_id: String,
    pub target_node_id: String,
    pub connection_type: ConnectionType,
    pub conditions: Value,
    pub info: Value,
}

/// Filtros de listado de flujos.
#[derive(Debug, Clone, Default)]
pub struct FlowFilter {
    pub published: Option<bool>,
    pub active: Option<bool>,
    pub search: Option<String>,
    pub version: Option<String>,
    pub skip: usize,
    pub limit: usize,
}
