//! Constantes del motor. Valores observables del contrato (timeouts, tamaños
//! de batch, límites de truncado) viven aquí para que procesadores, tracer y
//! runtime compartan una sola fuente.

/// Versión del motor, registrada en metadatos de eventos.
pub const ENGINE_VERSION: &str = "1.0.0";

/// Límite duro de nodos procesados por tick (protege de ciclos de autor).
pub const MAX_STEPS_PER_TICK: usize = 50;

/// Timeout por defecto esperando el advisory lock de una sesión.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 5;

/// Intervalo de poll al esperar un lock ocupado.
pub const LOCK_POLL_INTERVAL_MS: u64 = 100;

/// Tamaño del buffer de ingesta de traza antes de flush.
pub const TRACE_BUFFER_SIZE: usize = 10;

/// Retención por defecto de pasos de traza (días).
pub const DEFAULT_RETENTION_DAYS: i32 = 30;

/// Retención de auditoría de accesos (días); más larga por cumplimiento.
pub const AUDIT_RETENTION_DAYS: i32 = 90;

/// Tamaño de batch del cleanup de retención.
pub const CLEANUP_BATCH_SIZE: i64 = 1000;

/// Pausa entre batches del cleanup (ms).
pub const CLEANUP_PAUSE_MS: u64 = 100;

/// Timeout por defecto de un nodo script (ms).
pub const DEFAULT_SCRIPT_TIMEOUT_MS: u64 = 5000;

/// Timeout por defecto de un nodo webhook (ms).
pub const DEFAULT_WEBHOOK_TIMEOUT_MS: u64 = 10_000;

/// Cuerpos de respuesta por encima de este tamaño se resumen en la traza.
pub const RESPONSE_BODY_LIMIT_BYTES: usize = 1024;

/// Caracteres de preview al resumir cuerpos o código en la traza.
pub const TRACE_PREVIEW_CHARS: usize = 500;

/// Máximo de líneas de consola conservadas por paso de script.
pub const CONSOLE_LOG_LIMIT: usize = 100;

/// Canal por defecto de entrega de eventos de dominio.
pub const DEFAULT_EVENT_CHANNEL: &str = "flow_events";
