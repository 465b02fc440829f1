//! Retención de trazas: borrado batched por `retention_days` del flujo y
//! limpieza de auditoría, más estadísticas de almacenamiento.
//!
//! El borrado va en batches de 1000 con pausa de 100 ms entre batches hasta
//! que un batch borre menos que el tamaño de batch. Seguro de invocar en
//! paralelo con la actividad del runtime (cada batch es su propia
//! transacción corta).

use std::time::Duration;

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Uuid as SqlUuid};
use log::info;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::PersistenceError;
use chat_core::constants::{AUDIT_RETENTION_DAYS, CLEANUP_BATCH_SIZE, CLEANUP_PAUSE_MS, DEFAULT_RETENTION_DAYS};

use super::PgPool;

/// Worker de limpieza de retención.
pub struct TraceCleanup {
    pool: PgPool,
}

impl TraceCleanup {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Borra pasos de traza más viejos que `retention_days` de su flujo
    /// (default 30). Devuelve el total borrado.
    pub fn cleanup_old_traces(&self) -> Result<u64, PersistenceError> {
        let mut deleted_total = 0u64;
        loop {
            let mut conn = self.pool
                               .get()
                               .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))?;
            let deleted = diesel::sql_query(
                "DELETE FROM flow_execution_steps \
                 WHERE id IN ( \
                     SELECT fes.id FROM flow_execution_steps fes \
                     JOIN conversation_sessions cs ON cs.id = fes.session_id \
                     JOIN flow_definitions fd ON fd.id = cs.flow_id \
                     WHERE fes.started_at < now() - INTERVAL '1 day' * COALESCE(fd.retention_days, $1) \
                     LIMIT $2 \
                 )")
                .bind::<Integer, _>(DEFAULT_RETENTION_DAYS)
                .bind::<BigInt, _>(CLEANUP_BATCH_SIZE)
                .execute(&mut conn)? as u64;

            deleted_total += deleted;
            info!("trace cleanup batch deleted={deleted} total={deleted_total}");
            if deleted < CLEANUP_BATCH_SIZE as u64 {
                break;
            }
            // Pausa corta entre batches para no monopolizar la base
            std::thread::sleep(Duration::from_millis(CLEANUP_PAUSE_MS));
        }
        info!("trace cleanup completed total={deleted_total}");
        Ok(deleted_total)
    }

    /// Limpia auditoría de accesos más vieja que `retention_days` (default
    /// 90; se retiene más que la traza por cumplimiento).
    pub fn cleanup_audit_logs(&self, retention_days: Option<i32>) -> Result<u64, PersistenceError> {
        let days = retention_days.unwrap_or(AUDIT_RETENTION_DAYS);
        let mut deleted_total = 0u64;
        loop {
            let mut conn = self.pool
                               .get()
                               .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))?;
            let deleted = diesel::sql_query(
                "DELETE FROM trace_access_audit \
                 WHERE id IN ( \
                     SELECT id FROM trace_access_audit \
                     WHERE accessed_at < now() - INTERVAL '1 day' * $1 \
                     LIMIT $2 \
                 )")
                .bind::<Integer, _>(days)
                .bind::<BigInt, _>(CLEANUP_BATCH_SIZE)
                .execute(&mut conn)? as u64;

            deleted_total += deleted;
            if deleted < CLEANUP_BATCH_SIZE as u64 {
                break;
            }
            std::thread::sleep(Duration::from_millis(CLEANUP_PAUSE_MS));
        }
        info!("audit log cleanup completed total={deleted_total}");
        Ok(deleted_total)
    }

    /// Estadísticas globales de almacenamiento de trazas (monitoreo).
    pub fn storage_stats(&self) -> Result<Value, PersistenceError> {
        #[derive(QueryableByName)]
        struct StatsRow {
            #[diesel(sql_type = BigInt)]
            total_traces: i64,
            #[diesel(sql_type = diesel::sql_types::Text)]
            table_size: String,
            #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Timestamptz>)]
            oldest_trace: Option<chrono::DateTime<chrono::Utc>>,
            #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Timestamptz>)]
            newest_trace: Option<chrono::DateTime<chrono::Utc>>,
        }
        let mut conn = self.pool
                           .get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))?;
        let row: StatsRow = diesel::sql_query(
            "SELECT COUNT(*) AS total_traces, \
                    pg_size_pretty(pg_total_relation_size('flow_execution_steps')) AS table_size, \
                    MIN(started_at) AS oldest_trace, \
                    MAX(started_at) AS newest_trace \
             FROM flow_execution_steps")
            .get_result(&mut conn)?;
        Ok(json!({
            "total_traces": row.total_traces,
            "table_size": row.table_size,
            "oldest_trace": row.oldest_trace.map(|t| t.to_rfc3339()),
            "newest_trace": row.newest_trace.map(|t| t.to_rfc3339()),
        }))
    }

    /// Estadísticas de traza para un flujo concreto.
    pub fn flow_trace_stats(&self, flow_id: Uuid) -> Result<Value, PersistenceError> {
        #[derive(QueryableByName)]
        struct FlowStatsRow {
            #[diesel(sql_type = BigInt)]
            traced_sessions: i64,
            #[diesel(sql_type = BigInt)]
            total_steps: i64,
            #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Double>)]
            avg_step_duration_ms: Option<f64>,
            #[diesel(sql_type = BigInt)]
            error_steps: i64,
        }
        let mut conn = self.pool
                           .get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))?;
        let row: FlowStatsRow = diesel::sql_query(
            "SELECT COUNT(DISTINCT fes.session_id) AS traced_sessions, \
                    COUNT(*) AS total_steps, \
                    AVG(fes.duration_ms)::float8 AS avg_step_duration_ms, \
                    COUNT(*) FILTER (WHERE fes.error_message IS NOT NULL) AS error_steps \
             FROM flow_execution_steps fes \
             JOIN conversation_sessions cs ON cs.id = fes.session_id \
             WHERE cs.flow_id = $1")
            .bind::<SqlUuid, _>(flow_id)
            .get_result(&mut conn)?;
        Ok(json!({
            "traced_sessions": row.traced_sessions,
            "total_steps": row.total_steps,
            "avg_step_duration_ms": row.avg_step_duration_ms,
            "error_steps": row.error_steps,
        }))
    }
}
