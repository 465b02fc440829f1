//! Dispatcher del outbox: riel durable de eventos de dominio.
//!
//! Recorre filas pendientes (más viejas primero) con `FOR UPDATE SKIP
//! LOCKED` para permitir múltiples workers sin doble entrega, entrega vía
//! `pg_notify(destination, payload)`, marca `delivered_at` en éxito y
//! acumula `attempts`/`last_error` en fallo. Entrega at-least-once: los
//! consumidores deduplican por id de evento.

use std::time::Duration;

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};
use log::{debug, info, warn};

use crate::error::PersistenceError;

use super::PgPool;

/// Máximo de intentos antes de dejar la fila para inspección manual.
const MAX_ATTEMPTS: i32 = 10;
/// Filas por pasada del dispatcher.
const DISPATCH_BATCH: i64 = 100;
/// Backoff base entre pasadas con fallos (exponencial, con tope).
const BACKOFF_BASE_MS: u64 = 200;
const BACKOFF_CAP_MS: u64 = 30_000;

#[derive(QueryableByName, Debug)]
struct PendingRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = Text)]
    payload: String,
    #[diesel(sql_type = Text)]
    destination: String,
    #[diesel(sql_type = diesel::sql_types::Integer)]
    attempts: i32,
}

/// Worker de despacho del outbox (uno alcanza; varios cooperan vía
/// SKIP LOCKED).
pub struct OutboxDispatcher {
    pool: PgPool,
    poll_interval: Duration,
}

impl OutboxDispatcher {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, poll_interval: Duration::from_millis(500) }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Construye el dispatcher con la cadencia configurada por entorno.
    pub fn from_env(pool: PgPool) -> Self {
        let cfg = crate::config::WorkerConfig::from_env();
        Self { pool, poll_interval: cfg.outbox_poll_interval }
    }

    /// Una pasada: entrega hasta `DISPATCH_BATCH` filas pendientes en orden
    /// de id. Devuelve (entregadas, fallidas).
    pub fn dispatch_pending(&self) -> Result<(usize, usize), PersistenceError> {
        let mut conn = self.pool
                           .get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))?;

        conn.transaction::<(usize, usize), PersistenceError, _>(|tx| {
                let pending: Vec<PendingRow> = diesel::sql_query(
                    "SELECT id, payload::text AS payload, destination, attempts \
                     FROM event_outbox \
                     WHERE delivered_at IS NULL AND attempts < $1 \
                     ORDER BY id ASC \
                     LIMIT $2 \
                     FOR UPDATE SKIP LOCKED")
                    .bind::<diesel::sql_types::Integer, _>(MAX_ATTEMPTS)
                    .bind::<BigInt, _>(DISPATCH_BATCH)
                    .load(tx)?;

                let mut delivered = 0usize;
                let mut failed = 0usize;
                for row in pending {
                    let result = diesel::sql_query("SELECT pg_notify($1, $2)")
                        .bind::<Text, _>(&row.destination)
                        .bind::<Text, _>(&row.payload)
                        .execute(tx);
                    match result {
                        Ok(_) => {
                            diesel::sql_query(
                                "UPDATE event_outbox SET delivered_at = now(), attempts = attempts + 1 \
                                 WHERE id = $1")
                                .bind::<BigInt, _>(row.id)
                                .execute(tx)?;
                            delivered += 1;
                            debug!("outbox delivered id={} destination={}", row.id, row.destination);
                        }
                        Err(err) => {
                            diesel::sql_query(
                                "UPDATE event_outbox SET attempts = attempts + 1, last_error = $2 \
                                 WHERE id = $1")
                                .bind::<BigInt, _>(row.id)
                                .bind::<Text, _>(err.to_string())
                                .execute(tx)?;
                            failed += 1;
                            warn!("outbox delivery failed id={} attempt={}: {err}", row.id, row.attempts + 1);
                        }
                    }
                }
                Ok((delivered, failed))
            })
    }

    /// Loop del worker: poll + entrega, con backoff exponencial tras pasadas
    /// con fallos. `stop` corta el loop en el siguiente ciclo.
    pub fn run(&self, stop: &std::sync::atomic::AtomicBool) {
        let mut consecutive_failures: u32 = 0;
        while !stop.load(std::sync::atomic::Ordering::Relaxed) {
            match self.dispatch_pending() {
                Ok((_, 0)) => consecutive_failures = 0,
                Ok((_, failed)) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    info!("outbox pass had {failed} failures (streak {consecutive_failures})");
                }
                Err(err) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    warn!("outbox dispatch error: {err}");
                }
            }
            let backoff = if consecutive_failures == 0 {
                self.poll_interval
            } else {
                let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << consecutive_failures.min(8));
                Duration::from_millis(exp.min(BACKOFF_CAP_MS))
            };
            std::thread::sleep(backoff);
        }
    }

    /// Retención de filas entregadas (recomendado: truncar tras 7 días).
    pub fn purge_delivered(&self, older_than_days: i32) -> Result<u64, PersistenceError> {
        let mut conn = self.pool
                           .get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))?;
        let purged = diesel::sql_query(
            "DELETE FROM event_outbox \
             WHERE delivered_at IS NOT NULL AND delivered_at < now() - INTERVAL '1 day' * $1")
            .bind::<diesel::sql_types::Integer, _>(older_than_days)
            .execute(&mut conn)? as u64;
        info!("outbox purge removed {purged} delivered rows");
        Ok(purged)
    }
}
