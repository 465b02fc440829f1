//! Advisory locks de Postgres por sesión.
//!
//! La clave es un hash estable de 63 bits del id de sesión. La adquisición
//! es try-then-poll (`pg_try_advisory_lock` cada 100 ms) hasta el deadline.
//! Un advisory lock vive en la conexión que lo tomó, así que el guard
//! retiene su conexión del pool y la suelta (con `pg_advisory_unlock`) al
//! hacer Drop, en todo camino de salida.

use std::time::{Duration, Instant};

use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, PooledConnection};
use diesel::sql_types::BigInt;
use log::{debug, error, warn};
use uuid::Uuid;

use crate::error::PersistenceError;
use chat_core::concurrency::ConcurrencyController;
use chat_core::constants::LOCK_POLL_INTERVAL_MS;
use chat_core::errors::EngineError;
use chat_domain::hashing::session_lock_key;

use super::PgPool;

#[derive(QueryableByName)]
struct LockResult {
    #[diesel(sql_type = diesel::sql_types::Bool)]
    acquired: bool,
}

fn try_advisory_lock(conn: &mut PgConnection, key: i64) -> Result<bool, PersistenceError> {
    let result: LockResult = diesel::sql_query("SELECT pg_try_advisory_lock($1) AS acquired")
        .bind::<BigInt, _>(key)
        .get_result(conn)?;
    Ok(result.acquired)
}

/// Guard del advisory lock: retiene la conexión y libera al soltarse.
pub struct PgSessionLockGuard {
    conn: Option<PooledConnection<ConnectionManager<PgConnection>>>,
    key: i64,
    session_id: Uuid,
}

impl Drop for PgSessionLockGuard {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let released = diesel::sql_query("SELECT pg_advisory_unlock($1) AS acquired")
                .bind::<BigInt, _>(self.key)
                .get_result::<LockResult>(&mut conn);
            match released {
                Ok(result) if result.acquired => {
                    debug!("session lock released session_id={} key={}", self.session_id, self.key)
                }
                Ok(_) => warn!("session lock was not held at release session_id={}", self.session_id),
                Err(err) => error!("error releasing session lock session_id={}: {err}", self.session_id),
            }
        }
    }
}

/// Controlador de concurrencia respaldado por advisory locks.
#[derive(Clone)]
pub struct PgSessionLocks {
    pool: PgPool,
}

impl PgSessionLocks {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ConcurrencyController for PgSessionLocks {
    type Guard = PgSessionLockGuard;

    fn acquire_session_lock(&self, session_id: Uuid, timeout: Duration) -> Result<Self::Guard, EngineError> {
        let key = session_lock_key(session_id);
        let mut conn = self.pool
                           .get()
                           .map_err(|e| EngineError::Storage(format!("pool error: {e}")))?;
        let deadline = Instant::now() + timeout;
        loop {
            let acquired = try_advisory_lock(&mut conn, key).map_err(EngineError::from)?;
            if acquired {
                debug!("session lock acquired session_id={session_id} key={key}");
                return Ok(PgSessionLockGuard { conn: Some(conn), key, session_id });
            }
            if Instant::now() >= deadline {
                warn!("session lock timed out session_id={session_id} key={key} timeout={timeout:?}");
                return Err(EngineError::Timeout(format!("session lock {session_id} not acquired within {timeout:?}")));
            }
            std::thread::sleep(Duration::from_millis(LOCK_POLL_INTERVAL_MS));
        }
    }
}
