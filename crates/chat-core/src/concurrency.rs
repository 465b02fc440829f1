//! Controlador de concurrencia por sesión.
//!
//! Modelo: cooperativo mono-hilo dentro de una sesión (sección crítica
//! serializada por un advisory lock por sesión), paralelo entre sesiones.
//! El lock se adquiere con try-then-poll (100 ms) hasta el deadline; el
//! guard lo libera en todo camino de salida (Drop).
//!
//! La resolución de conflictos de revisión ("user wins") vive en
//! `resolve_revision_conflict`, compartida por los dos backends para que la
//! política sea idéntica en memoria y en Postgres.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{info, warn};
use uuid::Uuid;

use crate::constants::{DEFAULT_LOCK_TIMEOUT_SECS, LOCK_POLL_INTERVAL_MS};
use crate::errors::EngineError;
use crate::model::Session;
use crate::store::{ChatStore, SessionUpdate, UpdateOutcome};

/// Timeout por defecto del lock de sesión.
pub fn default_lock_timeout() -> Duration {
    Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS)
}

/// Adquisición del lock exclusivo de una sesión.
///
/// El guard devuelto mantiene el lock mientras viva; soltarlo (Drop) lo
/// libera. Exceder el timeout devuelve `EngineError::Timeout` sin panic.
pub trait ConcurrencyController {
    type Guard;

    fn acquire_session_lock(&self, session_id: Uuid, timeout: Duration) -> Result<Self::Guard, EngineError>;
}

/// Decisión de la política de revisión.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionDecision {
    Apply,
    /// Conflicto: la tarea de fondo debe abortar su update.
    Reject(String),
}

/// Compara la revisión esperada contra la almacenada y aplica la política
/// "user wins": las interacciones de usuario sobreescriben (con warn), las
/// tareas de fondo se rechazan.
pub fn resolve_revision_conflict(stored: &Session, expected: Option<i32>, user_initiated: bool) -> RevisionDecision {
    let Some(expected) = expected else {
        return RevisionDecision::Apply;
    };
    if stored.revision == expected {
        return RevisionDecision::Apply;
    }
    if user_initiated {
        warn!("user interaction overriding concurrent update session_id={} expected_revision={} current_revision={}",
              stored.id, expected, stored.revision);
        RevisionDecision::Apply
    } else {
        info!("background task skipped due to concurrent user activity session_id={} expected_revision={} current_revision={}",
              stored.id, expected, stored.revision);
        RevisionDecision::Reject("Concurrent modification detected".to_string())
    }
}

/// Actualización segura: lock → load → función pura → update con control de
/// revisión → release.
///
/// `update_fn` debe ser re-entrante y sin efectos fuera del estado que
/// devuelve (puede reintentarse).
pub fn safe_session_update<S, C, F>(store: &S,
                                    controller: &C,
                                    session_id: Uuid,
                                    user_initiated: bool,
                                    timeout: Option<Duration>,
                                    update_fn: F)
                                    -> Result<UpdateOutcome, EngineError>
    where S: ChatStore,
          C: ConcurrencyController,
          F: Fn(&Session) -> Result<serde_json::Value, EngineError>
{
    let _guard = controller.acquire_session_lock(session_id, timeout.unwrap_or_else(default_lock_timeout))?;

    let session = store.session_by_id(session_id)?
                       .ok_or_else(|| EngineError::NotFound(format!("session {session_id}")))?;
    let new_state = update_fn(&session)?;

    let update = SessionUpdate { session_id,
                                 new_state,
                                 current_node_id: session.current_node_id.clone(),
                                 expected_revision: Some(session.revision),
                                 user_initiated };
    store.commit_tick(&update, &[], None)
    // _guard se libera aquí, después del commit
}

/// Controlador en memoria: un set de sesiones bloqueadas tras un mutex.
///
/// Misma semántica observable que el backend de advisory locks: exclusión
/// por sesión, espera con poll y timeout.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLocks {
    held: Arc<Mutex<HashSet<Uuid>>>,
}

impl InMemoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_acquire(&self, session_id: Uuid) -> bool {
        let mut held = self.held.lock().expect("locks mutex poisoned");
        held.insert(session_id)
    }
}

/// Guard del lock en memoria; libera al hacer Drop.
pub struct InMemoryLockGuard {
    held: Arc<Mutex<HashSet<Uuid>>>,
    session_id: Uuid,
}

impl Drop for InMemoryLockGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.session_id);
        }
    }
}

impl ConcurrencyController for InMemoryLocks {
    type Guard = InMemoryLockGuard;

    fn acquire_session_lock(&self, session_id: Uuid, timeout: Duration) -> Result<Self::Guard, EngineError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire(session_id) {
                return Ok(InMemoryLockGuard { held: Arc::clone(&self.held), session_id });
            }
            if Instant::now() >= deadline {
                return Err(EngineError::Timeout(format!("session lock {session_id} not acquired within {timeout:?}")));
            }
            std::thread::sleep(Duration::from_millis(LOCK_POLL_INTERVAL_MS));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let locks = InMemoryLocks::new();
        let id = Uuid::new_v4();
        let guard = locks.acquire_session_lock(id, Duration::from_millis(10)).unwrap();
        let err = locks.acquire_session_lock(id, Duration::from_millis(10)).err().unwrap();
        assert!(matches!(err, EngineError::Timeout(_)));
        drop(guard);
        assert!(locks.acquire_session_lock(id, Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn unrelated_sessions_do_not_block_each_other() {
        let locks = InMemoryLocks::new();
        let _a = locks.acquire_session_lock(Uuid::new_v4(), Duration::from_millis(10)).unwrap();
        assert!(locks.acquire_session_lock(Uuid::new_v4(), Duration::from_millis(10)).is_ok());
    }
}
