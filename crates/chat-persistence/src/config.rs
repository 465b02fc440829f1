//! Carga de configuración desde variables de entorno (.env vía dotenvy).
//!
//! Convenciones: `DATABASE_URL` obligatoria; tamaños de pool y cadencia del
//! dispatcher del outbox opcionales con defaults razonables.

use dotenvy::dotenv;
use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        let url = env::var("DATABASE_URL").expect("DATABASE_URL no definido");
        Self { url,
               min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 2),
               max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 16) }
    }
}

/// Configuración de los workers (dispatcher del outbox y cleanup).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub outbox_poll_interval: Duration,
    pub outbox_purge_after_days: i32,
    pub audit_retention_days: i32,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        Self { outbox_poll_interval: Duration::from_millis(env_parse("OUTBOX_POLL_INTERVAL_MS", 500)),
               outbox_purge_after_days: env_parse("OUTBOX_PURGE_AFTER_DAYS", 7),
               audit_retention_days: env_parse("AUDIT_RETENTION_DAYS",
                                               chat_core::constants::AUDIT_RETENTION_DAYS) }
    }
}

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}
