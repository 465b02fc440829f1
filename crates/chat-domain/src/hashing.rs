//! Helpers de hashing deterministas (sha2).
//!
//! - `session_lock_key`: clave entera estable (63 bits) para advisory locks.
//! - `sample_bucket`: bucket 0..99 de un token para sampling de traza.
//! - `state_hash`: hash hex del estado serializado.
//! - `new_session_token`: token opaco url-safe para sesiones.

use sha2::{Digest, Sha256};
use uuid::Uuid;

fn sha256_bytes(input: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(input);
    digest.into()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Clave estable para `pg_advisory_lock` derivada del id de sesión.
/// Colisiones entre sesiones distintas solo serializan trabajo no
/// relacionado, así que 63 bits positivos bastan.
pub fn session_lock_key(session_id: Uuid) -> i64 {
    let digest = sha256_bytes(session_id.to_string().as_bytes());
    let mut eight = [0u8; 8];
    eight.copy_from_slice(&digest[..8]);
    (i64::from_be_bytes(eight)) & i64::MAX
}

/// Bucket determinista 0..=99 para decidir sampling (`bucket < sample_rate`).
pub fn sample_bucket(session_token: &str) -> u8 {
    let digest = sha256_bytes(session_token.as_bytes());
    let mut eight = [0u8; 8];
    eight.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(eight) % 100) as u8
}

/// Hash hex del estado serializado (para `state_hash` de la sesión).
pub fn state_hash(state: &serde_json::Value) -> String {
    to_hex(&sha256_bytes(state.to_string().as_bytes()))
}

/// Token de sesión opaco, único y url-safe (64 chars hex).
pub fn new_session_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_stable_and_non_negative() {
        let id = Uuid::new_v4();
        let a = session_lock_key(id);
        let b = session_lock_key(id);
        assert_eq!(a, b);
        assert!(a >= 0);
    }

    #[test]
    fn sample_bucket_is_deterministic_and_bounded() {
        let bucket = sample_bucket("some-token");
        assert_eq!(bucket, sample_bucket("some-token"));
        assert!(bucket < 100);
    }

    #[test]
    fn session_tokens_are_url_safe_and_unique() {
        let a = new_session_token();
        let b = new_session_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
