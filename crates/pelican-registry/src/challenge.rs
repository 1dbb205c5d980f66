//! Key-sign challenge primitives
//!
//! The challenge proves possession of the private key behind a submitted
//! JWKS without revealing either side's long-lived secret, and binds the
//! result to a fresh nonce exchange:
//!
//! 1. **Init**: client sends a nonce; the registry answers with its own
//!    nonce and a signature over the concatenated payload.
//! 2. **Commit**: client returns everything plus its signature over the same
//!    concatenation, made with the first key of the claimed JWKS.
//!
//! Server nonces are single-use and short-lived, kept in memory only; an
//! interrupted handshake restarts.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Mutex;

/// How long an issued server nonce stays redeemable.
const NONCE_LIFETIME_SECS: i64 = 5 * 60;

/// Build the payload both sides sign: `client_nonce ‖ server_nonce`.
pub fn challenge_payload(client_nonce: &str, server_nonce: &str) -> Vec<u8> {
    format!("{}{}", client_nonce, server_nonce).into_bytes()
}

/// Generate 256 bits of hex-encoded randomness.
pub fn generate_nonce() -> String {
    let mut nonce = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce);
    hex::encode(nonce)
}

/// In-memory table of outstanding server nonces.
#[derive(Debug, Default)]
pub struct NonceStore {
    issued: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl NonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh server nonce, pruning expired entries as a side effect.
    pub fn issue(&self) -> String {
        let nonce = generate_nonce();
        let now = Utc::now();
        let mut issued = self.issued.lock().unwrap();
        issued.retain(|_, created| now - *created < Duration::seconds(NONCE_LIFETIME_SECS));
        issued.insert(nonce.clone(), now);
        nonce
    }

    /// Redeem a nonce. Returns false for unknown, already-used, or expired
    /// nonces; a successful redemption consumes the entry.
    pub fn consume(&self, nonce: &str) -> bool {
        let mut issued = self.issued.lock().unwrap();
        match issued.remove(nonce) {
            Some(created) => Utc::now() - created < Duration::seconds(NONCE_LIFETIME_SECS),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_is_256_bits_hex() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 64);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_nonce_single_use() {
        let store = NonceStore::new();
        let nonce = store.issue();

        assert!(store.consume(&nonce));
        assert!(!store.consume(&nonce));
    }

    #[test]
    fn test_unknown_nonce_rejected() {
        let store = NonceStore::new();
        assert!(!store.consume("deadbeef"));
    }

    #[test]
    fn test_payload_is_concatenation() {
        assert_eq!(challenge_payload("A", "B"), b"AB");
    }
}
