//! Bearer token and WS-ticket primitives.
//!
//! ARCHITECTURE
//! ============
//! HTTP auth uses long-lived bearer tokens, while websocket upgrades use
//! one-time short-lived tickets so the bearer token never appears in a URL.
//!
//! TRADE-OFFS
//! ==========
//! Only the SHA-256 of a bearer token is persisted, so a leaked table does
//! not leak usable credentials. Tickets are stored raw: they live for
//! seconds and are deleted on first use.

use std::fmt::Write;

use rand::Rng;
use sha2::{Digest, Sha256};

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// Generate a short-lived 16-byte hex WS ticket.
#[must_use]
pub(crate) fn generate_ws_ticket() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// Hash a bearer token for storage and lookup.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    bytes_to_hex(&hasher.finalize())
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
