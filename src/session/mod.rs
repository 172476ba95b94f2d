//! Ratchet sessions
//!
//! A `Session` wraps one Double Ratchet instance established by the X3DH
//! handshake. Sessions are single-writer: all operations on one session go
//! through the owning client's serial execution context; distinct sessions
//! are independent.

pub mod header;
mod ratchet;

pub use header::Header;
pub use ratchet::{Ratchet, SessionSeed, MAX_SKIP};

use crate::crypto::CryptoResult;

/// Domain-separation label mixed into every KDF of a session
pub const PROTOCOL_INFO: &[u8] = b"shroud-session-v1";

/// An established messaging session with one peer
pub struct Session {
    ratchet: Ratchet,
}

impl Session {
    pub(crate) fn new(ratchet: Ratchet) -> Self {
        Session { ratchet }
    }

    /// Encrypt a message; returns `(encrypted_header, payload)`
    pub fn encrypt(&mut self, plaintext: &[u8]) -> CryptoResult<(Vec<u8>, Vec<u8>)> {
        self.ratchet.encrypt(plaintext)
    }

    /// Decrypt a received `(encrypted_header, payload)` pair
    pub fn decrypt(&mut self, header: &[u8], payload: &[u8]) -> CryptoResult<Vec<u8>> {
        self.ratchet.decrypt(header, payload)
    }

    /// Number of message keys buffered for out-of-order delivery
    pub fn skipped_len(&self) -> usize {
        self.ratchet.skipped_len()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("ratchet", &self.ratchet).finish()
    }
}
