//! Cryptographic primitives
//!
//! This module provides all the cryptographic building blocks:
//! - `hash`: HMAC-SHA-256 and HKDF key derivation
//! - `cipher`: AES-256-CBC and the encrypt-then-MAC construction
//! - `exchange`: X25519 ECDH keys
//! - `xeddsa`: signatures made with Curve25519 keys directly
//! - `identity`: the long-term identity keypair

pub mod cipher;
pub mod error;
pub mod exchange;
pub mod hash;
pub mod identity;
pub mod xeddsa;

// Re-export commonly used types
pub use cipher::{AuthCipher, Cipher};
pub use error::{CryptoError, CryptoResult};
pub use exchange::{ExchangeKeypair, ExchangePublicKey};
pub use identity::{Identity, SignatureBytes};

/// Generate cryptographically secure random bytes
pub fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
