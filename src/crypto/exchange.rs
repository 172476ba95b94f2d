//! X25519 key exchange types
//!
//! Every asymmetric key in the protocol lives on Curve25519: identity keys,
//! signed prekeys, one-time prekeys and ratchet keys are all
//! `ExchangeKeypair`s under different lifetimes.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use super::error::{CryptoError, CryptoResult};

/// Size of a Curve25519 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// A Curve25519 public key
///
/// One newtype for every role the protocol gives a public key: peer
/// identifier, signed and one-time prekeys, the handshake ephemeral, and
/// the ratchet key carried in each message header. On the wire these travel
/// as base64 strings inside JSON objects (see the transport layer); the
/// hex form exists for the out-of-band exchange of identity keys between
/// people.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangePublicKey(pub [u8; PUBLIC_KEY_SIZE]);

impl ExchangePublicKey {
    /// Parse from raw bytes; anything but exactly 32 bytes is rejected
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let raw: [u8; PUBLIC_KEY_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            })?;
        Ok(ExchangePublicKey(raw))
    }

    /// The raw key bytes, as fed to X25519 and to the header codec
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Hex form, used when peers exchange identity keys out of band
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the hex form; tolerates surrounding whitespace from copy-paste
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s.trim()).map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for ExchangePublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short fingerprint; full keys never belong in logs
        write!(f, "ExchangePublicKey({}..)", hex::encode(&self.0[..4]))
    }
}

impl std::fmt::Display for ExchangePublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A Curve25519 keypair
///
/// The secret half is zeroized when the keypair is dropped.
#[derive(Clone, ZeroizeOnDrop)]
pub struct ExchangeKeypair {
    #[zeroize(skip)]
    public: ExchangePublicKey,
    secret: [u8; 32],
}

impl ExchangeKeypair {
    /// Generate a fresh keypair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);

        ExchangeKeypair {
            public: ExchangePublicKey(public.to_bytes()),
            secret: secret.to_bytes(),
        }
    }

    /// Reconstruct a keypair from its secret bytes
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        let secret = StaticSecret::from(*bytes);
        let public = X25519Public::from(&secret);

        ExchangeKeypair {
            public: ExchangePublicKey(public.to_bytes()),
            secret: secret.to_bytes(),
        }
    }

    /// Get the public half
    pub fn public(&self) -> &ExchangePublicKey {
        &self.public
    }

    /// Get the secret bytes (for signing and persistence)
    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret
    }

    /// X25519 scalar multiplication with a peer public key
    pub fn diffie_hellman(&self, peer: &ExchangePublicKey) -> [u8; 32] {
        let secret = StaticSecret::from(self.secret);
        let peer = X25519Public::from(peer.0);
        secret.diffie_hellman(&peer).to_bytes()
    }
}

impl std::fmt::Debug for ExchangeKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExchangeKeypair({}...)", &self.public.to_hex()[..16])
    }
}
