//! Long-term Curve25519 identity
//!
//! The identity keypair is created once per client and lives as long as the
//! client does. Its public half doubles as the peer identifier on the relay,
//! and the keypair signs prekeys via XEdDSA — no separate Ed25519 key exists.

use zeroize::Zeroize;

use super::error::{CryptoError, CryptoResult};
use super::exchange::{ExchangeKeypair, ExchangePublicKey};
use super::{random_bytes, xeddsa};

/// Size of a secret key in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Size of an XEdDSA signature in bytes
pub const SIGNATURE_SIZE: usize = xeddsa::SIGNATURE_SIZE;

/// A signature produced by an identity
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignatureBytes(pub [u8; SIGNATURE_SIZE]);

// Custom serde impl because arrays >32 don't auto-derive
impl serde::Serialize for SignatureBytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for SignatureBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl SignatureBytes {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != SIGNATURE_SIZE {
            return Err(CryptoError::InvalidSignatureLength {
                expected: SIGNATURE_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; SIGNATURE_SIZE];
        arr.copy_from_slice(bytes);
        Ok(SignatureBytes(arr))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create from hex string
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidSecretKey)?;
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}...)", &self.to_hex()[..16])
    }
}

/// A long-term client identity
pub struct Identity {
    keypair: ExchangeKeypair,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        Identity {
            keypair: ExchangeKeypair::generate(),
        }
    }

    /// The public key — also the peer identifier
    pub fn public_key(&self) -> &ExchangePublicKey {
        self.keypair.public()
    }

    /// Borrow the underlying keypair (used as the first ratchet keypair
    /// when initiating a session)
    pub fn keypair(&self) -> &ExchangeKeypair {
        &self.keypair
    }

    /// Sign a message with this identity's Curve25519 key
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        let random = random_bytes::<64>();
        SignatureBytes(xeddsa::sign(self.keypair.secret_bytes(), message, &random))
    }

    /// Verify a signature made by the identity behind `public`
    pub fn verify(
        public: &ExchangePublicKey,
        message: &[u8],
        signature: &SignatureBytes,
    ) -> bool {
        xeddsa::verify(public.as_bytes(), message, signature.as_bytes())
    }

    /// Export the secret key (for the identity file)
    ///
    /// Handle with care: never log, transmit, or store this unprotected.
    pub fn to_bytes(&self) -> [u8; SECRET_KEY_SIZE] {
        *self.keypair.secret_bytes()
    }

    /// Import an identity from its secret key bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != SECRET_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: SECRET_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut secret = [0u8; SECRET_KEY_SIZE];
        secret.copy_from_slice(bytes);
        let identity = Identity {
            keypair: ExchangeKeypair::from_secret_bytes(&secret),
        };
        secret.zeroize();
        Ok(identity)
    }
}

impl Clone for Identity {
    fn clone(&self) -> Self {
        Identity {
            keypair: self.keypair.clone(),
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identity({}...)", &self.public_key().to_hex()[..16])
    }
}
