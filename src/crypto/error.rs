//! Cryptographic and protocol error types

use thiserror::Error;

/// Errors surfaced by the cryptographic core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Encrypt was called before a sending chain exists
    #[error("Session has no sending chain yet")]
    NotReady,

    /// Neither the current nor the next header key authenticates the header
    #[error("Header decryption failed under every candidate key")]
    HeaderDecryptFailed,

    /// Payload or header MAC mismatch (possibly tampered data)
    #[error("Authentication tag mismatch")]
    InvalidTag,

    /// A decrypt would need to skip more message keys than allowed
    #[error("Too many skipped messages")]
    TooManySkipped,

    /// The fetched prekey bundle's signed-prekey signature does not verify
    #[error("Invalid prekey bundle signature")]
    InvalidBundleSignature,

    /// The initial message references a signed prekey we no longer hold
    #[error("Unknown signed prekey")]
    UnknownSignedPrekey,

    /// The initial message references a one-time prekey we no longer hold
    #[error("Unknown one-time prekey")]
    UnknownOneTimePrekey,

    /// A decrypted header does not have the fixed 40-byte layout
    #[error("Malformed ratchet header")]
    BadHeaderLayout,

    /// The provided key has an invalid length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes
        expected: usize,
        /// Actual key length in bytes
        actual: usize,
    },

    /// The provided signature has an invalid length
    #[error("Invalid signature length: expected {expected}, got {actual}")]
    InvalidSignatureLength {
        /// Expected signature length in bytes
        expected: usize,
        /// Actual signature length in bytes
        actual: usize,
    },

    /// The public key format is invalid
    #[error("Invalid public key format")]
    InvalidPublicKey,

    /// The secret key format is invalid
    #[error("Invalid secret key format")]
    InvalidSecretKey,

    /// No session is registered under the given session id
    #[error("Unknown session id")]
    UnknownSession,
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;
