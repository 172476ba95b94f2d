//! Ratchet header codec
//!
//! Cleartext layout (big-endian, fixed widths):
//! `ratchet_pub (32) || PN (u32) || Ns (u32)` = 40 bytes.
//!
//! On the wire the header travels encrypted:
//! `auth_encrypt(HK, info, nonce16, cleartext) || nonce16`, with a fresh
//! 16-byte random nonce per header. The nonce feeds the MAC only; the CBC
//! IV comes out of the HKDF expansion.

use crate::crypto::error::{CryptoError, CryptoResult};
use crate::crypto::exchange::ExchangePublicKey;
use crate::crypto::{random_bytes, AuthCipher};

/// Size of the serialized cleartext header in bytes
pub const HEADER_SIZE: usize = 40;

/// Size of the nonce appended to an encrypted header
pub const HEADER_NONCE_SIZE: usize = 16;

/// Cleartext ratchet header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    /// Sender's current ratchet public key
    pub ratchet_pub: ExchangePublicKey,
    /// Number of messages in the sender's previous sending chain
    pub previous_count: u32,
    /// Message number within the current sending chain
    pub message_number: u32,
}

impl Header {
    /// Serialize to the fixed 40-byte layout
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..32].copy_from_slice(self.ratchet_pub.as_bytes());
        bytes[32..36].copy_from_slice(&self.previous_count.to_be_bytes());
        bytes[36..40].copy_from_slice(&self.message_number.to_be_bytes());
        bytes
    }

    /// Parse from bytes; anything but exactly 40 bytes is rejected
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != HEADER_SIZE {
            return Err(CryptoError::BadHeaderLayout);
        }

        let ratchet_pub = ExchangePublicKey::from_bytes(&bytes[..32])
            .map_err(|_| CryptoError::BadHeaderLayout)?;
        let previous_count = u32::from_be_bytes(bytes[32..36].try_into().unwrap());
        let message_number = u32::from_be_bytes(bytes[36..40].try_into().unwrap());

        Ok(Header {
            ratchet_pub,
            previous_count,
            message_number,
        })
    }

    /// Encrypt under a header key; returns the full wire header
    pub fn seal(&self, header_key: &[u8; 32], info: &[u8]) -> Vec<u8> {
        let nonce = random_bytes::<HEADER_NONCE_SIZE>();

        let mut wire = AuthCipher::encrypt(header_key, info, &nonce, &self.to_bytes());
        wire.extend_from_slice(&nonce);
        wire
    }

    /// Try to decrypt a wire header under a candidate header key
    pub fn open(header_key: &[u8; 32], info: &[u8], wire: &[u8]) -> CryptoResult<Self> {
        if wire.len() < HEADER_NONCE_SIZE {
            return Err(CryptoError::BadHeaderLayout);
        }

        let (body, nonce) = wire.split_at(wire.len() - HEADER_NONCE_SIZE);
        let cleartext = AuthCipher::decrypt(header_key, info, nonce, body)?;
        Self::from_bytes(&cleartext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::MAC_SIZE;

    const INFO: &[u8] = b"header-codec-test";

    fn sample_header() -> Header {
        Header {
            ratchet_pub: ExchangePublicKey([42u8; 32]),
            previous_count: 3,
            message_number: 17,
        }
    }

    #[test]
    fn test_layout_roundtrip() {
        let header = sample_header();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);

        let restored = Header::from_bytes(&bytes).unwrap();
        assert_eq!(header, restored);
    }

    #[test]
    fn test_big_endian_counters() {
        let header = Header {
            ratchet_pub: ExchangePublicKey([0u8; 32]),
            previous_count: 0x01020304,
            message_number: 0x0a0b0c0d,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[32..36], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[36..40], &[0x0a, 0x0b, 0x0c, 0x0d]);
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert_eq!(
            Header::from_bytes(&[0u8; 39]),
            Err(CryptoError::BadHeaderLayout)
        );
        assert_eq!(
            Header::from_bytes(&[0u8; 41]),
            Err(CryptoError::BadHeaderLayout)
        );
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = [9u8; 32];
        let header = sample_header();

        let wire = header.seal(&key, INFO);
        let opened = Header::open(&key, INFO, &wire).unwrap();
        assert_eq!(header, opened);
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let header = sample_header();
        let wire = header.seal(&[9u8; 32], INFO);
        assert!(Header::open(&[10u8; 32], INFO, &wire).is_err());
    }

    #[test]
    fn test_every_flipped_tag_or_nonce_byte_fails() {
        let key = [9u8; 32];
        let wire = sample_header().seal(&key, INFO);

        // Wire layout: ciphertext || tag(32) || nonce(16). The MAC is
        // computed over the nonce, so every flip in the trailing tag and
        // nonce region must be rejected.
        let tag_start = wire.len() - MAC_SIZE - HEADER_NONCE_SIZE;
        for i in tag_start..wire.len() {
            let mut bad = wire.clone();
            bad[i] ^= 0x01;
            assert!(
                Header::open(&key, INFO, &bad).is_err(),
                "flipped byte {} still opened",
                i
            );
        }
    }

    #[test]
    fn test_ciphertext_flip_opens_garbled() {
        // The header MAC binds the nonce, not the ciphertext: a flip in the
        // first ciphertext block leaves the padding block intact, so the
        // header opens to garbage here. Such tampering is only rejected
        // downstream, where the payload MAC is keyed over the exact
        // encrypted-header bytes.
        let key = [9u8; 32];
        let header = sample_header();
        let wire = header.seal(&key, INFO);

        let mut bad = wire.clone();
        bad[0] ^= 0x01;
        let opened = Header::open(&key, INFO, &bad).unwrap();
        assert_ne!(opened, header);
    }

    #[test]
    fn test_nonce_varies_per_seal() {
        let key = [9u8; 32];
        let header = sample_header();

        let wire1 = header.seal(&key, INFO);
        let wire2 = header.seal(&key, INFO);
        assert_ne!(wire1, wire2);
    }
}
