//! AES-256-CBC and the encrypt-then-MAC construction
//!
//! Payloads and headers are sealed with the same construction: HKDF expands
//! the input key material into an encryption key, an authentication key and
//! a CBC IV; the ciphertext is followed by a 32-byte HMAC tag computed over
//! the caller-supplied nonce.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;

use super::error::{CryptoError, CryptoResult};
use super::hash::{constant_time_eq, hkdf, hmac, MAC_SIZE};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Size of the encryption key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the CBC initialization vector in bytes
pub const IV_SIZE: usize = 16;

/// HKDF output consumed per seal: enc key, auth key, IV
const OKM_SIZE: usize = KEY_SIZE + KEY_SIZE + IV_SIZE;

/// AES-256-CBC with PKCS#7 padding
pub struct Cipher;

impl Cipher {
    /// Encrypt `plaintext` under `key` with the given IV
    pub fn encrypt(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Vec<u8> {
        Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// Decrypt `ciphertext`; fails on a broken padding or truncated input
    pub fn decrypt(
        key: &[u8; KEY_SIZE],
        iv: &[u8; IV_SIZE],
        ciphertext: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        Aes256CbcDec::new(key.into(), iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::InvalidTag)
    }
}

/// Encrypt-then-MAC over AES-256-CBC and HMAC-SHA-256
///
/// The tag binds the nonce, not the ciphertext. Existing peers depend on
/// this exact layout; do not fold the ciphertext into the MAC input.
pub struct AuthCipher;

impl AuthCipher {
    /// Seal `plaintext`: returns `ciphertext || tag32`
    pub fn encrypt(ikm: &[u8], info: &[u8], nonce: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let (enc_key, auth_key, iv) = Self::derive(ikm, info);

        let mut out = Cipher::encrypt(&enc_key, &iv, plaintext);
        out.extend_from_slice(&hmac(&auth_key, nonce));
        out
    }

    /// Open `payload` (`ciphertext || tag32`); the tag is verified against
    /// the nonce before any decryption happens
    pub fn decrypt(ikm: &[u8], info: &[u8], nonce: &[u8], payload: &[u8]) -> CryptoResult<Vec<u8>> {
        if payload.len() < MAC_SIZE {
            return Err(CryptoError::InvalidTag);
        }

        let (enc_key, auth_key, iv) = Self::derive(ikm, info);

        let (ciphertext, tag) = payload.split_at(payload.len() - MAC_SIZE);
        let expected = hmac(&auth_key, nonce);
        if !constant_time_eq(tag, &expected) {
            return Err(CryptoError::InvalidTag);
        }

        Cipher::decrypt(&enc_key, &iv, ciphertext)
    }

    fn derive(ikm: &[u8], info: &[u8]) -> ([u8; KEY_SIZE], [u8; KEY_SIZE], [u8; IV_SIZE]) {
        let okm = hkdf(ikm, info, OKM_SIZE, None);

        let mut enc_key = [0u8; KEY_SIZE];
        let mut auth_key = [0u8; KEY_SIZE];
        let mut iv = [0u8; IV_SIZE];
        enc_key.copy_from_slice(&okm[..KEY_SIZE]);
        auth_key.copy_from_slice(&okm[KEY_SIZE..KEY_SIZE * 2]);
        iv.copy_from_slice(&okm[KEY_SIZE * 2..]);

        (enc_key, auth_key, iv)
    }
}
