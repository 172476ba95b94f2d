//! HMAC-SHA-256 and HKDF key derivation
//!
//! Every symmetric derivation in the protocol runs through these two
//! functions: the chain ratchet uses bare HMAC, everything else goes
//! through RFC 5869 extract-and-expand.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Size of an HMAC-SHA-256 output in bytes
pub const MAC_SIZE: usize = 32;

/// Compute HMAC-SHA-256 over `data`
pub fn hmac(key: &[u8], data: &[u8]) -> [u8; MAC_SIZE] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// HKDF extract-and-expand over HMAC-SHA-256
///
/// When `salt` is `None` the RFC default applies: a hash-length (32-byte)
/// zero salt. Callers chaining invocations pass the previous output as salt.
pub fn hkdf(ikm: &[u8], info: &[u8], length: usize, salt: Option<&[u8]>) -> Vec<u8> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = vec![0u8; length];
    hk.expand(info, &mut okm)
        .expect("HKDF output length within 255 blocks");
    okm
}

/// Constant-time comparison to prevent timing attacks
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_deterministic() {
        let key = [7u8; 32];
        let m1 = hmac(&key, b"hello");
        let m2 = hmac(&key, b"hello");
        assert_eq!(m1, m2);

        let m3 = hmac(&key, b"hellp");
        assert_ne!(m1, m3);
    }

    #[test]
    fn test_hmac_key_separation() {
        let m1 = hmac(&[1u8; 32], b"data");
        let m2 = hmac(&[2u8; 32], b"data");
        assert_ne!(m1, m2);
    }

    // RFC 5869 appendix A.1
    #[test]
    fn test_hkdf_rfc5869_case_1() {
        let ikm = [0x0bu8; 22];
        let salt: Vec<u8> = (0x00..=0x0c).collect();
        let info: Vec<u8> = (0xf0..=0xf9).collect();

        let okm = hkdf(&ikm, &info, 42, Some(&salt));

        let expected = hex::decode(
            "3cb25f25faacd57a90434f64d0362f2a\
             2d2d0a90cf1a5a4c5db02d56ecc4c5bf\
             34007208d5b887185865",
        )
        .unwrap();
        assert_eq!(okm, expected);
    }

    #[test]
    fn test_hkdf_absent_salt_is_zero_salt() {
        let ikm = [42u8; 32];
        let zero_salt = [0u8; 32];

        let a = hkdf(&ikm, b"info", 64, None);
        let b = hkdf(&ikm, b"info", 64, Some(&zero_salt));
        assert_eq!(a, b);
    }

    #[test]
    fn test_hkdf_info_separation() {
        let ikm = [42u8; 32];
        let a = hkdf(&ikm, b"info-a", 32, None);
        let b = hkdf(&ikm, b"info-b", 32, None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(&[1, 2, 3], &[1, 2, 3]));
        assert!(!constant_time_eq(&[1, 2, 3], &[1, 2, 4]));
        assert!(!constant_time_eq(&[1, 2], &[1, 2, 3]));
    }
}
