//! XEdDSA signatures over Curve25519 keys
//!
//! Lets the long-term X25519 identity keypair sign prekeys without carrying
//! a separate Ed25519 keypair. The Montgomery key is mapped to the Edwards
//! point with sign bit zero; the secret scalar is negated when necessary so
//! both parties agree on the same Edwards public key.
//!
//! Signing consumes 64 bytes of fresh randomness; verification is
//! deterministic.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::{clamp_integer, Scalar};
use sha2::{Digest, Sha512};

/// Size of an XEdDSA signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

// hash_1 domain separator: 2^256 - 2, little-endian
const HASH1_PREFIX: [u8; 32] = [
    0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF,
];

/// Map an X25519 secret to its Edwards scalar and sign-bit-zero public point
fn calculate_key_pair(secret: &[u8; 32]) -> (Scalar, CompressedEdwardsY) {
    let mut a = Scalar::from_bytes_mod_order(clamp_integer(*secret));
    let mut point = EdwardsPoint::mul_base(&a);

    if (point.compress().as_bytes()[31] & 0x80) != 0 {
        a = -a;
        point = -point;
    }

    (a, point.compress())
}

/// Sign `message` with an X25519 secret key
///
/// `random` must be 64 fresh bytes per signature; it blinds the derivation
/// of the commitment scalar, it is not a substitute for the secret key.
pub fn sign(secret: &[u8; 32], message: &[u8], random: &[u8; 64]) -> [u8; SIGNATURE_SIZE] {
    let (a, public) = calculate_key_pair(secret);

    let mut h = Sha512::new();
    h.update(HASH1_PREFIX);
    h.update(a.to_bytes());
    h.update(message);
    h.update(random);
    let digest: [u8; 64] = h.finalize().into();
    let r = Scalar::from_bytes_mod_order_wide(&digest);

    let commitment = EdwardsPoint::mul_base(&r).compress();

    let mut h = Sha512::new();
    h.update(commitment.as_bytes());
    h.update(public.as_bytes());
    h.update(message);
    let digest: [u8; 64] = h.finalize().into();
    let challenge = Scalar::from_bytes_mod_order_wide(&digest);

    let s = r + challenge * a;

    let mut signature = [0u8; SIGNATURE_SIZE];
    signature[..32].copy_from_slice(commitment.as_bytes());
    signature[32..].copy_from_slice(&s.to_bytes());
    signature
}

/// Verify a signature against an X25519 public key
pub fn verify(public: &[u8; 32], message: &[u8], signature: &[u8; SIGNATURE_SIZE]) -> bool {
    let Some(point) = MontgomeryPoint(*public).to_edwards(0) else {
        return false;
    };
    let ed_public = point.compress();

    let mut commitment = [0u8; 32];
    commitment.copy_from_slice(&signature[..32]);
    let mut s_bytes = [0u8; 32];
    s_bytes.copy_from_slice(&signature[32..]);

    if CompressedEdwardsY(commitment).decompress().is_none() {
        return false;
    }
    let Some(s) = Option::<Scalar>::from(Scalar::from_canonical_bytes(s_bytes)) else {
        return false;
    };

    let mut h = Sha512::new();
    h.update(commitment);
    h.update(ed_public.as_bytes());
    h.update(message);
    let digest: [u8; 64] = h.finalize().into();
    let challenge = Scalar::from_bytes_mod_order_wide(&digest);

    // R' = sB - hA; accept iff R' matches the transmitted commitment
    let check = EdwardsPoint::vartime_double_scalar_mul_basepoint(&-challenge, &point, &s);

    check.compress().as_bytes() == &commitment
}
