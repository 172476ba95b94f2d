//! Header-encrypting Double Ratchet
//!
//! Each session owns a root chain, a sending chain, a receiving chain, and
//! two generations of header keys per direction. The symmetric ratchet
//! derives one key per message; the DH ratchet advances the root chain once
//! per epoch, rotating header keys as it goes. Headers travel encrypted, so
//! the receiver discovers the epoch by trying its current and next header
//! keys rather than reading a cleartext ratchet public.
//!
//! Decryption never partially commits: every mutation happens on a shadow
//! copy of the state that replaces the live state only after the payload
//! authenticates.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::error::{CryptoError, CryptoResult};
use crate::crypto::exchange::{ExchangeKeypair, ExchangePublicKey};
use crate::crypto::hash::{hkdf, hmac};
use crate::crypto::AuthCipher;

use super::header::Header;

/// Maximum number of message keys one decrypt may skip
pub const MAX_SKIP: u32 = 10;

/// The three 32-byte secrets a handshake seeds a session with
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionSeed {
    /// Initial root key
    pub root: [u8; 32],
    /// Initiator's first sending header key (responder's next receiving)
    pub initiator_header: [u8; 32],
    /// Responder's first sending header key (initiator's next receiving)
    pub responder_header: [u8; 32],
}

impl SessionSeed {
    /// Split a 96-byte KDF output into the seed triple
    pub fn from_okm(okm: &[u8]) -> CryptoResult<Self> {
        if okm.len() != 96 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 96,
                actual: okm.len(),
            });
        }
        let mut seed = SessionSeed {
            root: [0u8; 32],
            initiator_header: [0u8; 32],
            responder_header: [0u8; 32],
        };
        seed.root.copy_from_slice(&okm[..32]);
        seed.initiator_header.copy_from_slice(&okm[32..64]);
        seed.responder_header.copy_from_slice(&okm[64..96]);
        Ok(seed)
    }
}

/// A message key retained for an out-of-order message
#[derive(Clone, Zeroize)]
struct SkippedKey {
    header_key: [u8; 32],
    message_number: u32,
    message_key: [u8; 32],
}

/// Double Ratchet session state
///
/// Single-writer: the owning client serializes every call on one session.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Ratchet {
    /// Associated data: initiator identity public || responder identity public
    #[zeroize(skip)]
    ad: Vec<u8>,
    /// Domain-separation label for every KDF in this session
    #[zeroize(skip)]
    info: Vec<u8>,
    /// Own current ratchet keypair (zeroizes itself)
    #[zeroize(skip)]
    dhs: ExchangeKeypair,
    /// Peer's current ratchet public
    #[zeroize(skip)]
    dhr: Option<ExchangePublicKey>,
    root_key: [u8; 32],
    sending_chain: Option<[u8; 32]>,
    receiving_chain: Option<[u8; 32]>,
    #[zeroize(skip)]
    send_count: u32,
    #[zeroize(skip)]
    recv_count: u32,
    #[zeroize(skip)]
    previous_send_count: u32,
    send_header_key: Option<[u8; 32]>,
    recv_header_key: Option<[u8; 32]>,
    next_send_header_key: [u8; 32],
    next_recv_header_key: [u8; 32],
    skipped: Vec<SkippedKey>,
}

/// Advance the root chain: HKDF over the DH output, salted with the root key
///
/// Returns `(new_root_key, chain_key, next_header_key)`.
fn kdf_root(root_key: &[u8; 32], dh: &[u8; 32], info: &[u8]) -> ([u8; 32], [u8; 32], [u8; 32]) {
    let okm = hkdf(dh, info, 96, Some(root_key));

    let mut new_root = [0u8; 32];
    let mut chain = [0u8; 32];
    let mut next_header = [0u8; 32];
    new_root.copy_from_slice(&okm[..32]);
    chain.copy_from_slice(&okm[32..64]);
    next_header.copy_from_slice(&okm[64..96]);

    (new_root, chain, next_header)
}

/// Advance a sending/receiving chain one message
///
/// Returns `(message_key, next_chain_key)`.
fn kdf_chain(chain_key: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    (hmac(chain_key, &[0x01]), hmac(chain_key, &[0x02]))
}

impl Ratchet {
    /// Initialize the initiator side
    ///
    /// The initiator knows the responder's current ratchet public (the
    /// signed prekey from the bundle) and can send immediately.
    pub fn initiate(
        ad: Vec<u8>,
        info: Vec<u8>,
        keypair: Option<ExchangeKeypair>,
        remote: ExchangePublicKey,
        seed: &SessionSeed,
    ) -> Self {
        let dhs = keypair.unwrap_or_else(ExchangeKeypair::generate);

        let dh = dhs.diffie_hellman(&remote);
        let (root_key, sending_chain, next_send_header_key) = kdf_root(&seed.root, &dh, &info);

        Ratchet {
            ad,
            info,
            dhs,
            dhr: Some(remote),
            root_key,
            sending_chain: Some(sending_chain),
            receiving_chain: None,
            send_count: 0,
            recv_count: 0,
            previous_send_count: 0,
            send_header_key: Some(seed.initiator_header),
            recv_header_key: None,
            next_send_header_key,
            next_recv_header_key: seed.responder_header,
            skipped: Vec::new(),
        }
    }

    /// Initialize the responder side
    ///
    /// The responder has no peer ratchet public yet and cannot send until
    /// its first successful decrypt performs a DH step.
    pub fn respond(
        ad: Vec<u8>,
        info: Vec<u8>,
        keypair: Option<ExchangeKeypair>,
        seed: &SessionSeed,
    ) -> Self {
        Ratchet {
            ad,
            info,
            dhs: keypair.unwrap_or_else(ExchangeKeypair::generate),
            dhr: None,
            root_key: seed.root,
            sending_chain: None,
            receiving_chain: None,
            send_count: 0,
            recv_count: 0,
            previous_send_count: 0,
            send_header_key: None,
            recv_header_key: None,
            next_send_header_key: seed.responder_header,
            next_recv_header_key: seed.initiator_header,
            skipped: Vec::new(),
        }
    }

    /// Own current ratchet public key
    pub fn ratchet_public(&self) -> &ExchangePublicKey {
        self.dhs.public()
    }

    /// Encrypt a message; returns `(encrypted_header, payload)`
    pub fn encrypt(&mut self, plaintext: &[u8]) -> CryptoResult<(Vec<u8>, Vec<u8>)> {
        let (Some(chain_key), Some(header_key)) = (self.sending_chain, self.send_header_key)
        else {
            return Err(CryptoError::NotReady);
        };

        let (message_key, next_chain) = kdf_chain(&chain_key);

        let header = Header {
            ratchet_pub: *self.dhs.public(),
            previous_count: self.previous_send_count,
            message_number: self.send_count,
        };
        let header_bytes = header.seal(&header_key, &self.info);

        let payload = AuthCipher::encrypt(
            &message_key,
            &self.info,
            &self.payload_nonce(&header_bytes),
            plaintext,
        );

        self.sending_chain = Some(next_chain);
        self.send_count += 1;

        Ok((header_bytes, payload))
    }

    /// Decrypt a message given its encrypted header and payload
    ///
    /// Tolerates out-of-order delivery within `MAX_SKIP` messages and across
    /// one epoch boundary. A failed call leaves the state exactly as it was.
    pub fn decrypt(&mut self, header_bytes: &[u8], payload: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut trial = self.clone();
        let plaintext = trial.decrypt_inner(header_bytes, payload)?;
        *self = trial;
        Ok(plaintext)
    }

    fn decrypt_inner(&mut self, header_bytes: &[u8], payload: &[u8]) -> CryptoResult<Vec<u8>> {
        // Skipped-key buffer first: the header may belong to a message we
        // already derived a key for.
        if let Some(index) = self.find_skipped(header_bytes) {
            let message_key = self.skipped[index].message_key;
            let plaintext = self.open_payload(&message_key, header_bytes, payload)?;
            self.skipped.remove(index);
            return Ok(plaintext);
        }

        // Current epoch.
        if let Some(header_key) = self.recv_header_key {
            match Header::open(&header_key, &self.info, header_bytes) {
                Ok(header) => return self.read_from_chain(&header, header_bytes, payload),
                Err(CryptoError::BadHeaderLayout) => return Err(CryptoError::BadHeaderLayout),
                Err(_) => {}
            }
        }

        // Next epoch: a successful open under NHKr commits us to a DH step.
        let header = match Header::open(&self.next_recv_header_key, &self.info, header_bytes) {
            Ok(header) => header,
            Err(CryptoError::BadHeaderLayout) => return Err(CryptoError::BadHeaderLayout),
            Err(_) => return Err(CryptoError::HeaderDecryptFailed),
        };

        self.dh_step(&header)?;
        self.read_from_chain(&header, header_bytes, payload)
    }

    /// Skip to the header's message number, derive its key, open the payload
    fn read_from_chain(
        &mut self,
        header: &Header,
        header_bytes: &[u8],
        payload: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        self.skip_to(header.message_number)?;

        let chain_key = self
            .receiving_chain
            .ok_or(CryptoError::HeaderDecryptFailed)?;
        let (message_key, next_chain) = kdf_chain(&chain_key);

        let plaintext = self.open_payload(&message_key, header_bytes, payload)?;

        self.receiving_chain = Some(next_chain);
        self.recv_count += 1;
        Ok(plaintext)
    }

    /// One DH ratchet step: retire the old receiving chain, rotate header
    /// keys, advance the root chain once for receiving and once for sending
    fn dh_step(&mut self, header: &Header) -> CryptoResult<()> {
        self.skip_to(header.previous_count)?;

        self.previous_send_count = self.send_count;
        self.send_count = 0;
        self.recv_count = 0;
        self.dhr = Some(header.ratchet_pub);
        self.send_header_key = Some(self.next_send_header_key);
        self.recv_header_key = Some(self.next_recv_header_key);

        let dh = self.dhs.diffie_hellman(&header.ratchet_pub);
        let (root_key, receiving_chain, next_recv_header_key) =
            kdf_root(&self.root_key, &dh, &self.info);
        self.root_key = root_key;
        self.receiving_chain = Some(receiving_chain);
        self.next_recv_header_key = next_recv_header_key;

        self.dhs = ExchangeKeypair::generate();
        let dh = self.dhs.diffie_hellman(&header.ratchet_pub);
        let (root_key, sending_chain, next_send_header_key) =
            kdf_root(&self.root_key, &dh, &self.info);
        self.root_key = root_key;
        self.sending_chain = Some(sending_chain);
        self.next_send_header_key = next_send_header_key;

        Ok(())
    }

    /// Derive and buffer message keys for every message up to `until`
    fn skip_to(&mut self, until: u32) -> CryptoResult<()> {
        if (self.recv_count as u64) + (MAX_SKIP as u64) < until as u64 {
            return Err(CryptoError::TooManySkipped);
        }

        // No receiving chain yet: only possible before the first DH step,
        // where the real skip work happens inside the step.
        let Some(mut chain_key) = self.receiving_chain else {
            return Ok(());
        };
        let header_key = self
            .recv_header_key
            .ok_or(CryptoError::HeaderDecryptFailed)?;

        while self.recv_count < until {
            let (message_key, next_chain) = kdf_chain(&chain_key);
            self.skipped.push(SkippedKey {
                header_key,
                message_number: self.recv_count,
                message_key,
            });
            chain_key = next_chain;
            self.recv_count += 1;
        }
        self.receiving_chain = Some(chain_key);

        Ok(())
    }

    fn find_skipped(&self, header_bytes: &[u8]) -> Option<usize> {
        self.skipped.iter().position(|entry| {
            matches!(
                Header::open(&entry.header_key, &self.info, header_bytes),
                Ok(header) if header.message_number == entry.message_number
            )
        })
    }

    fn open_payload(
        &self,
        message_key: &[u8; 32],
        header_bytes: &[u8],
        payload: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        AuthCipher::decrypt(
            message_key,
            &self.info,
            &self.payload_nonce(header_bytes),
            payload,
        )
    }

    /// Payload nonce = AD || encrypted header: binds each payload to its
    /// header and to both parties' identities
    fn payload_nonce(&self, header_bytes: &[u8]) -> Vec<u8> {
        let mut nonce = Vec::with_capacity(self.ad.len() + header_bytes.len());
        nonce.extend_from_slice(&self.ad);
        nonce.extend_from_slice(header_bytes);
        nonce
    }

    /// Number of buffered skipped-message keys
    pub fn skipped_len(&self) -> usize {
        self.skipped.len()
    }
}

impl std::fmt::Debug for Ratchet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ratchet")
            .field("send_count", &self.send_count)
            .field("recv_count", &self.recv_count)
            .field("skipped", &self.skipped.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::MAC_SIZE;
    use crate::crypto::random_bytes;
    use crate::session::header::HEADER_NONCE_SIZE;

    const INFO: &[u8] = b"ratchet-test-v1";

    fn test_seed() -> SessionSeed {
        SessionSeed {
            root: [1u8; 32],
            initiator_header: [2u8; 32],
            responder_header: [3u8; 32],
        }
    }

    fn session_pair() -> (Ratchet, Ratchet) {
        let seed = test_seed();
        let responder_prekey = ExchangeKeypair::generate();

        let initiator = Ratchet::initiate(
            b"test-ad".to_vec(),
            INFO.to_vec(),
            None,
            *responder_prekey.public(),
            &seed,
        );
        let responder = Ratchet::respond(
            b"test-ad".to_vec(),
            INFO.to_vec(),
            Some(responder_prekey),
            &seed,
        );

        (initiator, responder)
    }

    #[test]
    fn test_in_order_roundtrip() {
        let (mut alice, mut bob) = session_pair();

        for i in 0..5 {
            let msg = format!("message {}", i);
            let (header, payload) = alice.encrypt(msg.as_bytes()).unwrap();
            let plaintext = bob.decrypt(&header, &payload).unwrap();
            assert_eq!(msg.as_bytes(), plaintext.as_slice());
        }

        for i in 0..5 {
            let msg = format!("reply {}", i);
            let (header, payload) = bob.encrypt(msg.as_bytes()).unwrap();
            let plaintext = alice.decrypt(&header, &payload).unwrap();
            assert_eq!(msg.as_bytes(), plaintext.as_slice());
        }
    }

    #[test]
    fn test_responder_cannot_send_first() {
        let (_, mut bob) = session_pair();
        assert_eq!(bob.encrypt(b"too early"), Err(CryptoError::NotReady));
    }

    #[test]
    fn test_responder_ready_after_first_decrypt() {
        let (mut alice, mut bob) = session_pair();

        let (header, payload) = alice.encrypt(b"hello").unwrap();
        bob.decrypt(&header, &payload).unwrap();

        assert!(bob.encrypt(b"reply").is_ok());
    }

    #[test]
    fn test_out_of_order_within_chain() {
        let (mut alice, mut bob) = session_pair();

        let m1 = alice.encrypt(b"one").unwrap();
        let m2 = alice.encrypt(b"two").unwrap();
        let m3 = alice.encrypt(b"three").unwrap();

        assert_eq!(bob.decrypt(&m3.0, &m3.1).unwrap(), b"three");
        assert_eq!(bob.decrypt(&m1.0, &m1.1).unwrap(), b"one");
        assert_eq!(bob.decrypt(&m2.0, &m2.1).unwrap(), b"two");

        assert_eq!(bob.skipped_len(), 0);
    }

    #[test]
    fn test_out_of_order_across_epochs() {
        let (mut alice, mut bob) = session_pair();

        // Alice sends three in chain A; Bob reads only the first
        let a0 = alice.encrypt(b"A0").unwrap();
        let a1 = alice.encrypt(b"A1").unwrap();
        let a2 = alice.encrypt(b"A2").unwrap();
        bob.decrypt(&a0.0, &a0.1).unwrap();

        // Bob replies, both sides ratchet
        let b0 = bob.encrypt(b"B0").unwrap();
        alice.decrypt(&b0.0, &b0.1).unwrap();

        // Alice sends in chain B; Bob reads it before the chain-A stragglers
        let c0 = alice.encrypt(b"C0").unwrap();
        assert_eq!(bob.decrypt(&c0.0, &c0.1).unwrap(), b"C0");

        // Chain-A stragglers decrypt from the skipped buffer
        assert_eq!(bob.decrypt(&a1.0, &a1.1).unwrap(), b"A1");
        assert_eq!(bob.decrypt(&a2.0, &a2.1).unwrap(), b"A2");
        assert_eq!(bob.skipped_len(), 0);
    }

    #[test]
    fn test_header_key_handover() {
        let (mut alice, mut bob) = session_pair();

        let m = alice.encrypt(b"first").unwrap();
        bob.decrypt(&m.0, &m.1).unwrap();

        // Bob inherited Alice's sending header key for his receive side,
        // and his DH step derived the key Alice already holds as next-send
        assert_eq!(bob.recv_header_key, alice.send_header_key);
        assert_eq!(bob.next_recv_header_key, alice.next_send_header_key);

        let r = bob.encrypt(b"reply").unwrap();
        alice.decrypt(&r.0, &r.1).unwrap();

        // After Alice's DH step the handover is symmetric: she receives
        // under Bob's sending key, sends under the key Bob will try next,
        // and both sides agree on the following epoch's receive key
        assert_eq!(alice.recv_header_key, bob.send_header_key);
        assert_eq!(alice.send_header_key, Some(bob.next_recv_header_key));
        assert_eq!(alice.next_recv_header_key, bob.next_send_header_key);
    }

    #[test]
    fn test_skip_bound_enforced() {
        let (mut alice, mut bob) = session_pair();

        // Messages 0..=11; message 11 would need 11 skipped keys
        let mut frames = Vec::new();
        for i in 0..12 {
            frames.push(alice.encrypt(format!("m{}", i).as_bytes()).unwrap());
        }

        let last = &frames[11];
        assert_eq!(
            bob.decrypt(&last.0, &last.1),
            Err(CryptoError::TooManySkipped)
        );

        // The failure left the session untouched; in-order delivery works
        for (i, frame) in frames.iter().enumerate().take(11) {
            let plaintext = bob.decrypt(&frame.0, &frame.1).unwrap();
            assert_eq!(plaintext, format!("m{}", i).as_bytes());
        }
    }

    #[test]
    fn test_skip_of_exactly_max_skip_succeeds() {
        let (mut alice, mut bob) = session_pair();

        let mut frames = Vec::new();
        for i in 0..11 {
            frames.push(alice.encrypt(format!("m{}", i).as_bytes()).unwrap());
        }

        // Message 10 skips exactly MAX_SKIP predecessors
        let last = &frames[10];
        assert_eq!(bob.decrypt(&last.0, &last.1).unwrap(), b"m10");
        assert_eq!(bob.skipped_len(), 10);
    }

    #[test]
    fn test_tampered_header_rejected_session_survives() {
        let (mut alice, mut bob) = session_pair();

        let (header, payload) = alice.encrypt(b"intact").unwrap();

        // Flips in the trailing tag and nonce region fail header
        // authentication under both candidate header keys
        let tag_start = header.len() - MAC_SIZE - HEADER_NONCE_SIZE;
        for i in [tag_start, header.len() - HEADER_NONCE_SIZE, header.len() - 1] {
            let mut bad = header.clone();
            bad[i] ^= 0x01;
            assert_eq!(
                bob.decrypt(&bad, &payload),
                Err(CryptoError::HeaderDecryptFailed)
            );
        }

        // A first-block ciphertext flip slips past the header MAC (it binds
        // the nonce only) and opens garbled; the payload MAC, whose nonce
        // includes the tampered header bytes, rejects the frame instead
        let mut bad = header.clone();
        bad[0] ^= 0x01;
        assert_eq!(bob.decrypt(&bad, &payload), Err(CryptoError::InvalidTag));

        // Every failure left the session usable for the legitimate frame
        assert_eq!(bob.decrypt(&header, &payload).unwrap(), b"intact");
    }

    #[test]
    fn test_tampered_payload_rejected_session_survives() {
        let (mut alice, mut bob) = session_pair();

        let (header, payload) = alice.encrypt(b"intact").unwrap();

        let mut bad = payload.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        assert_eq!(bob.decrypt(&header, &bad), Err(CryptoError::InvalidTag));

        // Resending the intact frame decrypts
        assert_eq!(bob.decrypt(&header, &payload).unwrap(), b"intact");
    }

    #[test]
    fn test_authentic_but_malformed_header() {
        let (mut alice, mut bob) = session_pair();

        // Build a header that authenticates under Alice's sending header key
        // but carries a 39-byte body
        let nonce = random_bytes::<16>();
        let mut wire = AuthCipher::encrypt(
            &alice.send_header_key.unwrap(),
            INFO,
            &nonce,
            &[0u8; 39],
        );
        wire.extend_from_slice(&nonce);

        let (_, payload) = alice.encrypt(b"x").unwrap();
        assert_eq!(
            bob.decrypt(&wire, &payload),
            Err(CryptoError::BadHeaderLayout)
        );
    }

    #[test]
    fn test_mismatched_sessions_fail() {
        let (mut alice, _) = session_pair();
        let (_, mut mallory) = session_pair();

        let (header, payload) = alice.encrypt(b"secret").unwrap();
        // Different responder prekey: header keys match but the chains do not
        assert!(mallory.decrypt(&header, &payload).is_err());
    }

    #[test]
    fn test_replayed_message_rejected() {
        let (mut alice, mut bob) = session_pair();

        let (header, payload) = alice.encrypt(b"once").unwrap();
        bob.decrypt(&header, &payload).unwrap();

        // The chain advanced past the replay: the header still opens, but
        // the derived message key no longer matches the payload
        assert_eq!(bob.decrypt(&header, &payload), Err(CryptoError::InvalidTag));
    }

    #[test]
    fn test_long_conversation_many_epochs() {
        let (mut alice, mut bob) = session_pair();

        for round in 0..10 {
            let msg = format!("ping {}", round);
            let (h, p) = alice.encrypt(msg.as_bytes()).unwrap();
            assert_eq!(bob.decrypt(&h, &p).unwrap(), msg.as_bytes());

            let msg = format!("pong {}", round);
            let (h, p) = bob.encrypt(msg.as_bytes()).unwrap();
            assert_eq!(alice.decrypt(&h, &p).unwrap(), msg.as_bytes());
        }
    }

    #[test]
    fn test_seed_split() {
        let okm: Vec<u8> = (0..96).collect();
        let seed = SessionSeed::from_okm(&okm).unwrap();
        assert_eq!(seed.root[0], 0);
        assert_eq!(seed.initiator_header[0], 32);
        assert_eq!(seed.responder_header[0], 64);

        assert!(SessionSeed::from_okm(&okm[..95]).is_err());
    }
}
