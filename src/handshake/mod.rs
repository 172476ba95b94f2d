//! X3DH handshake
//!
//! Seeds a ratchet session between two parties who have never spoken: the
//! responder publishes a prekey bundle to the relay, the initiator fetches
//! it and derives the session secrets from four Diffie-Hellman exchanges
//! (identity x signed-prekey, ephemeral x identity, ephemeral x
//! signed-prekey, ephemeral x one-time-prekey). The handshake output is
//! exactly the seed material the ratchet consumes, plus the first encrypted
//! message.

use std::collections::HashMap;

use zeroize::Zeroize;

use crate::crypto::error::{CryptoError, CryptoResult};
use crate::crypto::hash::hkdf;
use crate::crypto::{ExchangeKeypair, ExchangePublicKey, Identity, SignatureBytes};
use crate::session::{Ratchet, Session, SessionSeed};

/// One-time prekeys generated per bundle publication
pub const ONE_TIME_PREKEY_BATCH: usize = 10;

/// A signed prekey: a Curve25519 keypair whose public half carries an
/// XEdDSA signature by the owner's identity key
#[derive(Clone)]
pub struct SignedPrekey {
    keypair: ExchangeKeypair,
    signature: SignatureBytes,
}

impl SignedPrekey {
    /// Rebuild from persisted parts
    pub fn new(keypair: ExchangeKeypair, signature: SignatureBytes) -> Self {
        SignedPrekey { keypair, signature }
    }

    /// The public half
    pub fn public(&self) -> &ExchangePublicKey {
        self.keypair.public()
    }

    /// The identity signature over the public half
    pub fn signature(&self) -> &SignatureBytes {
        &self.signature
    }

    /// The underlying keypair (for persistence)
    pub fn keypair(&self) -> &ExchangeKeypair {
        &self.keypair
    }
}

/// Client-side prekey bookkeeping
///
/// Holds the current signed prekey, the immediately previous one (so
/// in-flight handshakes addressed to it still succeed), and the secret
/// halves of all unused one-time prekeys keyed by their public bytes.
#[derive(Default)]
pub struct PrekeyStore {
    signed: Option<SignedPrekey>,
    previous: Option<SignedPrekey>,
    one_time: HashMap<[u8; 32], ExchangeKeypair>,
}

/// A full bundle as published to the relay
#[derive(Clone, Debug)]
pub struct PrekeyBundle {
    /// Publisher's identity public (also the peer id)
    pub identity: ExchangePublicKey,
    /// Current signed prekey public
    pub signed_prekey: ExchangePublicKey,
    /// Identity signature over the signed prekey public
    pub signature: SignatureBytes,
    /// Fresh one-time prekey publics
    pub one_time: Vec<ExchangePublicKey>,
}

/// A bundle as fetched by an initiator: the relay pops one one-time prekey
#[derive(Clone, Debug)]
pub struct FetchedBundle {
    /// Signed prekey public
    pub signed_prekey: ExchangePublicKey,
    /// Identity signature over the signed prekey public
    pub signature: SignatureBytes,
    /// The single one-time prekey dedicated to this handshake
    pub one_time: ExchangePublicKey,
}

/// The handshake message the relay queues for the responder
#[derive(Clone, Debug)]
pub struct InitialMessage {
    /// Initiator's identity public
    pub sender_identity: ExchangePublicKey,
    /// Responder's identity public
    pub recipient_identity: ExchangePublicKey,
    /// The signed prekey the initiator keyed against
    pub signed_prekey: ExchangePublicKey,
    /// Initiator's ephemeral public
    pub ephemeral: ExchangePublicKey,
    /// The one-time prekey consumed by this handshake
    pub one_time: ExchangePublicKey,
    /// First encrypted ratchet header
    pub header: Vec<u8>,
    /// First encrypted ratchet payload
    pub payload: Vec<u8>,
}

impl PrekeyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Rotate the signed prekey, mint a batch of one-time prekeys, and
    /// return the bundle to publish
    ///
    /// The outgoing signed prekey is retained for one generation; anything
    /// older is discarded.
    pub fn publish(&mut self, identity: &Identity) -> PrekeyBundle {
        if let Some(old) = self.signed.take() {
            self.previous = Some(old);
        }

        let keypair = ExchangeKeypair::generate();
        let signature = identity.sign(keypair.public().as_bytes());
        let signed = SignedPrekey { keypair, signature };

        let mut one_time = Vec::with_capacity(ONE_TIME_PREKEY_BATCH);
        for _ in 0..ONE_TIME_PREKEY_BATCH {
            let prekey = ExchangeKeypair::generate();
            one_time.push(*prekey.public());
            self.one_time.insert(prekey.public().0, prekey);
        }

        let bundle = PrekeyBundle {
            identity: *identity.public_key(),
            signed_prekey: *signed.public(),
            signature: *signed.signature(),
            one_time,
        };
        self.signed = Some(signed);
        bundle
    }

    /// Number of unused one-time prekey secrets held
    pub fn one_time_count(&self) -> usize {
        self.one_time.len()
    }

    /// Current signed prekey, if a bundle has ever been published
    pub fn signed(&self) -> Option<&SignedPrekey> {
        self.signed.as_ref()
    }

    /// Previous signed prekey, if one generation has been rotated out
    pub fn previous(&self) -> Option<&SignedPrekey> {
        self.previous.as_ref()
    }

    /// One-time prekey secrets (for persistence)
    pub fn one_time_keypairs(&self) -> impl Iterator<Item = &ExchangeKeypair> {
        self.one_time.values()
    }

    /// Rebuild a store from persisted parts
    pub fn from_parts(
        signed: Option<SignedPrekey>,
        previous: Option<SignedPrekey>,
        one_time: Vec<ExchangeKeypair>,
    ) -> Self {
        PrekeyStore {
            signed,
            previous,
            one_time: one_time
                .into_iter()
                .map(|keypair| (keypair.public().0, keypair))
                .collect(),
        }
    }
}

/// Derive the session seed from the four DH outputs
///
/// IKM = 0xFF * 32 || DH1 || DH2 || DH3 || DH4, expanded to 96 bytes.
fn derive_seed(
    dh1: [u8; 32],
    dh2: [u8; 32],
    dh3: [u8; 32],
    dh4: [u8; 32],
    info: &[u8],
) -> SessionSeed {
    let mut ikm = Vec::with_capacity(32 * 5);
    ikm.extend_from_slice(&[0xFF; 32]);
    ikm.extend_from_slice(&dh1);
    ikm.extend_from_slice(&dh2);
    ikm.extend_from_slice(&dh3);
    ikm.extend_from_slice(&dh4);

    let okm = hkdf(&ikm, info, 96, None);
    ikm.zeroize();

    SessionSeed::from_okm(&okm).expect("96-byte OKM splits into a seed")
}

/// Associated data: initiator identity public || responder identity public
fn associated_data(initiator: &ExchangePublicKey, responder: &ExchangePublicKey) -> Vec<u8> {
    let mut ad = Vec::with_capacity(64);
    ad.extend_from_slice(initiator.as_bytes());
    ad.extend_from_slice(responder.as_bytes());
    ad
}

/// Initiator side: derive a session from a fetched bundle and encrypt the
/// first message
///
/// The initiator's identity keypair doubles as its first ratchet keypair;
/// the responder relies on this when it mirrors the first DH step.
pub fn initiate(
    identity: &Identity,
    peer: &ExchangePublicKey,
    bundle: &FetchedBundle,
    plaintext: &[u8],
    info: &[u8],
) -> CryptoResult<(Session, InitialMessage)> {
    if !Identity::verify(peer, bundle.signed_prekey.as_bytes(), &bundle.signature) {
        return Err(CryptoError::InvalidBundleSignature);
    }

    let ephemeral = ExchangeKeypair::generate();

    let dh1 = identity.keypair().diffie_hellman(&bundle.signed_prekey);
    let dh2 = ephemeral.diffie_hellman(peer);
    let dh3 = ephemeral.diffie_hellman(&bundle.signed_prekey);
    let dh4 = ephemeral.diffie_hellman(&bundle.one_time);

    let seed = derive_seed(dh1, dh2, dh3, dh4, info);
    let ad = associated_data(identity.public_key(), peer);

    let mut ratchet = Ratchet::initiate(
        ad,
        info.to_vec(),
        Some(identity.keypair().clone()),
        bundle.signed_prekey,
        &seed,
    );
    let (header, payload) = ratchet.encrypt(plaintext)?;

    let message = InitialMessage {
        sender_identity: *identity.public_key(),
        recipient_identity: *peer,
        signed_prekey: bundle.signed_prekey,
        ephemeral: *ephemeral.public(),
        one_time: bundle.one_time,
        header,
        payload,
    };

    Ok((Session::new(ratchet), message))
}

/// Responder side: accept a queued initial message
///
/// Selects the signed prekey the initiator keyed against (current or the
/// retained previous generation), consumes the referenced one-time prekey
/// (removal from the store is the single-use commit point), mirrors the
/// four DHs, and decrypts the first message.
pub fn respond(
    identity: &Identity,
    store: &mut PrekeyStore,
    message: &InitialMessage,
    info: &[u8],
) -> CryptoResult<(Session, Vec<u8>)> {
    let signed = [store.signed.as_ref(), store.previous.as_ref()]
        .into_iter()
        .flatten()
        .find(|prekey| *prekey.public() == message.signed_prekey)
        .cloned()
        .ok_or(CryptoError::UnknownSignedPrekey)?;

    let one_time = store
        .one_time
        .remove(message.one_time.as_bytes())
        .ok_or(CryptoError::UnknownOneTimePrekey)?;

    let dh1 = signed.keypair.diffie_hellman(&message.sender_identity);
    let dh2 = identity.keypair().diffie_hellman(&message.ephemeral);
    let dh3 = signed.keypair.diffie_hellman(&message.ephemeral);
    let dh4 = one_time.diffie_hellman(&message.ephemeral);

    let seed = derive_seed(dh1, dh2, dh3, dh4, info);
    let ad = associated_data(&message.sender_identity, identity.public_key());

    // The ratchet keypair must be the signed prekey: the initiator's first
    // root derivation mixed x25519(IK_A, SPK_B).
    let ratchet = Ratchet::respond(ad, info.to_vec(), Some(signed.keypair.clone()), &seed);
    let mut session = Session::new(ratchet);

    let plaintext = session.decrypt(&message.header, &message.payload)?;

    Ok((session, plaintext))
}
