//! Per-client session directory
//!
//! A `Client` owns everything one peer needs across its lifetime: the
//! long-term identity keypair, the prekey store, and the map from relay
//! session id to ratchet session. All operations on one session go through
//! this struct from the client's own execution context; no further locking
//! is needed.

use std::collections::HashMap;

use uuid::Uuid;

use crate::crypto::error::{CryptoError, CryptoResult};
use crate::crypto::{ExchangePublicKey, Identity};
use crate::handshake::{self, FetchedBundle, InitialMessage, PrekeyBundle, PrekeyStore};
use crate::session::{Session, PROTOCOL_INFO};

/// A messaging client: identity, prekeys, and live sessions
pub struct Client {
    identity: Identity,
    prekeys: PrekeyStore,
    sessions: HashMap<Uuid, Session>,
}

impl Client {
    /// Create a client around an identity with an empty directory
    pub fn new(identity: Identity) -> Self {
        Client {
            identity,
            prekeys: PrekeyStore::new(),
            sessions: HashMap::new(),
        }
    }

    /// Create a client with a previously persisted prekey store
    pub fn with_prekeys(identity: Identity, prekeys: PrekeyStore) -> Self {
        Client {
            identity,
            prekeys,
            sessions: HashMap::new(),
        }
    }

    /// This client's identity public key (its peer id)
    pub fn identity_public(&self) -> &ExchangePublicKey {
        self.identity.public_key()
    }

    /// Borrow the prekey store (for persistence)
    pub fn prekeys(&self) -> &PrekeyStore {
        &self.prekeys
    }

    /// Rotate prekeys and produce a fresh bundle for the relay
    pub fn publish_bundle(&mut self) -> PrekeyBundle {
        self.prekeys.publish(&self.identity)
    }

    /// Start a session with `peer` from a fetched bundle
    ///
    /// Returns the initial message for the relay; the session is registered
    /// with [`Client::register_session`] once the relay assigns an id.
    pub fn initiate(
        &self,
        peer: &ExchangePublicKey,
        bundle: &FetchedBundle,
        plaintext: &[u8],
    ) -> CryptoResult<(Session, InitialMessage)> {
        handshake::initiate(&self.identity, peer, bundle, plaintext, PROTOCOL_INFO)
    }

    /// Register a session under the relay-assigned id
    pub fn register_session(&mut self, sid: Uuid, session: Session) {
        self.sessions.insert(sid, session);
    }

    /// Accept a queued initial message, registering the session under `sid`
    ///
    /// Returns the decrypted first plaintext.
    pub fn accept(&mut self, sid: Uuid, message: &InitialMessage) -> CryptoResult<Vec<u8>> {
        let (session, plaintext) =
            handshake::respond(&self.identity, &mut self.prekeys, message, PROTOCOL_INFO)?;
        self.sessions.insert(sid, session);
        Ok(plaintext)
    }

    /// Encrypt on the session registered under `sid`
    pub fn encrypt(&mut self, sid: &Uuid, plaintext: &[u8]) -> CryptoResult<(Vec<u8>, Vec<u8>)> {
        self.sessions
            .get_mut(sid)
            .ok_or(CryptoError::UnknownSession)?
            .encrypt(plaintext)
    }

    /// Decrypt on the session registered under `sid`
    pub fn decrypt(
        &mut self,
        sid: &Uuid,
        header: &[u8],
        payload: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        self.sessions
            .get_mut(sid)
            .ok_or(CryptoError::UnknownSession)?
            .decrypt(header, payload)
    }

    /// Number of registered sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Relay-side bundle pop, in miniature
    fn pop_fetched(bundle: &mut PrekeyBundle) -> FetchedBundle {
        FetchedBundle {
            signed_prekey: bundle.signed_prekey,
            signature: bundle.signature,
            one_time: bundle.one_time.remove(0),
        }
    }

    #[test]
    fn test_directory_end_to_end() {
        let mut alice = Client::new(Identity::generate());
        let mut bob = Client::new(Identity::generate());

        let mut bundle = bob.publish_bundle();
        let fetched = pop_fetched(&mut bundle);

        let (session, message) = alice
            .initiate(bob.identity_public(), &fetched, b"hello")
            .unwrap();

        let sid = Uuid::new_v4();
        alice.register_session(sid, session);

        let plaintext = bob.accept(sid, &message).unwrap();
        assert_eq!(plaintext, b"hello");

        let (header, payload) = bob.encrypt(&sid, b"welcome").unwrap();
        assert_eq!(alice.decrypt(&sid, &header, &payload).unwrap(), b"welcome");
    }

    #[test]
    fn test_sessions_are_independent() {
        let mut alice = Client::new(Identity::generate());
        let mut bob = Client::new(Identity::generate());
        let mut carol = Client::new(Identity::generate());

        let mut bob_bundle = bob.publish_bundle();
        let mut carol_bundle = carol.publish_bundle();

        let (s1, m1) = alice
            .initiate(bob.identity_public(), &pop_fetched(&mut bob_bundle), b"to bob")
            .unwrap();
        let (s2, m2) = alice
            .initiate(
                carol.identity_public(),
                &pop_fetched(&mut carol_bundle),
                b"to carol",
            )
            .unwrap();

        let sid1 = Uuid::new_v4();
        let sid2 = Uuid::new_v4();
        alice.register_session(sid1, s1);
        alice.register_session(sid2, s2);
        assert_eq!(alice.session_count(), 2);

        assert_eq!(bob.accept(sid1, &m1).unwrap(), b"to bob");
        assert_eq!(carol.accept(sid2, &m2).unwrap(), b"to carol");

        // Traffic on one session does not disturb the other
        let (h, p) = alice.encrypt(&sid1, b"bob only").unwrap();
        assert_eq!(bob.decrypt(&sid1, &h, &p).unwrap(), b"bob only");
        let (h, p) = alice.encrypt(&sid2, b"carol only").unwrap();
        assert_eq!(carol.decrypt(&sid2, &h, &p).unwrap(), b"carol only");
    }

    #[test]
    fn test_unknown_session_id() {
        let mut alice = Client::new(Identity::generate());
        assert_eq!(
            alice.encrypt(&Uuid::new_v4(), b"void").err(),
            Some(CryptoError::UnknownSession)
        );
    }
}
