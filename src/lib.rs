//! # Shroud
//!
//! End-to-end encrypted two-party messaging over an untrusted relay.
//!
//! ## Features
//!
//! - **X3DH handshake** seeding each session from published prekey bundles
//! - **Double Ratchet** with encrypted headers and out-of-order tolerance
//! - **Untrusted relay**: stores sealed bundles, queues one handshake
//!   message, and bridges live sessions without ever seeing plaintext
//! - **Trust on first use**: peers are identified by their long-term
//!   Curve25519 public key, exchanged out of band
//!
//! ## Quick start
//!
//! ```rust
//! use shroud::crypto::Identity;
//! use shroud::handshake::{self, FetchedBundle, PrekeyStore};
//! use shroud::session::PROTOCOL_INFO;
//!
//! // Bob publishes a bundle; the relay would pop one one-time key per fetch
//! let (alice, bob) = (Identity::generate(), Identity::generate());
//! let mut bob_prekeys = PrekeyStore::new();
//! let mut bundle = bob_prekeys.publish(&bob);
//! let fetched = FetchedBundle {
//!     signed_prekey: bundle.signed_prekey,
//!     signature: bundle.signature,
//!     one_time: bundle.one_time.remove(0),
//! };
//!
//! // Alice initiates; Bob accepts; both ends now hold a live session
//! let (mut alice_session, initial) =
//!     handshake::initiate(&alice, bob.public_key(), &fetched, b"hi bob", PROTOCOL_INFO).unwrap();
//! let (mut bob_session, first) =
//!     handshake::respond(&bob, &mut bob_prekeys, &initial, PROTOCOL_INFO).unwrap();
//! assert_eq!(first, b"hi bob");
//!
//! let (header, payload) = bob_session.encrypt(b"hi alice").unwrap();
//! assert_eq!(alice_session.decrypt(&header, &payload).unwrap(), b"hi alice");
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              APPLICATION LAYER              │
//! │            CLI  |  future apps              │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │              PROTOCOL LAYER                 │
//! │  X3DH handshake | Ratchet sessions | Client │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │               CRYPTO LAYER                  │
//! │  X25519 | XEdDSA | AES-256-CBC | HMAC/HKDF  │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │             TRANSPORT LAYER                 │
//! │    WebSocket relay | in-memory | future     │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod crypto;
pub mod handshake;
pub mod session;
pub mod transport;

// Re-export main types at crate root
pub use client::Client;
pub use crypto::{random_bytes, CryptoError, CryptoResult, ExchangePublicKey, Identity};
pub use session::{Session, PROTOCOL_INFO};
