//! Transport layer
//!
//! Moves opaque bytes and wire objects between a client and the relay; all
//! encryption happens above this layer. Provides the relay wire protocol
//! (JSON control messages + base64 binary fields), the live-bridge frame
//! format, an abstract `Transport` trait, and an in-memory transport for
//! tests.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{ExchangePublicKey, SignatureBytes};
use crate::handshake::{FetchedBundle, InitialMessage, PrekeyBundle};

pub mod websocket;
pub use websocket::RelayClient;

/// The literal text the relay sends each peer once a bridge is paired
pub const BRIDGE_READY: &str = "OK";

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed
    #[error("Connection closed")]
    Disconnected,

    /// Send failed
    #[error("Failed to send: {0}")]
    SendFailed(String),

    /// Receive failed
    #[error("Failed to receive: {0}")]
    ReceiveFailed(String),

    /// The relay rejected a request
    #[error("Relay error: {0}")]
    Relay(String),

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

fn encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

fn decode(text: &str) -> TransportResult<Vec<u8>> {
    BASE64
        .decode(text.trim())
        .map_err(|e| TransportError::InvalidData(e.to_string()))
}

fn decode_public(text: &str) -> TransportResult<ExchangePublicKey> {
    ExchangePublicKey::from_bytes(&decode(text)?)
        .map_err(|e| TransportError::InvalidData(e.to_string()))
}

fn decode_signature(text: &str) -> TransportResult<SignatureBytes> {
    SignatureBytes::from_bytes(&decode(text)?)
        .map_err(|e| TransportError::InvalidData(e.to_string()))
}

/// A published prekey bundle on the wire
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBundle {
    /// Publisher identity public (base64)
    pub pub_key: String,
    /// Signed prekey public (base64)
    pub pub_sign_pre_key: String,
    /// Identity signature over the signed prekey (base64)
    pub pre_key_sig: String,
    /// Fresh one-time prekey publics (base64 each)
    pub one_time_keys: Vec<String>,
}

impl WireBundle {
    /// Encode a bundle for publication
    pub fn from_bundle(bundle: &PrekeyBundle) -> Self {
        WireBundle {
            pub_key: encode(bundle.identity.as_bytes()),
            pub_sign_pre_key: encode(bundle.signed_prekey.as_bytes()),
            pre_key_sig: encode(bundle.signature.as_bytes()),
            one_time_keys: bundle
                .one_time
                .iter()
                .map(|key| encode(key.as_bytes()))
                .collect(),
        }
    }
}

/// A fetched bundle on the wire: the relay pops one one-time key per fetch
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFetchedBundle {
    /// Signed prekey public (base64)
    pub pub_sign_pre_key: String,
    /// Identity signature over the signed prekey (base64)
    pub pre_key_sig: String,
    /// The single one-time prekey dedicated to this fetch (base64)
    pub one_time_key: String,
}

impl WireFetchedBundle {
    /// Decode into the handshake-facing bundle
    pub fn to_bundle(&self) -> TransportResult<FetchedBundle> {
        Ok(FetchedBundle {
            signed_prekey: decode_public(&self.pub_sign_pre_key)?,
            signature: decode_signature(&self.pre_key_sig)?,
            one_time: decode_public(&self.one_time_key)?,
        })
    }
}

/// The X3DH initial message on the wire
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireInitialMessage {
    /// Initiator identity public (base64)
    pub pub_key: String,
    /// Responder identity public (base64)
    pub peer_key: String,
    /// Signed prekey the initiator keyed against (base64)
    pub pub_sign_pre_key: String,
    /// Initiator ephemeral public (base64)
    pub ephemeral_key: String,
    /// One-time prekey consumed by this handshake (base64)
    pub one_time_key: String,
    /// First encrypted ratchet header (base64)
    pub header: String,
    /// First encrypted ratchet payload (base64)
    pub payload: String,
}

impl WireInitialMessage {
    /// Encode an initial message for the relay queue
    pub fn from_message(message: &InitialMessage) -> Self {
        WireInitialMessage {
            pub_key: encode(message.sender_identity.as_bytes()),
            peer_key: encode(message.recipient_identity.as_bytes()),
            pub_sign_pre_key: encode(message.signed_prekey.as_bytes()),
            ephemeral_key: encode(message.ephemeral.as_bytes()),
            one_time_key: encode(message.one_time.as_bytes()),
            header: encode(&message.header),
            payload: encode(&message.payload),
        }
    }

    /// Decode into the handshake-facing message
    pub fn to_message(&self) -> TransportResult<InitialMessage> {
        Ok(InitialMessage {
            sender_identity: decode_public(&self.pub_key)?,
            recipient_identity: decode_public(&self.peer_key)?,
            signed_prekey: decode_public(&self.pub_sign_pre_key)?,
            ephemeral: decode_public(&self.ephemeral_key)?,
            one_time: decode_public(&self.one_time_key)?,
            header: decode(&self.header)?,
            payload: decode(&self.payload)?,
        })
    }
}

/// One encrypted message on the live bridge
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Frame {
    /// Encrypted ratchet header (base64)
    pub header: String,
    /// Encrypted payload (base64)
    pub payload: String,
}

impl Frame {
    /// Build a frame from raw header and payload bytes
    pub fn new(header: &[u8], payload: &[u8]) -> Self {
        Frame {
            header: encode(header),
            payload: encode(payload),
        }
    }

    /// Decode back into `(header, payload)` bytes
    pub fn into_parts(&self) -> TransportResult<(Vec<u8>, Vec<u8>)> {
        Ok((decode(&self.header)?, decode(&self.payload)?))
    }
}

/// Control messages exchanged with the relay before a bridge is live
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RelayMessage {
    /// Publish a prekey bundle
    PublishBundle {
        /// The bundle being published
        bundle: WireBundle,
    },
    /// Bundle accepted by the store
    BundleStored,
    /// Fetch a bundle by identity public (base64)
    FetchBundle {
        /// Identity public of the bundle owner
        identity: String,
    },
    /// A fetched bundle, one one-time key popped
    Bundle {
        /// The fetched bundle
        bundle: WireFetchedBundle,
    },
    /// Queue an initial handshake message
    SendInitial {
        /// The initial message
        message: WireInitialMessage,
    },
    /// Initial message queued under a fresh session id
    InitialQueued {
        /// Relay-minted session UUID
        session: String,
    },
    /// Fetch (and remove) the initial message for a session
    FetchInitial {
        /// Session id the responder was told out of band
        session: String,
    },
    /// The queued initial message
    Initial {
        /// The initial message
        message: WireInitialMessage,
    },
    /// Join the live bridge for a session
    Join {
        /// Session id to pair on
        session: String,
    },
    /// Request failed
    Error {
        /// Human-readable reason
        message: String,
    },
}

/// Abstract transport trait
///
/// A transport only moves bytes; encryption happens at the session layer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send data to the peer
    async fn send(&mut self, data: &[u8]) -> TransportResult<()>;

    /// Receive data from the peer
    ///
    /// Blocks until data is available or the connection is closed.
    async fn receive(&mut self) -> TransportResult<Vec<u8>>;

    /// Check if the transport is connected
    fn is_connected(&self) -> bool;

    /// Close the transport
    async fn close(&mut self) -> TransportResult<()>;
}

/// In-memory transport for testing
///
/// Uses channels to simulate a connection between two endpoints.
pub mod memory {
    use super::*;
    use tokio::sync::mpsc;

    /// Create a pair of connected in-memory transports
    pub fn create_pair() -> (MemoryTransport, MemoryTransport) {
        let (tx1, rx1) = mpsc::channel(100);
        let (tx2, rx2) = mpsc::channel(100);

        let transport1 = MemoryTransport {
            tx: tx1,
            rx: rx2,
            connected: true,
        };

        let transport2 = MemoryTransport {
            tx: tx2,
            rx: rx1,
            connected: true,
        };

        (transport1, transport2)
    }

    /// In-memory transport endpoint
    pub struct MemoryTransport {
        tx: mpsc::Sender<Vec<u8>>,
        rx: mpsc::Receiver<Vec<u8>>,
        connected: bool,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&mut self, data: &[u8]) -> TransportResult<()> {
            if !self.connected {
                return Err(TransportError::Disconnected);
            }

            self.tx
                .send(data.to_vec())
                .await
                .map_err(|_| TransportError::SendFailed("Channel closed".to_string()))
        }

        async fn receive(&mut self) -> TransportResult<Vec<u8>> {
            if !self.connected {
                return Err(TransportError::Disconnected);
            }

            self.rx.recv().await.ok_or(TransportError::Disconnected)
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn close(&mut self) -> TransportResult<()> {
            self.connected = false;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Identity;
    use crate::handshake::PrekeyStore;

    #[test]
    fn test_bundle_wire_field_names() {
        let identity = Identity::generate();
        let mut store = PrekeyStore::new();
        let bundle = store.publish(&identity);

        let wire = WireBundle::from_bundle(&bundle);
        let json = serde_json::to_string(&wire).unwrap();

        // Existing peers parse these exact names
        assert!(json.contains("\"pubKey\""));
        assert!(json.contains("\"pubSignPreKey\""));
        assert!(json.contains("\"preKeySig\""));
        assert!(json.contains("\"oneTimeKeys\""));
    }

    #[test]
    fn test_fetched_bundle_roundtrip() {
        let identity = Identity::generate();
        let mut store = PrekeyStore::new();
        let bundle = store.publish(&identity);

        let wire = WireFetchedBundle {
            pub_sign_pre_key: encode(bundle.signed_prekey.as_bytes()),
            pre_key_sig: encode(bundle.signature.as_bytes()),
            one_time_key: encode(bundle.one_time[0].as_bytes()),
        };

        let fetched = wire.to_bundle().unwrap();
        assert_eq!(fetched.signed_prekey, bundle.signed_prekey);
        assert_eq!(fetched.signature, bundle.signature);
        assert_eq!(fetched.one_time, bundle.one_time[0]);
    }

    #[test]
    fn test_initial_message_roundtrip() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let mut store = PrekeyStore::new();
        let mut bundle = store.publish(&bob);

        let fetched = crate::handshake::FetchedBundle {
            signed_prekey: bundle.signed_prekey,
            signature: bundle.signature,
            one_time: bundle.one_time.remove(0),
        };

        let (_, message) = crate::handshake::initiate(
            &alice,
            bob.public_key(),
            &fetched,
            b"wire test",
            crate::session::PROTOCOL_INFO,
        )
        .unwrap();

        let wire = WireInitialMessage::from_message(&message);
        let json = serde_json::to_string(&wire).unwrap();
        assert!(json.contains("\"peerKey\""));
        assert!(json.contains("\"ephemeralKey\""));
        assert!(json.contains("\"oneTimeKey\""));

        let parsed: WireInitialMessage = serde_json::from_str(&json).unwrap();
        let restored = parsed.to_message().unwrap();
        assert_eq!(restored.sender_identity, message.sender_identity);
        assert_eq!(restored.header, message.header);
        assert_eq!(restored.payload, message.payload);
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::new(b"header bytes", b"payload bytes");
        let json = serde_json::to_string(&frame).unwrap();

        let parsed: Frame = serde_json::from_str(&json).unwrap();
        let (header, payload) = parsed.into_parts().unwrap();
        assert_eq!(header, b"header bytes");
        assert_eq!(payload, b"payload bytes");
    }

    #[test]
    fn test_frame_rejects_bad_base64() {
        let frame = Frame {
            header: "not base64!!!".to_string(),
            payload: String::new(),
        };
        assert!(frame.into_parts().is_err());
    }

    #[test]
    fn test_relay_message_serialization() {
        let msg = RelayMessage::FetchBundle {
            identity: "AAAA".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: RelayMessage = serde_json::from_str(&json).unwrap();

        match parsed {
            RelayMessage::FetchBundle { identity } => assert_eq!(identity, "AAAA"),
            _ => panic!("Wrong message type"),
        }
    }

    #[tokio::test]
    async fn test_session_frames_over_transport() {
        // Full path: handshake, then sealed frames through a byte transport
        let alice = Identity::generate();
        let bob = Identity::generate();
        let mut bob_prekeys = PrekeyStore::new();
        let mut bundle = bob_prekeys.publish(&bob);

        let fetched = crate::handshake::FetchedBundle {
            signed_prekey: bundle.signed_prekey,
            signature: bundle.signature,
            one_time: bundle.one_time.remove(0),
        };

        let (mut alice_session, initial) = crate::handshake::initiate(
            &alice,
            bob.public_key(),
            &fetched,
            b"opening move",
            crate::session::PROTOCOL_INFO,
        )
        .unwrap();
        let (mut bob_session, _) = crate::handshake::respond(
            &bob,
            &mut bob_prekeys,
            &initial,
            crate::session::PROTOCOL_INFO,
        )
        .unwrap();

        let (mut alice_end, mut bob_end) = memory::create_pair();

        // Alice -> transport -> Bob
        let (header, payload) = alice_session.encrypt(b"over the wire").unwrap();
        let json = serde_json::to_string(&Frame::new(&header, &payload)).unwrap();
        alice_end.send(json.as_bytes()).await.unwrap();

        let received = bob_end.receive().await.unwrap();
        let frame: Frame = serde_json::from_slice(&received).unwrap();
        let (header, payload) = frame.into_parts().unwrap();
        assert_eq!(
            bob_session.decrypt(&header, &payload).unwrap(),
            b"over the wire"
        );

        // Bob -> transport -> Alice
        let (header, payload) = bob_session.encrypt(b"right back").unwrap();
        let json = serde_json::to_string(&Frame::new(&header, &payload)).unwrap();
        bob_end.send(json.as_bytes()).await.unwrap();

        let received = alice_end.receive().await.unwrap();
        let frame: Frame = serde_json::from_slice(&received).unwrap();
        let (header, payload) = frame.into_parts().unwrap();
        assert_eq!(
            alice_session.decrypt(&header, &payload).unwrap(),
            b"right back"
        );
    }

    #[tokio::test]
    async fn test_memory_transport() {
        let (mut alice, mut bob) = memory::create_pair();

        alice.send(b"Hello Bob").await.unwrap();
        let received = bob.receive().await.unwrap();
        assert_eq!(received, b"Hello Bob");

        bob.send(b"Hello Alice").await.unwrap();
        let received = alice.receive().await.unwrap();
        assert_eq!(received, b"Hello Alice");
    }

    #[tokio::test]
    async fn test_memory_transport_close() {
        let (mut alice, _bob) = memory::create_pair();

        alice.close().await.unwrap();
        assert!(!alice.is_connected());
        assert!(alice.send(b"test").await.is_err());
    }
}
