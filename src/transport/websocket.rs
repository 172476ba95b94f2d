//! WebSocket relay client
//!
//! Speaks the relay's JSON control protocol (bundle store and initial
//! message queue) and the raw-frame live bridge. The relay never sees
//! plaintext: everything it stores or forwards is sealed by the session
//! layer before it reaches this client.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use super::{
    Frame, RelayMessage, TransportError, TransportResult, WireBundle, WireInitialMessage,
    BRIDGE_READY,
};
use crate::crypto::ExchangePublicKey;
use crate::handshake::{FetchedBundle, InitialMessage, PrekeyBundle};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A client connection to the relay server
pub struct RelayClient {
    ws: WsStream,
    connected: bool,
    paired: bool,
}

impl RelayClient {
    /// Connect to a relay server
    pub async fn connect(relay_url: &str) -> TransportResult<Self> {
        let (ws, _) = connect_async(relay_url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        Ok(RelayClient {
            ws,
            connected: true,
            paired: false,
        })
    }

    /// Publish a prekey bundle to the relay store
    pub async fn publish_bundle(&mut self, bundle: &PrekeyBundle) -> TransportResult<()> {
        let request = RelayMessage::PublishBundle {
            bundle: WireBundle::from_bundle(bundle),
        };
        match self.request(&request).await? {
            RelayMessage::BundleStored => Ok(()),
            RelayMessage::Error { message } => Err(TransportError::Relay(message)),
            other => Err(unexpected(&other)),
        }
    }

    /// Fetch a peer's bundle; the relay dedicates one one-time prekey to us
    pub async fn fetch_bundle(
        &mut self,
        identity: &ExchangePublicKey,
    ) -> TransportResult<FetchedBundle> {
        let request = RelayMessage::FetchBundle {
            identity: BASE64.encode(identity.as_bytes()),
        };
        match self.request(&request).await? {
            RelayMessage::Bundle { bundle } => bundle.to_bundle(),
            RelayMessage::Error { message } => Err(TransportError::Relay(message)),
            other => Err(unexpected(&other)),
        }
    }

    /// Queue an initial handshake message; returns the relay-minted session id
    pub async fn send_initial(&mut self, message: &InitialMessage) -> TransportResult<Uuid> {
        let request = RelayMessage::SendInitial {
            message: WireInitialMessage::from_message(message),
        };
        match self.request(&request).await? {
            RelayMessage::InitialQueued { session } => Uuid::parse_str(&session)
                .map_err(|e| TransportError::InvalidData(e.to_string())),
            RelayMessage::Error { message } => Err(TransportError::Relay(message)),
            other => Err(unexpected(&other)),
        }
    }

    /// Fetch (and consume) the initial message queued under `sid`
    pub async fn fetch_initial(&mut self, sid: &Uuid) -> TransportResult<InitialMessage> {
        let request = RelayMessage::FetchInitial {
            session: sid.to_string(),
        };
        match self.request(&request).await? {
            RelayMessage::Initial { message } => message.to_message(),
            RelayMessage::Error { message } => Err(TransportError::Relay(message)),
            other => Err(unexpected(&other)),
        }
    }

    /// Join the live bridge for a session and wait until both peers are in
    ///
    /// Resolves once the relay sends its `"OK"` marker; afterwards the
    /// connection carries raw frames only.
    pub async fn join(&mut self, sid: &Uuid) -> TransportResult<()> {
        let request = RelayMessage::Join {
            session: sid.to_string(),
        };
        self.send_text(&serde_json::to_string(&request).map_err(to_send_error)?)
            .await?;

        loop {
            let text = self.next_text().await?;
            if text == BRIDGE_READY {
                self.paired = true;
                return Ok(());
            }
            if let Ok(RelayMessage::Error { message }) = serde_json::from_str(&text) {
                return Err(TransportError::Relay(message));
            }
        }
    }

    /// Split a paired connection into independent send and receive halves
    ///
    /// Only valid after [`RelayClient::join`] has resolved; the halves can
    /// then be driven concurrently from one `select!` loop.
    pub fn split(self) -> TransportResult<(FrameSink, FrameStream)> {
        if !self.paired {
            return Err(TransportError::SendFailed("Bridge not joined".to_string()));
        }
        let (write, read) = self.ws.split();
        Ok((FrameSink { write }, FrameStream { read }))
    }

    /// Close the connection
    pub async fn close(&mut self) -> TransportResult<()> {
        self.connected = false;
        self.ws
            .close(None)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Send a control message and return the relay's next control reply
    async fn request(&mut self, message: &RelayMessage) -> TransportResult<RelayMessage> {
        self.send_text(&serde_json::to_string(message).map_err(to_send_error)?)
            .await?;

        loop {
            let text = self.next_text().await?;
            if let Ok(reply) = serde_json::from_str(&text) {
                return Ok(reply);
            }
        }
    }

    async fn send_text(&mut self, text: &str) -> TransportResult<()> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn next_text(&mut self) -> TransportResult<String> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Close(_))) | None => {
                    self.connected = false;
                    return Err(TransportError::Disconnected);
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.ws.send(Message::Pong(data)).await;
                }
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                _ => continue,
            }
        }
    }
}

/// Sending half of a live bridge connection
pub struct FrameSink {
    write: SplitSink<WsStream, Message>,
}

impl FrameSink {
    /// Send an encrypted frame across the bridge
    pub async fn send_frame(&mut self, frame: &Frame) -> TransportResult<()> {
        let json = serde_json::to_string(frame).map_err(to_send_error)?;
        self.write
            .send(Message::Text(json))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Close the connection
    pub async fn close(&mut self) -> TransportResult<()> {
        self.write
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

/// Receiving half of a live bridge connection
pub struct FrameStream {
    read: SplitStream<WsStream>,
}

impl FrameStream {
    /// Receive the next frame from the peer
    pub async fn recv_frame(&mut self) -> TransportResult<Frame> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(frame) = serde_json::from_str::<Frame>(&text) {
                        return Ok(frame);
                    }
                    // Anything unparsable on a live bridge is dropped
                }
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Disconnected),
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                _ => continue,
            }
        }
    }
}

fn unexpected(message: &RelayMessage) -> TransportError {
    TransportError::InvalidData(format!("Unexpected relay reply: {:?}", message))
}

fn to_send_error(e: serde_json::Error) -> TransportError {
    TransportError::SendFailed(e.to_string())
}
