//! Shroud relay server
//!
//! An untrusted rendezvous point for two peers:
//! - stores published prekey bundles and pops one one-time key per fetch
//! - queues a single initial handshake message per session for 60 seconds
//! - bridges two live connections joined on the same session id, copying
//!   frames byte for byte
//!
//! The relay only ever handles sealed material; it cannot read headers,
//! payloads, or any secret key.
//!
//! Usage:
//!   shroud-relay [--port 8765] [--host 0.0.0.0]

use clap::Parser;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{error, info, warn};
use uuid::Uuid;

use shroud::transport::{RelayMessage, WireBundle, WireInitialMessage, BRIDGE_READY};

/// Lifetime of a queued initial message and of an unpaired bridge join
const SESSION_TTL: Duration = Duration::from_secs(60);

type WsWrite = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsRead = SplitStream<WebSocketStream<TcpStream>>;

/// Shroud relay server
#[derive(Parser)]
#[command(name = "shroud-relay")]
#[command(about = "Untrusted relay for Shroud end-to-end encrypted messaging")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8765")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
}

/// A stored prekey bundle; one-time keys drain front-to-back
struct StoredBundle {
    pub_sign_pre_key: String,
    pre_key_sig: String,
    one_time_keys: VecDeque<String>,
}

/// An initial message waiting for its responder
struct QueuedInitial {
    message: WireInitialMessage,
    stored_at: Instant,
}

/// First peer of a bridge waiting for its partner
struct PendingBridge {
    /// Channel into the waiting peer's socket
    peer_tx: mpsc::Sender<String>,
    /// Delivers the second peer's channel back to the first
    handoff: oneshot::Sender<mpsc::Sender<String>>,
}

/// Server state
struct RelayState {
    bundles: RwLock<HashMap<String, StoredBundle>>,
    pending: RwLock<HashMap<Uuid, QueuedInitial>>,
    bridges: Mutex<HashMap<Uuid, PendingBridge>>,
}

impl RelayState {
    fn new() -> Self {
        RelayState {
            bundles: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            bridges: Mutex::new(HashMap::new()),
        }
    }

    /// Store a bundle; republishing an unchanged signature is rejected so
    /// every publication proves a genuine rotation
    async fn publish_bundle(&self, bundle: WireBundle) -> RelayMessage {
        let mut bundles = self.bundles.write().await;

        match bundles.get_mut(&bundle.pub_key) {
            Some(stored) if stored.pre_key_sig == bundle.pre_key_sig => RelayMessage::Error {
                message: "Cannot publish bundle with same signature".to_string(),
            },
            Some(stored) => {
                stored.pub_sign_pre_key = bundle.pub_sign_pre_key;
                stored.pre_key_sig = bundle.pre_key_sig;
                stored.one_time_keys.extend(bundle.one_time_keys);
                RelayMessage::BundleStored
            }
            None => {
                bundles.insert(
                    bundle.pub_key.clone(),
                    StoredBundle {
                        pub_sign_pre_key: bundle.pub_sign_pre_key,
                        pre_key_sig: bundle.pre_key_sig,
                        one_time_keys: bundle.one_time_keys.into(),
                    },
                );
                RelayMessage::BundleStored
            }
        }
    }

    /// Fetch a bundle, dedicating one one-time key to the caller
    async fn fetch_bundle(&self, identity: &str) -> RelayMessage {
        let mut bundles = self.bundles.write().await;

        let Some(stored) = bundles.get_mut(identity) else {
            return RelayMessage::Error {
                message: "Unknown identity".to_string(),
            };
        };

        match stored.one_time_keys.pop_front() {
            Some(one_time_key) => RelayMessage::Bundle {
                bundle: shroud::transport::WireFetchedBundle {
                    pub_sign_pre_key: stored.pub_sign_pre_key.clone(),
                    pre_key_sig: stored.pre_key_sig.clone(),
                    one_time_key,
                },
            },
            None => RelayMessage::Error {
                message: "No more oneTimeKeys".to_string(),
            },
        }
    }

    /// Queue an initial message under a fresh session id
    async fn queue_initial(&self, message: WireInitialMessage) -> RelayMessage {
        let sid = Uuid::new_v4();
        self.pending.write().await.insert(
            sid,
            QueuedInitial {
                message,
                stored_at: Instant::now(),
            },
        );
        RelayMessage::InitialQueued {
            session: sid.to_string(),
        }
    }

    /// Remove and return the initial message for a session
    async fn take_initial(&self, session: &str) -> RelayMessage {
        let Ok(sid) = Uuid::parse_str(session) else {
            return RelayMessage::Error {
                message: "Not found".to_string(),
            };
        };

        let mut pending = self.pending.write().await;
        match pending.remove(&sid) {
            Some(queued) if queued.stored_at.elapsed() <= SESSION_TTL => RelayMessage::Initial {
                message: queued.message,
            },
            // Expired entries are dropped on access
            _ => RelayMessage::Error {
                message: "Not found".to_string(),
            },
        }
    }

    /// Drop queued messages nobody fetched within the TTL
    async fn sweep_expired(&self) {
        let mut pending = self.pending.write().await;
        pending.retain(|_, queued| queued.stored_at.elapsed() <= SESSION_TTL);
    }
}

async fn send_message(write: &mut WsWrite, message: &RelayMessage) {
    if let Ok(json) = serde_json::to_string(message) {
        let _ = write.send(Message::Text(json)).await;
    }
}

/// Handle a single WebSocket connection
async fn handle_connection(stream: TcpStream, addr: SocketAddr, state: Arc<RelayState>) {
    info!("New connection from: {}", addr);

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    // Control phase: bundle store and message queue operations, until the
    // connection either closes or joins a live bridge.
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                let relay_msg = match serde_json::from_str::<RelayMessage>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("Invalid message from {}: {}", addr, e);
                        send_message(
                            &mut write,
                            &RelayMessage::Error {
                                message: "Malformed request".to_string(),
                            },
                        )
                        .await;
                        continue;
                    }
                };

                match relay_msg {
                    RelayMessage::PublishBundle { bundle } => {
                        let reply = state.publish_bundle(bundle).await;
                        send_message(&mut write, &reply).await;
                    }
                    RelayMessage::FetchBundle { identity } => {
                        let reply = state.fetch_bundle(&identity).await;
                        send_message(&mut write, &reply).await;
                    }
                    RelayMessage::SendInitial { message } => {
                        let reply = state.queue_initial(message).await;
                        send_message(&mut write, &reply).await;
                    }
                    RelayMessage::FetchInitial { session } => {
                        let reply = state.take_initial(&session).await;
                        send_message(&mut write, &reply).await;
                    }
                    RelayMessage::Join { session } => {
                        match Uuid::parse_str(&session) {
                            Ok(sid) => {
                                handle_join(&mut write, &mut read, &state, sid, addr).await;
                            }
                            Err(_) => {
                                send_message(
                                    &mut write,
                                    &RelayMessage::Error {
                                        message: "Invalid session id".to_string(),
                                    },
                                )
                                .await;
                            }
                        }
                        break;
                    }
                    _ => {
                        send_message(
                            &mut write,
                            &RelayMessage::Error {
                                message: "Unexpected message".to_string(),
                            },
                        )
                        .await;
                    }
                }
            }

            Some(Ok(Message::Close(_))) | None => {
                info!("Client {} disconnected", addr);
                break;
            }

            Some(Ok(Message::Ping(data))) => {
                let _ = write.send(Message::Pong(data)).await;
            }

            Some(Err(e)) => {
                error!("WebSocket error from {}: {}", addr, e);
                break;
            }

            _ => {}
        }
    }
}

/// Pair two connections on a session id, then copy frames verbatim
async fn handle_join(
    write: &mut WsWrite,
    read: &mut WsRead,
    state: &Arc<RelayState>,
    sid: Uuid,
    addr: SocketAddr,
) {
    let waiting = {
        let mut bridges = state.bridges.lock().await;
        bridges.remove(&sid)
    };

    match waiting {
        // Second peer: hand our channel to the first and go live
        Some(pending) => {
            let (our_tx, our_rx) = mpsc::channel(100);
            if pending.handoff.send(our_tx).is_err() {
                send_message(
                    write,
                    &RelayMessage::Error {
                        message: "Peer left before pairing".to_string(),
                    },
                )
                .await;
                return;
            }

            info!("Bridge paired for session {}", sid);
            let _ = write.send(Message::Text(BRIDGE_READY.to_string())).await;
            bridge_loop(write, read, pending.peer_tx, our_rx, addr).await;
        }

        // First peer: park a slot and wait for the partner
        None => {
            let (our_tx, our_rx) = mpsc::channel(100);
            let (handoff_tx, handoff_rx) = oneshot::channel();
            state.bridges.lock().await.insert(
                sid,
                PendingBridge {
                    peer_tx: our_tx,
                    handoff: handoff_tx,
                },
            );

            match tokio::time::timeout(SESSION_TTL, handoff_rx).await {
                Ok(Ok(peer_tx)) => {
                    let _ = write.send(Message::Text(BRIDGE_READY.to_string())).await;
                    bridge_loop(write, read, peer_tx, our_rx, addr).await;
                }
                _ => {
                    state.bridges.lock().await.remove(&sid);
                    warn!("Bridge pairing timed out for session {}", sid);
                    send_message(
                        write,
                        &RelayMessage::Error {
                            message: "Pairing timed out".to_string(),
                        },
                    )
                    .await;
                }
            }
        }
    }
}

/// Forward every text frame between the two paired sockets, unmodified
async fn bridge_loop(
    write: &mut WsWrite,
    read: &mut WsRead,
    peer_tx: mpsc::Sender<String>,
    mut inbox: mpsc::Receiver<String>,
    addr: SocketAddr,
) {
    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if peer_tx.send(text).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("Bridge peer {} disconnected", addr);
                    break;
                }
                Some(Err(e)) => {
                    error!("Bridge error from {}: {}", addr, e);
                    break;
                }
                _ => {}
            },

            item = inbox.recv() => match item {
                Some(text) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shroud_relay=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let listener = TcpListener::bind(&addr).await.expect("Failed to bind");
    info!("Shroud relay listening on ws://{}", addr);

    let state = Arc::new(RelayState::new());

    // Evict initial messages nobody fetched
    let sweeper = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SESSION_TTL).await;
            sweeper.sweep_expired().await;
        }
    });

    while let Ok((stream, addr)) = listener.accept().await {
        let state = state.clone();
        tokio::spawn(handle_connection(stream, addr, state));
    }
}
