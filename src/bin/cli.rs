//! Shroud CLI
//!
//! A command-line client for end-to-end encrypted messaging through an
//! untrusted relay: publish a prekey bundle, dial a peer by identity key,
//! accept an incoming session by id, then chat over the live bridge.

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use shroud::client::Client;
use shroud::crypto::{ExchangeKeypair, ExchangePublicKey, Identity, SignatureBytes};
use shroud::handshake::{PrekeyStore, SignedPrekey};
use shroud::transport::{Frame, RelayClient};

/// Shroud: end-to-end encrypted messaging over an untrusted relay
#[derive(Parser)]
#[command(name = "shroud")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to identity file (default: ~/.shroud/identity.key)
    #[arg(short, long)]
    identity: Option<PathBuf>,

    /// Relay server URL
    #[arg(short, long, default_value = "ws://127.0.0.1:8765")]
    relay: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new identity keypair
    Init {
        /// Force overwrite existing identity
        #[arg(short, long)]
        force: bool,
    },

    /// Display your public key
    Identity,

    /// Rotate prekeys and publish a fresh bundle to the relay
    Publish,

    /// Start a session with a peer (hex identity key) and chat
    Dial {
        /// Peer's identity public key (hex encoded)
        peer: String,

        /// First message to send with the handshake
        #[arg(short, long, default_value = "hello")]
        message: String,
    },

    /// Accept an incoming session by its id and chat
    Accept {
        /// Session id your peer shared with you
        session: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let identity_path = cli.identity.unwrap_or_else(|| config_dir().join("identity.key"));
    let prekey_path = config_dir().join("prekeys.json");

    let result = match cli.command {
        Commands::Init { force } => cmd_init(&identity_path, force),
        Commands::Identity => cmd_identity(&identity_path),
        Commands::Publish => cmd_publish(&identity_path, &prekey_path, &cli.relay).await,
        Commands::Dial { peer, message } => {
            cmd_dial(&identity_path, &cli.relay, &peer, &message).await
        }
        Commands::Accept { session } => {
            cmd_accept(&identity_path, &prekey_path, &cli.relay, &session).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .expect("Could not find home directory")
        .join(".shroud")
}

fn load_identity(path: &Path) -> Result<Identity, Box<dyn Error>> {
    let bytes = fs::read(path).map_err(|_| {
        format!(
            "No identity found at {:?}. Run 'shroud init' to create one.",
            path
        )
    })?;
    Ok(Identity::from_bytes(&bytes)?)
}

fn save_identity(identity: &Identity, path: &Path) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, identity.to_bytes())?;
    Ok(())
}

/// Prekey secrets persisted between `publish` and a later `accept`
#[derive(Serialize, Deserialize, Default)]
struct StoredPrekeys {
    signed: Option<StoredSignedPrekey>,
    previous: Option<StoredSignedPrekey>,
    one_time: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct StoredSignedPrekey {
    secret: String,
    signature: String,
}

fn store_signed(prekey: &SignedPrekey) -> StoredSignedPrekey {
    StoredSignedPrekey {
        secret: hex::encode(prekey.keypair().secret_bytes()),
        signature: prekey.signature().to_hex(),
    }
}

fn restore_signed(stored: &StoredSignedPrekey) -> Result<SignedPrekey, Box<dyn Error>> {
    let secret: [u8; 32] = hex::decode(&stored.secret)?
        .try_into()
        .map_err(|_| "Invalid prekey secret length")?;
    Ok(SignedPrekey::new(
        ExchangeKeypair::from_secret_bytes(&secret),
        SignatureBytes::from_hex(&stored.signature)?,
    ))
}

fn load_prekeys(path: &Path) -> Result<PrekeyStore, Box<dyn Error>> {
    if !path.exists() {
        return Ok(PrekeyStore::new());
    }
    let stored: StoredPrekeys = serde_json::from_str(&fs::read_to_string(path)?)?;

    let signed = stored.signed.as_ref().map(|s| restore_signed(s)).transpose()?;
    let previous = stored
        .previous
        .as_ref()
        .map(|s| restore_signed(s))
        .transpose()?;

    let mut one_time = Vec::with_capacity(stored.one_time.len());
    for secret_hex in &stored.one_time {
        let secret: [u8; 32] = hex::decode(secret_hex)?
            .try_into()
            .map_err(|_| "Invalid prekey secret length")?;
        one_time.push(ExchangeKeypair::from_secret_bytes(&secret));
    }

    Ok(PrekeyStore::from_parts(signed, previous, one_time))
}

fn save_prekeys(store: &PrekeyStore, path: &Path) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let stored = StoredPrekeys {
        signed: store.signed().map(store_signed),
        previous: store.previous().map(store_signed),
        one_time: store
            .one_time_keypairs()
            .map(|keypair| hex::encode(keypair.secret_bytes()))
            .collect(),
    };
    fs::write(path, serde_json::to_string_pretty(&stored)?)?;
    Ok(())
}

fn cmd_init(path: &Path, force: bool) -> Result<(), Box<dyn Error>> {
    if path.exists() && !force {
        return Err(format!(
            "Identity already exists at {:?}. Use --force to overwrite.",
            path
        )
        .into());
    }

    let identity = Identity::generate();
    save_identity(&identity, path)?;

    println!("Identity created.");
    println!();
    println!("Your public key (share this with peers):");
    println!("{}", identity.public_key().to_hex());
    println!();
    println!("Identity saved to: {:?}", path);
    println!("Back up this file securely; it cannot be recovered.");
    Ok(())
}

fn cmd_identity(path: &Path) -> Result<(), Box<dyn Error>> {
    let identity = load_identity(path)?;
    println!("{}", identity.public_key().to_hex());
    Ok(())
}

async fn cmd_publish(
    identity_path: &Path,
    prekey_path: &Path,
    relay_url: &str,
) -> Result<(), Box<dyn Error>> {
    let identity = load_identity(identity_path)?;
    let mut store = load_prekeys(prekey_path)?;

    let bundle = store.publish(&identity);
    // Persist the new secrets before the publics leave the machine
    save_prekeys(&store, prekey_path)?;

    let mut relay = RelayClient::connect(relay_url).await?;
    relay.publish_bundle(&bundle).await?;
    relay.close().await.ok();

    println!("Bundle published.");
    println!("Signed prekey: {}", bundle.signed_prekey.to_hex());
    println!("One-time prekeys on hand: {}", store.one_time_count());
    Ok(())
}

async fn cmd_dial(
    identity_path: &Path,
    relay_url: &str,
    peer_hex: &str,
    first_message: &str,
) -> Result<(), Box<dyn Error>> {
    let identity = load_identity(identity_path)?;
    let peer = ExchangePublicKey::from_hex(peer_hex)?;

    let mut relay = RelayClient::connect(relay_url).await?;
    let bundle = relay.fetch_bundle(&peer).await?;

    let mut client = Client::new(identity);
    let (session, message) = client.initiate(&peer, &bundle, first_message.as_bytes())?;

    let sid = relay.send_initial(&message).await?;
    client.register_session(sid, session);

    println!("Session id (share with your peer out of band):");
    println!("{}", sid);
    println!();
    println!("Waiting for peer to join the bridge...");

    relay.join(&sid).await?;
    println!("Peer connected. Type messages; /quit to exit.");
    chat_loop(relay, client, sid).await
}

async fn cmd_accept(
    identity_path: &Path,
    prekey_path: &Path,
    relay_url: &str,
    session: &str,
) -> Result<(), Box<dyn Error>> {
    let identity = load_identity(identity_path)?;
    let store = load_prekeys(prekey_path)?;
    let sid = Uuid::parse_str(session)?;

    let mut relay = RelayClient::connect(relay_url).await?;
    let message = relay.fetch_initial(&sid).await?;

    let mut client = Client::with_prekeys(identity, store);
    let plaintext = client.accept(sid, &message)?;

    // The consumed one-time prekey must never be reusable
    save_prekeys(client.prekeys(), prekey_path)?;

    println!("Session accepted.");
    println!("peer: {}", String::from_utf8_lossy(&plaintext));
    println!();
    println!("Joining the bridge...");

    relay.join(&sid).await?;
    println!("Peer connected. Type messages; /quit to exit.");
    chat_loop(relay, client, sid).await
}

/// Interactive bridge chat: stdin lines out, decrypted frames in
async fn chat_loop(relay: RelayClient, mut client: Client, sid: Uuid) -> Result<(), Box<dyn Error>> {
    let (mut sink, mut stream) = relay.split()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) if line == "/quit" => break,
                    Some(line) if line.is_empty() => continue,
                    Some(line) => {
                        let (header, payload) = client.encrypt(&sid, line.as_bytes())?;
                        sink.send_frame(&Frame::new(&header, &payload)).await?;
                    }
                    None => break,
                }
            }

            frame = stream.recv_frame() => {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(_) => {
                        println!("Peer disconnected.");
                        break;
                    }
                };

                match frame
                    .into_parts()
                    .map_err(|e| e.to_string())
                    .and_then(|(header, payload)| {
                        client.decrypt(&sid, &header, &payload).map_err(|e| e.to_string())
                    }) {
                    Ok(plaintext) => println!("peer: {}", String::from_utf8_lossy(&plaintext)),
                    // A bad frame is reported but never kills the session
                    Err(e) => eprintln!("[!] dropped undecryptable frame: {}", e),
                }
            }
        }
    }

    sink.close().await.ok();
    Ok(())
}
