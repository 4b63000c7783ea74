//! Heliograph - Real-time presence server
//!
//! Runs behind an edge gateway, communicating via Unix socket using the
//! relay protocol.

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use heliograph::auth::HmacTokenVerifier;
use heliograph::config::{Config, ConfigError};
use heliograph::directory::Directory;
use heliograph::dispatcher::Dispatcher;
use heliograph::protocol::{self, Frame, MessageType};
use heliograph::registry::Registry;

#[cfg(feature = "postgres")]
use heliograph::directory::PostgresDirectory;

#[cfg(feature = "memory")]
use heliograph::directory::MemoryDirectory;

#[derive(Parser, Debug)]
#[command(name = "heliograph")]
#[command(about = "Real-time presence server with gateway relay protocol")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[cfg(feature = "postgres")]
async fn init_directory(config: &Config) -> anyhow::Result<Arc<dyn Directory>> {
    let Some(ref db_url) = config.database_url else {
        anyhow::bail!("no database_url in gateway config");
    };
    let directory = PostgresDirectory::new(db_url).await?;
    info!("PostgreSQL directory connected");
    Ok(Arc::new(directory))
}

#[cfg(feature = "memory")]
async fn init_directory(config: &Config) -> anyhow::Result<Arc<dyn Directory>> {
    let _ = config;
    info!("Memory directory initialized (nothing survives a restart)");
    Ok(Arc::new(MemoryDirectory::new()))
}

/// Perform the attach handshake with the gateway
async fn attach<S: AsyncReadExt + AsyncWriteExt + Unpin>(
    stream: &mut S,
    node: &str,
) -> anyhow::Result<protocol::Attached> {
    let request = protocol::Attach {
        version: protocol::VERSION,
        node: node.to_string(),
    };
    stream.write_all(&protocol::encode_attach(&request)).await?;
    info!(version = protocol::VERSION, node = %node, "Sent ATTACH");

    let mut buf = vec![0u8; 4096];
    let mut pending = Vec::new();

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            anyhow::bail!("Connection closed during attach");
        }
        pending.extend_from_slice(&buf[..n]);

        if pending.len() >= protocol::HEADER_LEN {
            let (msg_type, payload_len) = protocol::decode_header(&pending)?;
            let total_len = protocol::HEADER_LEN + payload_len;

            if pending.len() >= total_len {
                if msg_type != MessageType::Attached {
                    anyhow::bail!("Expected ATTACHED, got {:?}", msg_type);
                }

                let attached =
                    protocol::decode_attached(&pending[protocol::HEADER_LEN..total_len])?;
                if attached.version != protocol::VERSION {
                    anyhow::bail!(
                        "Gateway speaks relay protocol v{}, expected v{}",
                        attached.version,
                        protocol::VERSION
                    );
                }

                info!(
                    version = attached.version,
                    config_keys = ?attached.config.keys().collect::<Vec<_>>(),
                    "Attach complete - ATTACHED"
                );
                return Ok(attached);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize JSON logging (consistent with the gateway)
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(&args.log_level)
        .init();

    info!("Heliograph v{}", env!("CARGO_PKG_VERSION"));

    // Load config from environment
    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {}", e);
            error!("Heliograph must be run behind a relay gateway");
            error!("Required env vars: HG_NODE (HG_SOCKET_DIR optional)");
            std::process::exit(1);
        }
    };

    info!(
        node = %config.node_name,
        socket = %config.socket_path().display(),
        "Starting Heliograph"
    );

    // Create socket directory if needed
    if let Some(parent) = config.socket_path().parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // Remove stale socket if exists
    let socket_path = config.socket_path();
    if socket_path.exists() {
        tokio::fs::remove_file(&socket_path).await?;
    }

    // Create Unix socket listener
    let listener = UnixListener::bind(&socket_path)?;
    info!(socket = %socket_path.display(), "Listening for gateway connection");

    // Accept connection from the gateway
    let (mut stream, _) = listener.accept().await?;
    info!("Gateway connected");

    // Perform attach handshake
    let attached = attach(&mut stream, &config.node_name).await?;

    // Apply config from the gateway
    config.apply_attach_config(&attached.config);

    let Some(ref token_secret) = config.token_secret else {
        return Err(ConfigError::MissingKey("token_secret").into());
    };
    let verifier = Arc::new(HmacTokenVerifier::new(token_secret));

    // Initialize directory backend
    let directory = init_directory(&config).await?;

    // Now split stream for bidirectional communication
    let (mut reader, mut writer) = stream.into_split();

    // Channel for outgoing frames
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Frame>(1024);

    // Create registry and dispatcher
    let registry = Arc::new(Registry::new(outgoing_tx));
    let dispatcher = Dispatcher::new(registry.clone(), verifier, directory);

    // Spawn outgoing frame sender
    let writer_handle = tokio::spawn(async move {
        while let Some(frame) = outgoing_rx.recv().await {
            let encoded = protocol::encode_frame(&frame);

            if let Err(e) = writer.write_all(&encoded).await {
                error!(error = %e, "Failed to write to gateway");
                break;
            }
        }
    });

    // Read messages from the gateway
    let mut buf = vec![0u8; 64 * 1024]; // 64KB buffer
    let mut pending = Vec::new();

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                info!("Gateway disconnected");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "Read error");
                break;
            }
        };

        pending.extend_from_slice(&buf[..n]);

        // Process complete messages
        while pending.len() >= protocol::HEADER_LEN {
            let (msg_type, payload_len) = match protocol::decode_header(&pending) {
                Ok(header) => header,
                Err(e) => {
                    error!(error = %e, "Failed to decode header; dropping pending buffer");
                    pending.clear();
                    break;
                }
            };

            let total_len = protocol::HEADER_LEN + payload_len;
            if pending.len() < total_len {
                break; // Need more data
            }

            let payload = &pending[protocol::HEADER_LEN..total_len];

            match msg_type {
                MessageType::Open => {
                    let open = protocol::decode_open(payload)?;
                    debug!(
                        conn_id = open.conn_id,
                        remote = %open.remote_addr,
                        "New connection"
                    );
                    dispatcher.handle_open(open);
                }

                MessageType::Frame => {
                    let frame = protocol::decode_frame(payload)?;
                    debug!(conn_id = frame.conn_id, len = frame.data.len(), "Received frame");
                    dispatcher.handle_frame(frame.conn_id, &frame.data).await;
                }

                MessageType::Closed => {
                    let closed = protocol::decode_closed(payload)?;
                    debug!(conn_id = closed.conn_id, "Connection closed by gateway");
                    dispatcher.handle_close(closed.conn_id).await;
                }

                _ => {
                    warn!(msg_type = ?msg_type, "Unhandled message type");
                }
            }

            pending.drain(..total_len);
        }
    }

    writer_handle.abort();

    // Cleanup socket
    if socket_path.exists() {
        let _ = tokio::fs::remove_file(&socket_path).await;
    }

    info!("Heliograph shutdown");
    Ok(())
}
