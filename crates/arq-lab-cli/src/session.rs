//! One transfer per TCP connection: the server receives, the client sends.

use anyhow::{Context, Result};
use arq_lab_core::{ArqConfig, ArqError, Receiver, ReceiverStats, Segmenter, Sender, SenderStats};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};

use crate::transport::TcpChannel;

/// How long the client waits for the server's handshake line.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// How long the client keeps reading late ACKs after its last segment is acknowledged.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ServeOutcome {
    pub peer: SocketAddr,
    /// The whole message, or the first missing sequence number.
    pub message: Result<Vec<u8>, u64>,
    pub stats: ReceiverStats,
}

/// Accepts exactly one connection on `listener` and receives one message from it.
pub async fn serve_one(listener: TcpListener, config: &ArqConfig) -> Result<ServeOutcome> {
    let (stream, peer) = listener
        .accept()
        .await
        .context("Failed to accept a connection")?;
    info!("Connected by {}", peer);
    stream.set_nodelay(true)?;

    let mut channel = TcpChannel::new(stream);
    channel
        .send_handshake(config.max_segment_size)
        .await
        .context("Failed to send the handshake")?;
    info!("Announced max segment size {}", config.max_segment_size);

    let mut receiver = Receiver::new(channel, config)?;
    let stats = receiver.serve().await.context("Receiving failed")?;

    let message = match receiver.assemble() {
        Ok(message) => {
            info!(
                "Full message received ({} bytes): {}",
                message.len(),
                String::from_utf8_lossy(&message)
            );
            Ok(message)
        }
        Err(ArqError::Incomplete { next_missing }) => {
            warn!("Connection closed before segment {} arrived", next_missing);
            Err(next_missing)
        }
        Err(err) => return Err(err.into()),
    };
    Ok(ServeOutcome {
        peer,
        message,
        stats,
    })
}

/// Binds `addr` and serves the first client that connects.
pub async fn listen_once(addr: impl ToSocketAddrs, config: &ArqConfig) -> Result<ServeOutcome> {
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind the listen address")?;
    info!("Listening on {}", listener.local_addr()?);
    serve_one(listener, config).await
}

#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Window, timeout and retry limit. `max_segment_size` here is ignored in
    /// favour of the handshake.
    pub config: ArqConfig,
    /// Local cap on the segment size; the smaller of this and the server's wins.
    pub max_segment_size: Option<usize>,
    pub quote: bool,
}

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub max_segment_size: usize,
    pub stats: SenderStats,
}

/// Connects to `addr`, reads the handshake and transfers `message`.
pub async fn send_message(
    addr: impl ToSocketAddrs,
    message: &[u8],
    options: &ClientOptions,
) -> Result<SendOutcome> {
    let mut channel = TcpChannel::connect(addr)
        .await
        .context("Failed to connect to the server")?;
    let announced = channel
        .read_handshake(HANDSHAKE_TIMEOUT)
        .await
        .context("Handshake failed")?;
    let max_segment_size = options
        .max_segment_size
        .map_or(announced, |local| local.min(announced));
    info!(
        "Server announced max segment size {}; using {}",
        announced, max_segment_size
    );

    let config = ArqConfig {
        max_segment_size,
        ..options.config.clone()
    };
    let segments = Segmenter::new(max_segment_size)?
        .wrap_in_quotes(options.quote)
        .segment(message)?;

    let mut sender = Sender::new(channel, segments, &config)?;
    let stats = sender.run().await.context("Transfer failed")?;
    info!(
        "Sent {} segments in {} frames ({} retransmissions, {} timeouts)",
        stats.segments, stats.frames_sent, stats.retransmissions, stats.timeouts
    );

    close_gracefully(sender.into_channel().into_inner()).await;
    Ok(SendOutcome {
        max_segment_size,
        stats,
    })
}

/// Half-closes the stream, then reads until the server closes its side.
///
/// Closing with duplicate ACKs still unread makes the kernel send a reset,
/// which can overtake segments the server has not read yet.
async fn close_gracefully(mut stream: TcpStream) {
    if let Err(err) = stream.shutdown().await {
        warn!("Failed to close the connection cleanly: {}", err);
        return;
    }
    let mut sink = [0u8; 1024];
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        loop {
            match stream.read(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(n) => debug!("Discarding {} bytes of late ACKs", n),
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!("Server kept the connection open for {:?} after the transfer", DRAIN_TIMEOUT);
    }
}
