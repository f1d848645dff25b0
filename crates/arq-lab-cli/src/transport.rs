//! [`Channel`] over a real byte stream, plus the one-line segment-size handshake.

use arq_lab_core::{Channel, ChannelError, Recv};
use bytes::BytesMut;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

const READ_CHUNK: usize = 4096;
/// Longest handshake line accepted: 20 digits and the delimiter.
const MAX_HANDSHAKE_LEN: usize = 21;

pub type TcpChannel = StreamChannel<TcpStream>;

/// A peer that hangs up with data still unread triggers a reset, not a clean
/// EOF. Either way the stream is over, so both map to [`ChannelError::Closed`].
fn stream_error(err: io::Error) -> ChannelError {
    match err.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => ChannelError::Closed,
        _ => ChannelError::Io(err),
    }
}

pub struct StreamChannel<S> {
    stream: S,
    /// Bytes already read but not yet handed out by `receive`.
    pending: BytesMut,
}

impl TcpChannel {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ChannelError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> StreamChannel<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            pending: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Server side: announce the maximum segment size.
    pub async fn send_handshake(&mut self, max_segment_size: usize) -> Result<(), ChannelError> {
        self.send(format!("{max_segment_size}\n").as_bytes()).await
    }

    /// Client side: read the announced maximum segment size.
    ///
    /// Anything the server sent after the handshake line stays buffered for
    /// the next [`Channel::receive`].
    pub async fn read_handshake(&mut self, timeout: Duration) -> Result<usize, ChannelError> {
        let line = tokio::time::timeout(timeout, self.read_line())
            .await
            .map_err(|_| ChannelError::Handshake(format!("nothing received within {timeout:?}")))??;
        let text = std::str::from_utf8(&line)
            .map_err(|_| ChannelError::Handshake("handshake is not ASCII".into()))?;
        match text.trim().parse::<usize>() {
            Ok(size) if size > 0 => {
                debug!("Handshake announced max segment size {}", size);
                Ok(size)
            }
            _ => Err(ChannelError::Handshake(format!(
                "expected a positive segment size, got {text:?}"
            ))),
        }
    }

    async fn read_line(&mut self) -> Result<BytesMut, ChannelError> {
        loop {
            if let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
                let mut line = self.pending.split_to(end + 1);
                line.truncate(end);
                return Ok(line);
            }
            if self.pending.len() >= MAX_HANDSHAKE_LEN {
                return Err(ChannelError::Handshake(format!(
                    "no delimiter in the first {} bytes",
                    self.pending.len()
                )));
            }
            self.pending.reserve(READ_CHUNK);
            if self.stream.read_buf(&mut self.pending).await.map_err(stream_error)? == 0 {
                return Err(ChannelError::Closed);
            }
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Channel for StreamChannel<S> {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.stream.write_all(bytes).await.map_err(stream_error)?;
        self.stream.flush().await.map_err(stream_error)?;
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Recv, ChannelError> {
        if !self.pending.is_empty() {
            return Ok(Recv::Data(self.pending.split().freeze()));
        }
        self.pending.reserve(READ_CHUNK);
        match tokio::time::timeout(timeout, self.stream.read_buf(&mut self.pending)).await {
            Err(_) => Ok(Recv::Timeout),
            Ok(Ok(0)) => Err(ChannelError::Closed),
            Ok(Ok(_)) => Ok(Recv::Data(self.pending.split().freeze())),
            Ok(Err(err)) => Err(stream_error(err)),
        }
    }
}
