//! Framed message transport over an established socket.
//!
//! Each message is carried as a sequence of chunks, every chunk prefixed by
//! a 16-bit big-endian length and the whole message terminated by a
//! zero-length chunk. Zero-length chunks between messages are keep-alive
//! noise and are skipped.
//!
//! Socket setup, TLS and version negotiation happen elsewhere; a connection
//! is built from an already-negotiated stream plus the agreed version.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::{DriverError, DriverResult};
use crate::protocol::encoder::MessageWriter;
use crate::protocol::message::Message;
use crate::protocol::response::ServerResponse;
use crate::protocol::version::ProtocolVersion;

/// Largest payload a single chunk can carry.
pub const MAX_CHUNK_SIZE: usize = 0xFFFF;

/// Maximum reassembled message size (16 MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// The request/response exchange a result stream drives.
///
/// Exchange is strictly sequential per connection: one request on the wire,
/// then its responses, never pipelined.
#[async_trait]
pub trait StreamTransport: Send {
    async fn send(&mut self, message: &Message) -> DriverResult<()>;
    async fn recv(&mut self) -> DriverResult<ServerResponse>;
}

/// A message-framed connection over a byte stream.
pub struct BoltConnection<S = TcpStream> {
    stream: S,
    writer: MessageWriter,
    encode_buf: Vec<u8>,
}

impl<S> BoltConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, version: ProtocolVersion) -> Self {
        Self {
            stream,
            writer: MessageWriter::new(version),
            encode_buf: Vec::new(),
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.writer.version()
    }

    async fn write_chunked(&mut self, payload: &[u8]) -> DriverResult<()> {
        for chunk in payload.chunks(MAX_CHUNK_SIZE) {
            self.stream
                .write_all(&(chunk.len() as u16).to_be_bytes())
                .await
                .map_err(|e| DriverError::Connection(format!("write chunk header failed: {}", e)))?;
            self.stream
                .write_all(chunk)
                .await
                .map_err(|e| DriverError::Connection(format!("write chunk failed: {}", e)))?;
        }
        // End-of-message marker.
        self.stream
            .write_all(&[0u8, 0u8])
            .await
            .map_err(|e| DriverError::Connection(format!("write end marker failed: {}", e)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| DriverError::Connection(format!("flush failed: {}", e)))?;
        Ok(())
    }

    async fn read_message(&mut self) -> DriverResult<Vec<u8>> {
        let mut payload = Vec::new();
        loop {
            let mut header = [0u8; 2];
            self.stream
                .read_exact(&mut header)
                .await
                .map_err(|e| DriverError::Connection(format!("read chunk header failed: {}", e)))?;

            let chunk_len = u16::from_be_bytes(header) as usize;
            if chunk_len == 0 {
                if payload.is_empty() {
                    // Keep-alive between messages.
                    continue;
                }
                return Ok(payload);
            }

            if payload.len() + chunk_len > MAX_MESSAGE_SIZE {
                warn!(size = payload.len() + chunk_len, "oversized inbound message");
                return Err(DriverError::MessageTooLarge);
            }

            let start = payload.len();
            payload.resize(start + chunk_len, 0);
            self.stream
                .read_exact(&mut payload[start..])
                .await
                .map_err(|e| DriverError::Connection(format!("read chunk failed: {}", e)))?;
        }
    }
}

#[async_trait]
impl<S> StreamTransport for BoltConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: &Message) -> DriverResult<()> {
        self.encode_buf.clear();
        self.writer.encode(message, &mut self.encode_buf)?;
        if self.encode_buf.len() > MAX_MESSAGE_SIZE {
            return Err(DriverError::MessageTooLarge);
        }

        let payload = std::mem::take(&mut self.encode_buf);
        let result = self.write_chunked(&payload).await;
        self.encode_buf = payload;
        result?;

        debug!(message = message.name(), "sent");
        Ok(())
    }

    async fn recv(&mut self) -> DriverResult<ServerResponse> {
        let payload = self.read_message().await?;
        ServerResponse::decode(&payload)
    }
}
