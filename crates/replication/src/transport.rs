//! Tokio transport for the cluster port
//!
//! Async framing helpers plus a minimal request/reply listener. Client
//! traffic stays on the query port; everything here is cluster traffic
//! only. TLS (and mutual TLS) wrap the stream below this layer when
//! configured; the codec itself is transport-agnostic.

use crate::wire::{encode_frame, Message, MAX_FRAME_LEN};
use nornic_core::{NornicError, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

/// Write one framed message.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message. `Ok(None)` on a clean EOF at a frame
/// boundary.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Message>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(NornicError::corruption(format!(
            "frame length {} exceeds limit",
            len
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    let message: Message = serde_json::from_slice(&body)
        .map_err(|e| NornicError::corruption(format!("frame decode failed: {}", e)))?;
    Ok(Some(message))
}

/// Dial a peer and exchange one request/reply pair.
pub async fn request(addr: &str, message: &Message) -> Result<Option<Message>> {
    let mut stream = TcpStream::connect(addr).await?;
    write_message(&mut stream, message).await?;
    read_message(&mut stream).await
}

/// Fire a message without waiting for a reply (heartbeats, fences).
pub async fn send_oneway(addr: &str, message: &Message) -> Result<()> {
    let mut stream = TcpStream::connect(addr).await?;
    write_message(&mut stream, message).await
}

/// Cluster-port listener dispatching each inbound message to a handler;
/// a `Some` return is written back as the reply.
pub struct ClusterListener {
    listener: TcpListener,
}

impl ClusterListener {
    /// Bind the cluster port.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(ClusterListener { listener })
    }

    /// The bound address (useful with port 0 in tests).
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop. Runs until the task is aborted.
    pub async fn serve<H>(self, handler: Arc<H>)
    where
        H: Fn(Message) -> Option<Message> + Send + Sync + 'static,
    {
        loop {
            let (mut stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "cluster accept failed");
                    continue;
                }
            };
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                loop {
                    match read_message(&mut stream).await {
                        Ok(Some(message)) => {
                            debug!(peer = %peer, tag = message.tag(), "cluster message");
                            if let Some(reply) = handler(message) {
                                if write_message(&mut stream, &reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(peer = %peer, error = %e, "cluster connection error");
                            break;
                        }
                    }
                }
            });
        }
    }
}
