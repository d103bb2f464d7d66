//! WebSocket connection handle and writer task.
//!
//! # Responsibilities
//! - Give handlers, groups and peers a cheap cloneable handle to a connection
//! - Serialize outbound frames through a single writer task
//! - Close exactly once, whoever asks first
//!
//! # Design Decisions
//! - Sends never block the caller: frames are queued on an unbounded channel
//! - A send on a closed connection is an error, not a silent drop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};

use crate::net::connection::ConnectionId;
use crate::observability::metrics;
use crate::websocket::frame::{encode_close, encode_message, Fragmentation, FrameError, Opcode};

/// Error returned when a message cannot be queued.
#[derive(Debug, Error, PartialEq)]
pub enum SendError {
    #[error("Connection is closed")]
    Closed,
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Outbound traffic for the writer task.
#[derive(Debug, PartialEq)]
pub enum Outbound {
    /// Encoded frames, shared between every recipient of a broadcast.
    Frame(Arc<[u8]>),
    /// Write a close frame and stop.
    Close,
}

/// Encoder settings shared by every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSettings {
    pub chunk_size: usize,
    pub fragmentation: Fragmentation,
}

#[derive(Debug)]
struct Inner {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
    closed_notify: Notify,
    encoder: EncoderSettings,
}

/// Handle to an upgraded connection.
#[derive(Debug, Clone)]
pub struct WebSocketConnection {
    inner: Arc<Inner>,
}

impl WebSocketConnection {
    /// Create a handle and the receiving end its writer task drains.
    pub fn new(
        id: ConnectionId,
        encoder: EncoderSettings,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Self {
            inner: Arc::new(Inner {
                id,
                outbound: tx,
                closed: AtomicBool::new(false),
                closed_notify: Notify::new(),
                encoder,
            }),
        };
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn encoder(&self) -> EncoderSettings {
        self.inner.encoder
    }

    /// Send a binary message.
    pub fn send(&self, data: &[u8]) -> Result<(), SendError> {
        self.send_message(Opcode::Binary, data)
    }

    pub fn send_text(&self, text: &str) -> Result<(), SendError> {
        self.send_message(Opcode::Text, text.as_bytes())
    }

    pub fn send_message(&self, opcode: Opcode, payload: &[u8]) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        let frames = encode(opcode, payload, self.inner.encoder)?;
        self.send_frames(frames)
    }

    /// Queue frames already encoded with this connection's [`encoder`](Self::encoder).
    pub fn send_frames(&self, frames: Arc<[u8]>) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        if self.inner.outbound.send(Outbound::Frame(frames)).is_err() {
            self.close();
            return Err(SendError::Closed);
        }
        metrics::record_ws_message("out");
        Ok(())
    }

    /// Close the connection. Returns true only for the call that closed it.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.inner.outbound.send(Outbound::Close);
        self.inner.closed_notify.notify_one();
        tracing::debug!(connection_id = %self.inner.id, "WebSocket closing");
        true
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        loop {
            let notified = self.inner.closed_notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Same underlying connection.
    pub fn ptr_eq(&self, other: &WebSocketConnection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Encode `payload` as one message under `settings`.
pub fn encode(
    opcode: Opcode,
    payload: &[u8],
    settings: EncoderSettings,
) -> Result<Arc<[u8]>, FrameError> {
    encode_message(opcode, payload, settings.chunk_size, settings.fragmentation).map(Arc::from)
}

/// Drain `rx` onto `writer` until a close is requested or the peer goes away.
///
/// A failed write closes `connection`, waking anything awaiting [`WebSocketConnection::closed`].
pub async fn run_writer<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    connection: WebSocketConnection,
) where
    W: AsyncWrite + Unpin,
{
    let id = connection.id();
    while let Some(outbound) = rx.recv().await {
        let result = match outbound {
            Outbound::Frame(bytes) => writer.write_all(&bytes).await,
            Outbound::Close => {
                if let Err(e) = writer.write_all(&encode_close()).await {
                    tracing::debug!(connection_id = %id, error = %e, "Close frame not delivered");
                }
                let _ = writer.shutdown().await;
                break;
            }
        };
        if let Err(e) = result {
            tracing::debug!(connection_id = %id, error = %e, "WebSocket write failed");
            connection.close();
            break;
        }
    }
    tracing::trace!(connection_id = %id, "Writer stopped");
}
