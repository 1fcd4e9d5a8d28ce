// ! Transport layer traits and abstractions
// !
// ! Module defines the contract every physical channel implements and the
// ! event stream through which a transport reports open, message, error
// ! and close to the socket that owns it.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use crate::core::error::{VibeError, VibeResult};
use crate::core::metrics::global_metrics;

/// One opaque payload carried by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    /// Text content of the frame; binary frames must hold UTF-8
    pub fn into_text(self) -> VibeResult<String> {
        match self {
            Frame::Text(text) => Ok(text),
            Frame::Binary(bytes) => String::from_utf8(bytes.to_vec())
                .map_err(|e| VibeError::malformed(format!("binary frame is not UTF-8: {e}"))),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Frame::Text(text.to_string())
    }
}

impl From<Bytes> for Frame {
    fn from(bytes: Bytes) -> Self {
        Frame::Binary(bytes)
    }
}

/// Event reported by a transport to its owner
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Channel established; carries the handshake payload when the transport reads one
    Open(String),
    /// Inbound frame
    Message(Frame),
    /// Non-fatal or fatal error; a fatal one is followed by `Close`
    Error(VibeError),
    /// Channel gone; emitted exactly once and always last
    Close,
}

/// Physical channel mechanisms, in default negotiation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    WebSocket,
    Stream,
    LongPoll,
}

impl TransportKind {
    pub const ALL: [TransportKind; 3] = [
        TransportKind::WebSocket,
        TransportKind::Stream,
        TransportKind::LongPoll,
    ];

    /// Canonical value of the `transport` query parameter
    pub fn name(&self) -> &'static str {
        match self {
            TransportKind::WebSocket => "ws",
            TransportKind::Stream => "stream",
            TransportKind::LongPoll => "longpoll",
        }
    }

    /// Resolve a transport name, including the browser variant aliases
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ws" | "websocket" => Some(TransportKind::WebSocket),
            "stream" | "sse" | "streamxhr" | "streamxdr" | "streamiframe" => {
                Some(TransportKind::Stream)
            }
            "longpoll" | "longpollajax" | "longpollxdr" | "longpolljsonp" => {
                Some(TransportKind::LongPoll)
            }
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Transport trait shared by client and server channels
///
/// A transport is open from its first successful exchange until it emits
/// [`TransportEvent::Close`]; it is never reopened.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transmit one payload
    ///
    /// # Arguments
    /// * `frame` - The payload to transmit
    ///
    /// # Returns
    /// Result indicating the frame was handed to the wire, or an error
    async fn send(&self, frame: Frame) -> VibeResult<()>;

    /// Tear the channel down; `Close` is guaranteed to be emitted eventually
    async fn close(&self) -> VibeResult<()>;

    /// Check if the transport is open
    fn is_open(&self) -> bool;

    /// Short transport name for logs and metrics
    fn name(&self) -> &'static str;

    /// Get connection information for debugging
    fn connection_info(&self) -> String {
        format!("{} transport", self.name())
    }
}

/// Receiving half of a transport's event stream
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Sending half of a transport's event stream.
///
/// Latches open and close so that every transport reports `Close` exactly
/// once no matter how many of its exchanges notice the disconnect.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
    opened: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    transport: &'static str,
}

impl EventSink {
    pub fn channel(transport: &'static str) -> (Self, TransportEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                opened: Arc::new(AtomicBool::new(false)),
                closed: Arc::new(AtomicBool::new(false)),
                transport,
            },
            rx,
        )
    }

    /// Mark the channel open, optionally reporting the handshake payload
    pub fn emit_open(&self, handshake: Option<String>) -> bool {
        if self.is_closed() || self.opened.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(handshake) = handshake {
            let _ = self.tx.send(TransportEvent::Open(handshake));
        }
        true
    }

    /// Mark the channel open without reporting an event
    pub fn mark_open(&self) {
        self.opened.store(true, Ordering::SeqCst);
    }

    pub fn emit_message(&self, frame: Frame) -> bool {
        if self.is_closed() {
            return false;
        }
        global_metrics().record_message(self.transport, "inbound");
        self.tx.send(TransportEvent::Message(frame)).is_ok()
    }

    pub fn emit_error(&self, error: VibeError) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send(TransportEvent::Error(error)).is_ok()
    }

    /// Report close; returns `true` only for the first call
    pub fn emit_close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.tx.send(TransportEvent::Close);
        true
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst) && !self.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
