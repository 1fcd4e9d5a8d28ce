// ! Error types for the vibe socket layer
// !
// ! Module defines all error types that can occur while negotiating,
// ! framing and driving sockets, with helpers for logging and retry decisions.

use serde_json::Value;
use thiserror::Error;

/// The main error type for vibe sockets and transports
#[derive(Error, Debug, Clone)]
pub enum VibeError {
    /// Transport-related errors (connection, I/O, etc.)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Protocol-level errors (unexpected requests, unsupported frames, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Undecodable wire payload
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Invalid URI format or content
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// Connection-related errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// A single transport candidate did not handshake in time
    #[error("Connect timeout: {0}")]
    ConnectTimeout(String),

    /// No transport candidate could establish a handshake
    #[error("Negotiation exhausted: {0}")]
    NegotiationExhausted(String),

    /// The peer did not answer a heartbeat within the ack timeout
    #[error("Heartbeat failure: {0}")]
    HeartbeatFailure(String),

    /// An HTTP exchange carrying a frame failed
    #[error("Transport send failure: {0}")]
    TransportSendFailure(String),

    /// Operation attempted on a closed socket or transport
    #[error("Socket closed: {0}")]
    SocketClosed(String),

    /// An incoming request referenced an unknown socket or transport id
    #[error("Unknown socket: {0}")]
    UnknownSocket(String),

    /// Transport name not understood by this endpoint
    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// The peer rejected a request
    #[error("Rejected: {0}")]
    Rejected(Value),

    /// Invalid configuration option
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O errors from the standard library
    #[error("I/O error: {0}")]
    Io(String),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(String),

    /// HTTP-related errors from the client transports
    #[cfg(feature = "client")]
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket-related errors from the client transport
    #[cfg(feature = "client")]
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Cancellation errors
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Internal errors that shouldn't normally occur
    #[error("Internal error: {0}")]
    Internal(String),
}

// Manual From implementations for types that don't implement Clone
impl From<serde_json::Error> for VibeError {
    fn from(err: serde_json::Error) -> Self {
        VibeError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for VibeError {
    fn from(err: std::io::Error) -> Self {
        VibeError::Io(err.to_string())
    }
}

impl From<url::ParseError> for VibeError {
    fn from(err: url::ParseError) -> Self {
        VibeError::Url(err.to_string())
    }
}

/// Result type alias for vibe operations
pub type VibeResult<T> = Result<T, VibeError>;

impl VibeError {
    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a new malformed frame error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedFrame(message.into())
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection(message.into())
    }

    /// Create a new closed-socket error
    pub fn closed<S: Into<String>>(message: S) -> Self {
        Self::SocketClosed(message.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout(message.into())
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            VibeError::Transport(_) => false,
            VibeError::Protocol(_) => false,
            VibeError::Serialization(_) => false,
            VibeError::MalformedFrame(_) => false,
            VibeError::InvalidUri(_) => false,
            VibeError::Connection(_) => true,
            VibeError::ConnectTimeout(_) => true,
            VibeError::NegotiationExhausted(_) => false,
            VibeError::HeartbeatFailure(_) => false,
            VibeError::TransportSendFailure(_) => true,
            VibeError::SocketClosed(_) => false,
            VibeError::UnknownSocket(_) => false,
            VibeError::UnsupportedTransport(_) => false,
            VibeError::Rejected(_) => false,
            VibeError::Configuration(_) => false,
            VibeError::Io(_) => true,
            VibeError::Url(_) => false,
            #[cfg(feature = "client")]
            VibeError::Http(_) => true,
            #[cfg(feature = "client")]
            VibeError::WebSocket(_) => true,
            VibeError::Timeout(_) => true,
            VibeError::Cancelled(_) => false,
            VibeError::Internal(_) => false,
        }
    }

    /// Get the error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            VibeError::Transport(_) => "transport",
            VibeError::Protocol(_) => "protocol",
            VibeError::Serialization(_) => "serialization",
            VibeError::MalformedFrame(_) => "protocol",
            VibeError::InvalidUri(_) => "validation",
            VibeError::Connection(_) => "connection",
            VibeError::ConnectTimeout(_) => "timeout",
            VibeError::NegotiationExhausted(_) => "negotiation",
            VibeError::HeartbeatFailure(_) => "heartbeat",
            VibeError::TransportSendFailure(_) => "transport",
            VibeError::SocketClosed(_) => "closed",
            VibeError::UnknownSocket(_) => "not_found",
            VibeError::UnsupportedTransport(_) => "validation",
            VibeError::Rejected(_) => "rejected",
            VibeError::Configuration(_) => "validation",
            VibeError::Io(_) => "io",
            VibeError::Url(_) => "validation",
            #[cfg(feature = "client")]
            VibeError::Http(_) => "http",
            #[cfg(feature = "client")]
            VibeError::WebSocket(_) => "websocket",
            VibeError::Timeout(_) => "timeout",
            VibeError::Cancelled(_) => "cancelled",
            VibeError::Internal(_) => "internal",
        }
    }
}

// Convert common HTTP errors when the client transports are enabled
#[cfg(feature = "client")]
impl From<reqwest::Error> for VibeError {
    fn from(err: reqwest::Error) -> Self {
        VibeError::Http(err.to_string())
    }
}

#[cfg(feature = "client")]
impl From<tokio_tungstenite::tungstenite::Error> for VibeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        VibeError::WebSocket(err.to_string())
    }
}
