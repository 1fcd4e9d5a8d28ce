//! Transport layer implementations
//!
//! This module provides the physical channels a socket can ride on: the
//! in-process pair, and (with the `client` feature) the WebSocket, HTTP
//! streaming and HTTP long-polling client transports. The server-side
//! channels live with the server dispatcher.

pub mod memory;
pub mod traits;

#[cfg(feature = "client")]
pub(crate) mod http;

#[cfg(feature = "client")]
pub mod http_stream;

#[cfg(feature = "client")]
pub mod longpoll;

#[cfg(feature = "client")]
pub mod websocket;

// Re-export commonly used types
pub use memory::MemoryTransport;
pub use traits::{EventSink, Frame, Transport, TransportEvent, TransportEvents, TransportKind};

// Re-export transport implementations when features are enabled
#[cfg(feature = "client")]
pub use http_stream::HttpStreamClientTransport;

#[cfg(feature = "client")]
pub use longpoll::LongpollClientTransport;

#[cfg(feature = "client")]
pub use websocket::WebSocketClientTransport;
