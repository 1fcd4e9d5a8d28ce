//! Vibe server implementation
//!
//! One HTTP route accepts every transport. WebSocket upgrades become
//! WebSocket sockets; `when=open` exchanges create streaming or
//! long-polling sockets whose follow-up POSTs and polls are routed by id
//! through the [`SocketRegistry`].

pub mod longpoll;
pub mod registry;
pub mod stream;
pub mod vibe_server;
pub mod websocket;

pub use longpoll::{LongpollServerTransport, PollReply};
pub use registry::{HttpTransportEntry, RegisteredSocket, SocketRegistry};
pub use stream::StreamServerTransport;
pub use vibe_server::VibeServer;
pub use websocket::WebSocketServerTransport;
