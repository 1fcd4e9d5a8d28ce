// Copyright (c) 2025 Vibe Rust Contributors
// SPDX-License-Identifier: MIT

//! # Vibe Rust
//!
//! A full-duplex, event-oriented socket for Rust that rides on whichever
//! physical channel works: WebSocket, HTTP streaming, or HTTP long polling.
//! The client negotiates a transport in order, falling back when one cannot
//! deliver a handshake in time, and the application sees the same
//! [`Socket`](socket::Socket) regardless of which one won.
//!
//! ## Features
//!
//! - **Transport negotiation**: `ws`, then `stream`, then `longpoll`, each with a connect timeout
//! - **Custom events**: named events with JSON payloads and monotonic event ids
//! - **Replies**: request/response over events, settled at most once
//! - **Heartbeat**: liveness detection initiated by the client, echoed by the server
//! - **No message loss on long polling**: retransmission until acknowledged
//!
//! ## Quick Start
//!
//! ```rust
//! use vibe_rs::prelude::*;
//! ```
//!
//! ### Server Example
//!
//! ```rust,no_run
//! use vibe_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> VibeResult<()> {
//!     let mut server = VibeServer::new("127.0.0.1:8080");
//!     server.on_socket(|socket| {
//!         let echo = socket.clone();
//!         socket.on("echo", move |data, reply| {
//!             match reply {
//!                 Some(reply) => {
//!                     let _ = reply.resolve(data);
//!                 }
//!                 None => {
//!                     let _ = echo.send("echo", data);
//!                 }
//!             }
//!         });
//!     });
//!     server.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await
//! }
//! ```
//!
//! ### Client Example
//!
//! ```rust,no_run
//! use vibe_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> VibeResult<()> {
//!     let socket = vibe_rs::client::open("http://127.0.0.1:8080/vibe", ClientConfig::default())?;
//!     socket.opened().await?;
//!
//!     let answer = socket.request("echo", json!({"hello": "world"})).await?;
//!     println!("{answer}");
//!     socket.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`core`]: Errors, logging, metrics, retry and configuration
//! - [`protocol`]: Event envelope, handshake and framing codec
//! - [`longpoll`]: Retransmission queue and receipt tracking for long polling
//! - [`socket`]: The socket abstraction, listeners, replies and heartbeat
//! - [`transport`]: Physical channels and the transport trait
//! - `client`: Transport negotiation and socket opening
//! - `server`: Single-route dispatcher serving every transport
//! - [`utils`]: URI parsing and candidate expansion

#[cfg(feature = "client")]
pub mod client;
pub mod core;
pub mod longpoll;
pub mod protocol;
#[cfg(feature = "server")]
pub mod server;
pub mod socket;
pub mod transport;
pub mod utils;

// Re-export commonly used types for convenience
pub use core::error::{VibeError, VibeResult};
pub use protocol::{Event, Handshake};
pub use socket::{Reply, Socket, SocketState};

/// Prelude module for convenient imports
///
/// Use `use vibe_rs::prelude::*;` to import everything you need.
pub mod prelude {
    // Core types
    pub use crate::core::{
        config::{ClientConfig, ServerConfig},
        error::{VibeError, VibeResult},
        retry::RetryConfig,
    };

    // Sockets and events
    pub use crate::protocol::{Event, Handshake};
    pub use crate::socket::{HeartbeatPolicy, Reply, Socket, SocketState};
    pub use crate::transport::{Frame, Transport, TransportKind};

    #[cfg(feature = "client")]
    pub use crate::client::{SocketBuilder, open};

    #[cfg(feature = "server")]
    pub use crate::server::VibeServer;

    // Essential external types
    pub use async_trait::async_trait;
    pub use serde_json::{Value, json};
    pub use std::collections::HashMap;
}
