//! Core building blocks shared by every layer
//!
//! This module contains error handling, structured logging, metrics,
//! retry policies and the client/server configuration structs.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod retry;

// Re-export commonly used items
pub use config::{ClientConfig, ServerConfig};
pub use error::{VibeError, VibeResult};
pub use logging::{ErrorContext, ErrorLogger};
pub use metrics::{MetricsCollector, global_metrics};
pub use retry::{RetryConfig, RetryPolicy};
