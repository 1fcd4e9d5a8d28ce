//! Utility functions
//!
//! URI parsing, transport candidate expansion and query string helpers
//! shared by the client transports and the server dispatcher.

pub mod uri;

// Re-export commonly used utilities
pub use uri::*;
