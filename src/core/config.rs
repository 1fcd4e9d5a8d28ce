// ! Client and server configuration
// !
// ! Module defines the explicit configuration structs for sockets, their
// ! defaults, and a parser for the wire-level option names.

use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::core::error::{VibeError, VibeResult};
use crate::core::retry::RetryConfig;
use crate::protocol::names::{PARAM_ACK_TIMEOUT, PARAM_HEARTBEAT};
use crate::transport::TransportKind;

/// Default per-candidate connect timeout
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_000;
/// Default heartbeat interval announced by servers
pub const DEFAULT_HEARTBEAT_MS: u64 = 20_000;
/// Default time an initiator waits for a heartbeat echo
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 5_000;
/// Default time a long-poll request is held open before answering idle
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 15_000;
/// Default time a long-poll transport survives without a standing request
pub const DEFAULT_DISCONNECT_GRACE_MS: u64 = 3_000;
/// Default whitespace prelude for streaming responses
pub const DEFAULT_PADDING_BYTES: usize = 2_048;
/// Default endpoint path
pub const DEFAULT_PATH: &str = "/vibe";

/// Client-side socket configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Transports to try, in order
    pub transports: Vec<TransportKind>,
    /// Time each candidate gets to complete its handshake
    pub connect_timeout_ms: u64,
    /// Upper bound for a single poll or POST exchange
    pub read_timeout_ms: u64,
    /// Extra headers sent with every HTTP request
    pub headers: HashMap<String, String>,
    /// Retry policy for POSTs and polls
    pub retry: RetryConfig,
    /// Heartbeat interval requested from the server; `Some(0)` asks for none,
    /// `None` leaves the choice to the server
    pub heartbeat_ms: Option<u64>,
    /// Ack timeout requested from the server
    pub ack_timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transports: TransportKind::ALL.to_vec(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: 60_000,
            headers: HashMap::new(),
            retry: RetryConfig::default(),
            heartbeat_ms: None,
            ack_timeout_ms: None,
        }
    }
}

impl ClientConfig {
    /// Build a configuration from wire-level option names.
    ///
    /// Recognises `transport`, `transports` (comma separated), `timeout`,
    /// `heartbeat` (milliseconds or `false`) and `_heartbeat`.
    pub fn from_options<I, K, V>(options: I) -> VibeResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in options {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "transport" | "transports" => config.transports = parse_transports(value)?,
                "timeout" => config.connect_timeout_ms = parse_millis(key, value)?,
                "heartbeat" => {
                    config.heartbeat_ms = Some(parse_heartbeat(key, value)?.unwrap_or(0))
                }
                "_heartbeat" => config.ack_timeout_ms = Some(parse_millis(key, value)?),
                _ => debug!("Ignoring unknown client option '{}'", key),
            }
        }
        Ok(config)
    }

    pub fn with_transports(mut self, transports: impl Into<Vec<TransportKind>>) -> Self {
        self.transports = transports.into();
        self
    }

    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Ask the server for this heartbeat interval; `None` asks for no heartbeat
    pub fn with_heartbeat_ms(mut self, heartbeat_ms: Option<u64>) -> Self {
        self.heartbeat_ms = Some(heartbeat_ms.unwrap_or(0));
        self
    }

    pub fn with_ack_timeout_ms(mut self, ack_timeout_ms: u64) -> Self {
        self.ack_timeout_ms = Some(ack_timeout_ms);
        self
    }

    /// Heartbeat parameters to send with the open request
    pub fn open_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(ms) = self.heartbeat_ms {
            let value = if ms == 0 { "false".to_string() } else { ms.to_string() };
            params.push((PARAM_HEARTBEAT, value));
        }
        if let Some(ms) = self.ack_timeout_ms {
            params.push((PARAM_ACK_TIMEOUT, ms.to_string()));
        }
        params
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Server-side configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Route serving every transport
    pub path: String,
    /// Heartbeat interval announced in the handshake, `None` disables heartbeats
    pub heartbeat_ms: Option<u64>,
    /// Ack timeout announced in the handshake
    pub ack_timeout_ms: u64,
    /// How long a poll is held before answering idle
    pub poll_timeout_ms: u64,
    /// How long a long-poll transport lives without a standing request
    pub disconnect_grace_ms: u64,
    /// Whitespace prelude written before the first streaming chunk
    pub padding_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_PATH.to_string(),
            heartbeat_ms: Some(DEFAULT_HEARTBEAT_MS),
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            disconnect_grace_ms: DEFAULT_DISCONNECT_GRACE_MS,
            padding_bytes: DEFAULT_PADDING_BYTES,
        }
    }
}

impl ServerConfig {
    /// Build a configuration from wire-level option names.
    ///
    /// Recognises `heartbeat` (milliseconds or `false`) and `_heartbeat`.
    pub fn from_options<I, K, V>(options: I) -> VibeResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in options {
            config.apply_option(key.as_ref(), value.as_ref())?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply one wire-level option without validating the result
    pub fn apply_option(&mut self, key: &str, value: &str) -> VibeResult<()> {
        match key {
            "heartbeat" => self.heartbeat_ms = parse_heartbeat(key, value)?,
            "_heartbeat" => self.ack_timeout_ms = parse_millis(key, value)?,
            "path" => self.path = value.to_string(),
            _ => debug!("Ignoring unknown server option '{}'", key),
        }
        Ok(())
    }

    /// Check that the announced ack timeout fits inside the heartbeat interval.
    ///
    /// The `with_*` builders do not validate, so intermediate values may be
    /// inconsistent; [`VibeServer::start`](crate::server::VibeServer) calls this.
    pub fn validate(&self) -> VibeResult<()> {
        validate_heartbeat(self.heartbeat_ms, self.ack_timeout_ms)
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_heartbeat_ms(mut self, heartbeat_ms: Option<u64>) -> Self {
        self.heartbeat_ms = heartbeat_ms;
        self
    }

    pub fn with_ack_timeout_ms(mut self, ack_timeout_ms: u64) -> Self {
        self.ack_timeout_ms = ack_timeout_ms;
        self
    }

    pub fn with_poll_timeout_ms(mut self, poll_timeout_ms: u64) -> Self {
        self.poll_timeout_ms = poll_timeout_ms;
        self
    }

    pub fn with_disconnect_grace_ms(mut self, grace_ms: u64) -> Self {
        self.disconnect_grace_ms = grace_ms;
        self
    }
}

/// An enabled heartbeat needs an ack timeout shorter than its interval
pub fn validate_heartbeat(heartbeat_ms: Option<u64>, ack_timeout_ms: u64) -> VibeResult<()> {
    match heartbeat_ms {
        Some(interval) if ack_timeout_ms >= interval => Err(VibeError::configuration(format!(
            "ack timeout {ack_timeout_ms}ms must be shorter than the heartbeat interval {interval}ms"
        ))),
        _ => Ok(()),
    }
}

fn parse_millis(key: &str, value: &str) -> VibeResult<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        VibeError::configuration(format!("option '{key}' expects milliseconds, got '{value}'"))
    })
}

/// `false` or `0` disable the heartbeat
fn parse_heartbeat(key: &str, value: &str) -> VibeResult<Option<u64>> {
    match value.trim() {
        "false" | "0" => Ok(None),
        other => parse_millis(key, other).map(Some),
    }
}

fn parse_transports(value: &str) -> VibeResult<Vec<TransportKind>> {
    let transports = value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            TransportKind::from_name(name)
                .ok_or_else(|| VibeError::UnsupportedTransport(name.to_string()))
        })
        .collect::<VibeResult<Vec<_>>>()?;

    if transports.is_empty() {
        return Err(VibeError::configuration("transport list is empty"));
    }
    Ok(transports)
}
