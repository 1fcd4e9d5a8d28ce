// ! Handshake payload
// !
// ! The first payload on every transport is a URI-encoded query string
// ! carrying the assigned id and the heartbeat parameters.

use std::time::Duration;

use crate::core::config::DEFAULT_ACK_TIMEOUT_MS;
use crate::core::error::{VibeError, VibeResult};
use crate::protocol::names::{PARAM_ACK_TIMEOUT, PARAM_HEARTBEAT, PARAM_ID};
use crate::socket::heartbeat::HeartbeatPolicy;

/// Session parameters announced by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Server-assigned socket/transport id
    pub id: String,
    /// Heartbeat interval, `None` when heartbeats are disabled
    pub heartbeat_ms: Option<u64>,
    /// Time the initiator waits for an echo
    pub ack_timeout_ms: Option<u64>,
}

impl Handshake {
    pub fn new(id: impl Into<String>, heartbeat_ms: Option<u64>, ack_timeout_ms: u64) -> Self {
        Self {
            id: id.into(),
            heartbeat_ms,
            ack_timeout_ms: Some(ack_timeout_ms),
        }
    }

    /// Render as `id=..&heartbeat=<ms|false>&_heartbeat=<ms>`
    pub fn encode(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        serializer.append_pair(PARAM_ID, &self.id);
        match self.heartbeat_ms {
            Some(ms) => serializer.append_pair(PARAM_HEARTBEAT, &ms.to_string()),
            None => serializer.append_pair(PARAM_HEARTBEAT, "false"),
        };
        if let Some(ms) = self.ack_timeout_ms {
            serializer.append_pair(PARAM_ACK_TIMEOUT, &ms.to_string());
        }
        serializer.finish()
    }

    /// Parse a handshake payload; a leading `?` is tolerated
    pub fn decode(payload: &str) -> VibeResult<Self> {
        let query = payload.trim().trim_start_matches('?');

        let mut id = None;
        let mut heartbeat_ms = None;
        let mut ack_timeout_ms = None;
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                PARAM_ID => id = Some(value.into_owned()),
                PARAM_HEARTBEAT => heartbeat_ms = value.parse::<u64>().ok().filter(|ms| *ms > 0),
                PARAM_ACK_TIMEOUT => ack_timeout_ms = value.parse::<u64>().ok(),
                _ => {}
            }
        }

        let id = id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| VibeError::malformed(format!("handshake without id: '{payload}'")))?;

        Ok(Self {
            id,
            heartbeat_ms,
            ack_timeout_ms,
        })
    }

    /// Heartbeat policy for the side that receives this handshake.
    ///
    /// An announced ack timeout that does not fit inside the interval is
    /// clamped, see [`HeartbeatPolicy::initiator`].
    pub fn initiator_policy(&self) -> HeartbeatPolicy {
        match self.heartbeat_ms {
            Some(interval) => HeartbeatPolicy::initiator(
                Duration::from_millis(interval),
                Duration::from_millis(self.ack_timeout_ms.unwrap_or(DEFAULT_ACK_TIMEOUT_MS)),
            ),
            None => HeartbeatPolicy::Disabled,
        }
    }
}
