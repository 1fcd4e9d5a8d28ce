// ! Wire name constants
// !
// ! Module contains the reserved event types and the query parameter
// ! names and values understood on every endpoint.

// Reserved event types
pub const REPLY_EVENT: &str = "reply";
pub const HEARTBEAT_EVENT: &str = "heartbeat";

// Lifecycle events surfaced to applications, never sent on the wire
pub const OPEN_EVENT: &str = "open";
pub const CLOSE_EVENT: &str = "close";
pub const ERROR_EVENT: &str = "error";

// Query parameters
pub const PARAM_ID: &str = "id";
pub const PARAM_WHEN: &str = "when";
pub const PARAM_TRANSPORT: &str = "transport";
pub const PARAM_LAST_MSG_ID: &str = "lastMsgId";
pub const PARAM_LAST_EVENT_IDS: &str = "lastEventIds";
pub const PARAM_SSE: &str = "sse";
pub const PARAM_JSONP: &str = "jsonp";
pub const PARAM_CALLBACK: &str = "callback";

// Handshake fields
pub const PARAM_HEARTBEAT: &str = "heartbeat";
pub const PARAM_ACK_TIMEOUT: &str = "_heartbeat";

// Values of `when`
pub const WHEN_OPEN: &str = "open";
pub const WHEN_POLL: &str = "poll";
pub const WHEN_ABORT: &str = "abort";

// POST bodies
pub const POST_DATA_PREFIX: &str = "data=";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream; charset=utf-8";
pub const JAVASCRIPT_CONTENT_TYPE: &str = "text/javascript; charset=utf-8";

/// Whether an application may register listeners for `event_type`.
///
/// Reply and heartbeat events are consumed by the socket itself.
pub fn is_reserved(event_type: &str) -> bool {
    matches!(event_type, REPLY_EVENT | HEARTBEAT_EVENT)
}
