// ! Event envelope types
// !
// ! Module defines the wire unit exchanged by sockets and the reply
// ! envelope that correlates a response with its request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::names::{HEARTBEAT_EVENT, REPLY_EVENT};

/// Wire unit exchanged between sockets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Sender-assigned id, unique per direction
    #[serde(default)]
    pub id: String,
    /// Event type used to route to listeners
    #[serde(rename = "type")]
    pub event_type: String,
    /// Arbitrary JSON payload
    #[serde(default)]
    pub data: Value,
    /// Whether the sender expects a correlated reply
    #[serde(default)]
    pub reply: bool,
}

impl Event {
    /// Create an event that does not expect a reply
    pub fn new(id: impl Into<String>, event_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            data,
            reply: false,
        }
    }

    /// Mark the event as expecting a reply
    pub fn expecting_reply(mut self) -> Self {
        self.reply = true;
        self
    }

    /// Wrap a reply envelope into a `reply` event
    pub fn reply_to(id: impl Into<String>, envelope: &ReplyEnvelope) -> Self {
        Self::new(id, REPLY_EVENT, envelope.to_value())
    }

    /// Heartbeat probe or echo
    pub fn heartbeat(id: impl Into<String>) -> Self {
        Self::new(id, HEARTBEAT_EVENT, Value::Null)
    }

    pub fn is_reply(&self) -> bool {
        self.event_type == REPLY_EVENT
    }

    pub fn is_heartbeat(&self) -> bool {
        self.event_type == HEARTBEAT_EVENT
    }
}

/// Payload of a `reply` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    /// Id of the event being answered
    pub id: String,
    #[serde(default)]
    pub data: Value,
    /// `true` selects the rejection path
    #[serde(default)]
    pub exception: bool,
}

impl ReplyEnvelope {
    pub fn resolved(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
            exception: false,
        }
    }

    pub fn rejected(id: impl Into<String>, reason: Value) -> Self {
        Self {
            id: id.into(),
            data: reason,
            exception: true,
        }
    }

    fn to_value(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "data": self.data,
            "exception": self.exception,
        })
    }
}
