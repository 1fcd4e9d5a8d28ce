// ! Request/reply correlation
// !
// ! The sending side keeps a table of pending replies keyed by event id;
// ! the receiving side hands handlers a [`Reply`] controller whose latch
// ! guarantees at most one reply envelope per event.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;

use crate::core::error::{VibeError, VibeResult};
use crate::protocol::event::ReplyEnvelope;
use crate::socket::SocketInner;

/// Callback invoked with the reply value or rejection reason
pub type ReplyCallback = Box<dyn FnOnce(Value) + Send + 'static>;

/// How a pending request is completed
pub(crate) enum PendingReply {
    Callbacks {
        on_resolve: Option<ReplyCallback>,
        on_reject: Option<ReplyCallback>,
    },
    Channel(oneshot::Sender<Result<Value, Value>>),
}

impl PendingReply {
    pub(crate) fn settle(self, envelope: ReplyEnvelope) {
        match self {
            PendingReply::Callbacks {
                on_resolve,
                on_reject,
            } => {
                let callback = if envelope.exception {
                    on_reject
                } else {
                    on_resolve
                };
                if let Some(callback) = callback {
                    callback(envelope.data);
                }
            }
            PendingReply::Channel(tx) => {
                let outcome = if envelope.exception {
                    Err(envelope.data)
                } else {
                    Ok(envelope.data)
                };
                let _ = tx.send(outcome);
            }
        }
    }
}

/// Pending-reply table owned by a socket
#[derive(Default)]
pub(crate) struct PendingReplies {
    entries: HashMap<String, PendingReply>,
}

impl PendingReplies {
    pub(crate) fn insert(&mut self, event_id: String, pending: PendingReply) {
        self.entries.insert(event_id, pending);
    }

    /// Remove the entry for `event_id`; each entry is taken at most once
    pub(crate) fn take(&mut self, event_id: &str) -> Option<PendingReply> {
        self.entries.remove(event_id)
    }

    /// Drop every entry without invoking it, returning how many were abandoned
    pub(crate) fn clear(&mut self) -> usize {
        let abandoned = self.entries.len();
        self.entries.clear();
        abandoned
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Reply controller handed to listeners of events sent with `reply = true`
#[derive(Clone)]
pub struct Reply {
    event_id: String,
    sent: Arc<AtomicBool>,
    socket: Weak<SocketInner>,
}

impl Reply {
    pub(crate) fn new(event_id: String, socket: Weak<SocketInner>) -> Self {
        Self {
            event_id,
            sent: Arc::new(AtomicBool::new(false)),
            socket,
        }
    }

    /// Id of the event being answered
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Answer on the resolution path.
    ///
    /// Returns `Ok(false)` when a reply was already sent through this controller.
    pub fn resolve(&self, value: Value) -> VibeResult<bool> {
        self.settle(ReplyEnvelope::resolved(self.event_id.clone(), value))
    }

    /// Answer on the rejection path.
    ///
    /// Returns `Ok(false)` when a reply was already sent through this controller.
    pub fn reject(&self, reason: Value) -> VibeResult<bool> {
        self.settle(ReplyEnvelope::rejected(self.event_id.clone(), reason))
    }

    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::SeqCst)
    }

    fn settle(&self, envelope: ReplyEnvelope) -> VibeResult<bool> {
        if self.sent.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        let socket = self
            .socket
            .upgrade()
            .ok_or_else(|| VibeError::closed("socket dropped before reply was sent"))?;
        socket.send_reply(&envelope)?;
        Ok(true)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("event_id", &self.event_id)
            .field("sent", &self.is_sent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_callbacks_follow_exception_flag() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let make = |tag: &'static str| -> Option<ReplyCallback> {
            let seen = seen.clone();
            Some(Box::new(move |value| {
                seen.lock().unwrap().push((tag, value));
            }))
        };

        let mut table = PendingReplies::default();
        table.insert(
            "1".into(),
            PendingReply::Callbacks {
                on_resolve: make("resolve"),
                on_reject: make("reject"),
            },
        );
        table.insert(
            "2".into(),
            PendingReply::Callbacks {
                on_resolve: make("resolve"),
                on_reject: make("reject"),
            },
        );

        table
            .take("1")
            .unwrap()
            .settle(ReplyEnvelope::resolved("1", json!(10)));
        table
            .take("2")
            .unwrap()
            .settle(ReplyEnvelope::rejected("2", json!("no")));
        assert!(table.take("1").is_none());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("resolve", json!(10)), ("reject", json!("no"))]
        );
    }

    #[tokio::test]
    async fn test_channel_reply() {
        let (tx, rx) = oneshot::channel();
        PendingReply::Channel(tx).settle(ReplyEnvelope::rejected("9", json!({"code": 4})));
        assert_eq!(rx.await.unwrap(), Err(json!({"code": 4})));
    }

    #[test]
    fn test_clear_abandons_without_invoking() {
        let invoked = Arc::new(AtomicBool::new(false));
        let flag = invoked.clone();

        let mut table = PendingReplies::default();
        table.insert(
            "1".into(),
            PendingReply::Callbacks {
                on_resolve: Some(Box::new(move |_| flag.store(true, Ordering::SeqCst))),
                on_reject: None,
            },
        );

        assert_eq!(table.clear(), 1);
        assert_eq!(table.len(), 0);
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[test]
    fn test_reply_latch_without_socket() {
        let reply = Reply::new("5".into(), Weak::new());
        // First attempt consumes the latch even though the socket is gone
        assert!(reply.resolve(json!(1)).is_err());
        assert!(reply.is_sent());
        assert_eq!(reply.reject(json!("late")).unwrap(), false);
    }
}
