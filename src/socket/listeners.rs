// ! Listener registry
// !
// ! Maps event types to application handlers and keeps the reserved
// ! lifecycle listeners (open, close, error) apart from wire events.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::VibeError;
use crate::socket::reply::Reply;

/// Handler for an application event; `reply` is present when the sender expects an answer
pub type EventHandler = Arc<dyn Fn(Value, Option<Reply>) + Send + Sync>;
/// Handler for `open` and `close`
pub type LifecycleHandler = Arc<dyn Fn() + Send + Sync>;
/// Handler for `error`
pub type ErrorHandler = Arc<dyn Fn(&VibeError) + Send + Sync>;

#[derive(Default, Clone)]
pub struct Listeners {
    events: HashMap<String, Vec<EventHandler>>,
    open: Vec<LifecycleHandler>,
    close: Vec<LifecycleHandler>,
    error: Vec<ErrorHandler>,
}

impl Listeners {
    pub fn on(&mut self, event_type: impl Into<String>, handler: EventHandler) {
        self.events.entry(event_type.into()).or_default().push(handler);
    }

    pub fn on_open(&mut self, handler: LifecycleHandler) {
        self.open.push(handler);
    }

    pub fn on_close(&mut self, handler: LifecycleHandler) {
        self.close.push(handler);
    }

    pub fn on_error(&mut self, handler: ErrorHandler) {
        self.error.push(handler);
    }

    /// Remove every handler registered for `event_type`
    pub fn off(&mut self, event_type: &str) -> usize {
        self.events.remove(event_type).map_or(0, |handlers| handlers.len())
    }

    /// Snapshot of the handlers for `event_type`, safe to call without holding a lock
    pub fn handlers_for(&self, event_type: &str) -> Vec<EventHandler> {
        self.events.get(event_type).cloned().unwrap_or_default()
    }

    pub fn open_handlers(&self) -> Vec<LifecycleHandler> {
        self.open.clone()
    }

    pub fn close_handlers(&self) -> Vec<LifecycleHandler> {
        self.close.clone()
    }

    pub fn error_handlers(&self) -> Vec<ErrorHandler> {
        self.error.clone()
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .field("open", &self.open.len())
            .field("close", &self.close.len())
            .field("error", &self.error.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fan_out_snapshot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut listeners = Listeners::default();

        for _ in 0..2 {
            let calls = calls.clone();
            listeners.on(
                "chat",
                Arc::new(move |_, _| {
                    calls.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        for handler in listeners.handlers_for("chat") {
            handler(Value::Null, None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(listeners.handlers_for("other").is_empty());
        assert_eq!(listeners.off("chat"), 2);
        assert!(listeners.handlers_for("chat").is_empty());
    }
}
