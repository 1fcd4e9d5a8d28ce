// ! Socket session
// !
// ! A socket is the application-facing, transport-independent full-duplex
// ! endpoint. It owns one transport, assigns event ids, correlates replies,
// ! runs the heartbeat and dispatches inbound events to listeners.
// !
// ! Each socket is driven by one task that multiplexes transport events,
// ! the heartbeat deadline and close requests, plus a writer task that
// ! hands outbound frames to the transport in send order.

pub mod heartbeat;
pub mod listeners;
pub mod reply;

use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace, warn};

use crate::core::error::{VibeError, VibeResult};
use crate::core::logging::{ErrorContext, ErrorLogger};
use crate::core::metrics::global_metrics;
use crate::protocol::codec;
use crate::protocol::event::{Event, ReplyEnvelope};
use crate::protocol::handshake::Handshake;
use crate::protocol::names;
use crate::transport::traits::{Frame, Transport, TransportEvent, TransportEvents};

pub use heartbeat::{HeartbeatAction, HeartbeatPolicy, HeartbeatTimer};
pub use listeners::{ErrorHandler, EventHandler, LifecycleHandler, Listeners};
pub use reply::{Reply, ReplyCallback};

use reply::{PendingReplies, PendingReply};

/// Lifecycle of a socket; it only moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Connecting,
    Open,
    Closed,
}

/// Transport-independent full-duplex endpoint
#[derive(Clone)]
pub struct Socket {
    inner: Arc<SocketInner>,
}

/// Transport and heartbeat policy waiting for the driver to start
struct Staged {
    transport: Arc<dyn Transport>,
    events: TransportEvents,
    policy: HeartbeatPolicy,
}

pub(crate) struct SocketInner {
    id: RwLock<String>,
    transport_name: RwLock<Option<&'static str>>,
    state: watch::Sender<SocketState>,
    next_event_id: AtomicU64,
    pending: Mutex<PendingReplies>,
    listeners: RwLock<Listeners>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    staged: Mutex<Option<Staged>>,
    close_requested: watch::Sender<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl Socket {
    fn with_state(id: String, state: SocketState, listeners: Listeners) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(state);
        let (close_requested, _) = watch::channel(false);

        Self {
            inner: Arc::new(SocketInner {
                id: RwLock::new(id),
                transport_name: RwLock::new(None),
                state: state_tx,
                next_event_id: AtomicU64::new(0),
                pending: Mutex::new(PendingReplies::default()),
                listeners: RwLock::new(listeners),
                outbound_tx,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                staged: Mutex::new(None),
                close_requested,
            }),
        }
    }

    /// Socket still negotiating its transport; events sent now are queued
    pub(crate) fn connecting(listeners: Listeners) -> Self {
        Self::with_state(uuid::Uuid::new_v4().to_string(), SocketState::Connecting, listeners)
    }

    /// Wrap an established transport in an open socket.
    ///
    /// Listeners can be attached before [`Socket::start`] begins dispatching.
    pub fn from_transport(
        id: impl Into<String>,
        transport: Arc<dyn Transport>,
        events: TransportEvents,
        policy: HeartbeatPolicy,
    ) -> Self {
        let socket = Self::with_state(id.into(), SocketState::Open, Listeners::default());
        *write(&socket.inner.transport_name) = Some(transport.name());
        *lock(&socket.inner.staged) = Some(Staged {
            transport,
            events,
            policy,
        });
        socket
    }

    /// Begin dispatching; calling it again is a no-op
    pub fn start(&self) {
        self.inner.start();
    }

    /// Negotiation finished: adopt the transport and handshake, then open
    pub(crate) fn establish(
        &self,
        handshake: &Handshake,
        transport: Arc<dyn Transport>,
        events: TransportEvents,
    ) {
        *write(&self.inner.id) = handshake.id.clone();
        *write(&self.inner.transport_name) = Some(transport.name());
        *lock(&self.inner.staged) = Some(Staged {
            transport,
            events,
            policy: handshake.initiator_policy(),
        });

        let opened = self.inner.state.send_if_modified(|state| {
            if *state == SocketState::Connecting {
                *state = SocketState::Open;
                true
            } else {
                false
            }
        });
        if opened {
            debug!("Socket {} opened", handshake.id);
            self.inner.emit_open();
        }
        self.inner.start();
    }

    /// Negotiation failed or was cancelled before a transport was adopted
    pub(crate) fn abandon(&self, error: Option<VibeError>) {
        if let Some(error) = error {
            self.inner.emit_error(&error);
        }
        self.inner.finish();
    }

    /// Session id assigned by the server handshake
    pub fn id(&self) -> String {
        read(&self.inner.id).clone()
    }

    pub fn state(&self) -> SocketState {
        *self.inner.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SocketState::Open
    }

    /// Name of the transport carrying the socket, once one is established
    pub fn transport_name(&self) -> Option<&'static str> {
        *read(&self.inner.transport_name)
    }

    /// Register a handler for application events of `event_type`
    pub fn on<F>(&self, event_type: impl Into<String>, handler: F) -> &Self
    where
        F: Fn(Value, Option<Reply>) + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        if names::is_reserved(&event_type) {
            warn!(
                "Handler for reserved event type '{}' will never be invoked; use on_open/on_close/on_error",
                event_type
            );
        }
        write(&self.inner.listeners).on(event_type, Arc::new(handler));
        self
    }

    pub fn on_open<F>(&self, handler: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        write(&self.inner.listeners).on_open(Arc::new(handler));
        self
    }

    pub fn on_close<F>(&self, handler: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        write(&self.inner.listeners).on_close(Arc::new(handler));
        self
    }

    pub fn on_error<F>(&self, handler: F) -> &Self
    where
        F: Fn(&VibeError) + Send + Sync + 'static,
    {
        write(&self.inner.listeners).on_error(Arc::new(handler));
        self
    }

    /// Remove every handler registered for `event_type`
    pub fn off(&self, event_type: &str) -> usize {
        write(&self.inner.listeners).off(event_type)
    }

    /// Send an event without expecting a reply
    pub fn send(&self, event_type: impl Into<String>, data: Value) -> VibeResult<()> {
        self.inner.send_event(event_type.into(), data, None).map(|_| ())
    }

    /// Send an event and route the peer's reply to `on_resolve` or `on_reject`
    pub fn send_with_reply<R, J>(
        &self,
        event_type: impl Into<String>,
        data: Value,
        on_resolve: R,
        on_reject: J,
    ) -> VibeResult<()>
    where
        R: FnOnce(Value) + Send + 'static,
        J: FnOnce(Value) + Send + 'static,
    {
        let pending = PendingReply::Callbacks {
            on_resolve: Some(Box::new(on_resolve)),
            on_reject: Some(Box::new(on_reject)),
        };
        self.inner
            .send_event(event_type.into(), data, Some(pending))
            .map(|_| ())
    }

    /// Send an event and wait for the peer's reply.
    ///
    /// A rejection surfaces as [`VibeError::Rejected`]; closing the socket
    /// before the reply arrives surfaces as [`VibeError::SocketClosed`].
    pub async fn request(&self, event_type: impl Into<String>, data: Value) -> VibeResult<Value> {
        let event_type = event_type.into();
        let (tx, rx) = oneshot::channel();
        self.inner
            .send_event(event_type.clone(), data, Some(PendingReply::Channel(tx)))?;

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(reason)) => Err(VibeError::Rejected(reason)),
            Err(_) => Err(VibeError::closed(format!(
                "socket closed before '{event_type}' was answered"
            ))),
        }
    }

    /// Request an orderly close; listeners see `close` once the transport is gone
    pub fn close(&self) {
        self.inner.close_requested.send_replace(true);
    }

    /// Observe close requests, used to cancel negotiation
    pub(crate) fn close_requests(&self) -> watch::Receiver<bool> {
        self.inner.close_requested.subscribe()
    }

    /// Wait until the socket leaves `Connecting`
    pub async fn opened(&self) -> VibeResult<()> {
        let mut state = self.inner.state.subscribe();
        let reached = state
            .wait_for(|state| *state != SocketState::Connecting)
            .await
            .map(|state| *state)
            .unwrap_or(SocketState::Closed);

        match reached {
            SocketState::Open => Ok(()),
            _ => Err(VibeError::closed(format!(
                "socket {} closed before opening",
                self.id()
            ))),
        }
    }

    /// Wait until the socket is closed
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|state| *state == SocketState::Closed).await;
    }

    /// Number of sent events still waiting for a reply
    pub fn pending_replies(&self) -> usize {
        lock(&self.inner.pending).len()
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("transport", &self.transport_name())
            .finish()
    }
}

impl SocketInner {
    fn id(&self) -> String {
        read(&self.id).clone()
    }

    fn state(&self) -> SocketState {
        *self.state.borrow()
    }

    fn next_id(&self) -> String {
        self.next_event_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn error_context(&self, operation: &str) -> ErrorContext {
        let context = ErrorContext::new(operation).with_socket_id(self.id());
        match *read(&self.transport_name) {
            Some(name) => context.with_transport(name),
            None => context,
        }
    }

    fn send_event(
        &self,
        event_type: String,
        data: Value,
        pending: Option<PendingReply>,
    ) -> VibeResult<String> {
        let id = self.next_id();
        let mut event = Event::new(id.clone(), event_type, data);
        match pending {
            Some(pending) => {
                event = event.expecting_reply();
                lock(&self.pending).insert(id.clone(), pending);
                if let Err(error) = self.enqueue(&event) {
                    lock(&self.pending).take(&id);
                    return Err(error);
                }
            }
            None => self.enqueue(&event)?,
        }
        Ok(id)
    }

    pub(crate) fn send_reply(&self, envelope: &ReplyEnvelope) -> VibeResult<()> {
        self.enqueue(&Event::reply_to(self.next_id(), envelope))
    }

    fn send_heartbeat(&self) -> VibeResult<()> {
        self.enqueue(&Event::heartbeat(self.next_id()))
    }

    fn enqueue(&self, event: &Event) -> VibeResult<()> {
        if self.state() == SocketState::Closed {
            return Err(VibeError::closed(format!(
                "cannot send '{}' on closed socket {}",
                event.event_type,
                self.id()
            )));
        }
        let text = codec::encode_event(event)?;
        trace!("Socket {} queued event {}", self.id(), text);
        self.outbound_tx
            .send(text)
            .map_err(|_| VibeError::closed(format!("socket {} writer is gone", self.id())))
    }

    fn start(self: &Arc<Self>) {
        let staged = lock(&self.staged).take();
        let outbound = lock(&self.outbound_rx).take();
        let (Some(staged), Some(outbound)) = (staged, outbound) else {
            return;
        };
        tokio::spawn(Self::drive(self.clone(), staged, outbound));
    }

    async fn drive(self: Arc<Self>, staged: Staged, outbound: mpsc::UnboundedReceiver<String>) {
        let Staged {
            transport,
            mut events,
            policy,
        } = staged;

        let writer = tokio::spawn(Self::write_loop(
            Arc::downgrade(&self),
            transport.clone(),
            outbound,
        ));

        let mut heartbeat = HeartbeatTimer::start(policy, Instant::now());
        let mut close_requested = self.close_requested.subscribe();
        let mut closing = false;

        loop {
            if !closing && *close_requested.borrow_and_update() {
                closing = true;
                heartbeat.stop();
                self.close_transport(transport.as_ref()).await;
                continue;
            }

            let deadline = heartbeat.deadline();

            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Message(frame)) => {
                        if let Err(error) = self.dispatch(frame, &mut heartbeat) {
                            self.emit_error(&error);
                            if !closing {
                                closing = true;
                                heartbeat.stop();
                                self.close_transport(transport.as_ref()).await;
                            }
                        }
                    }
                    Some(TransportEvent::Error(error)) => self.emit_error(&error),
                    Some(TransportEvent::Open(_)) => {}
                    Some(TransportEvent::Close) | None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() && !closing => {
                    match heartbeat.on_deadline(Instant::now()) {
                        HeartbeatAction::Send => {
                            trace!("Socket {} sending heartbeat", self.id());
                            if let Err(error) = self.send_heartbeat() {
                                self.emit_error(&error);
                            }
                        }
                        HeartbeatAction::Fail => {
                            let error = VibeError::HeartbeatFailure(format!(
                                "no heartbeat from peer of socket {}",
                                self.id()
                            ));
                            self.emit_error(&error);
                            closing = true;
                            self.close_transport(transport.as_ref()).await;
                        }
                        HeartbeatAction::Echo | HeartbeatAction::None => {}
                    }
                },
                changed = close_requested.changed(), if !closing => {
                    if changed.is_err() {
                        closing = true;
                        self.close_transport(transport.as_ref()).await;
                    }
                },
            }
        }

        writer.abort();
        self.finish();
    }

    async fn close_transport(&self, transport: &dyn Transport) {
        if let Err(error) = transport.close().await {
            self.emit_error(&error);
        }
    }

    async fn write_loop(
        socket: Weak<SocketInner>,
        transport: Arc<dyn Transport>,
        mut outbound: mpsc::UnboundedReceiver<String>,
    ) {
        while let Some(text) = outbound.recv().await {
            global_metrics().record_message(transport.name(), "outbound");
            if let Err(error) = transport.send(Frame::Text(text)).await {
                match socket.upgrade() {
                    Some(socket) => socket.emit_error(&error),
                    None => break,
                }
            }
        }
    }

    fn dispatch(self: &Arc<Self>, frame: Frame, heartbeat: &mut HeartbeatTimer) -> VibeResult<()> {
        let text = frame.into_text()?;
        let event = codec::decode_event(&text)?;
        trace!("Socket {} received event {}", self.id(), text);

        if event.is_reply() {
            let envelope = codec::decode_reply_envelope(event.data)?;
            match lock(&self.pending).take(&envelope.id) {
                Some(pending) => pending.settle(envelope),
                None => debug!(
                    "Socket {} ignoring reply for unknown event {}",
                    self.id(),
                    envelope.id
                ),
            }
            return Ok(());
        }

        if event.is_heartbeat() {
            if heartbeat.on_heartbeat(Instant::now()) == HeartbeatAction::Echo {
                self.send_heartbeat()?;
            }
            return Ok(());
        }

        let handlers = read(&self.listeners).handlers_for(&event.event_type);
        if handlers.is_empty() {
            trace!(
                "Socket {} has no listener for event type '{}'",
                self.id(),
                event.event_type
            );
            return Ok(());
        }

        let reply = event
            .reply
            .then(|| Reply::new(event.id.clone(), Arc::downgrade(self)));
        for handler in handlers {
            handler(event.data.clone(), reply.clone());
        }
        Ok(())
    }

    fn emit_open(&self) {
        let handlers = read(&self.listeners).open_handlers();
        for handler in handlers {
            handler();
        }
    }

    fn emit_error(&self, error: &VibeError) {
        ErrorLogger::log_error(error, self.error_context("socket"));
        let handlers = read(&self.listeners).error_handlers();
        for handler in handlers {
            handler(error);
        }
    }

    /// Move to `Closed` exactly once, abandon pending replies and notify listeners
    fn finish(&self) {
        let closed = self.state.send_if_modified(|state| {
            if *state == SocketState::Closed {
                false
            } else {
                *state = SocketState::Closed;
                true
            }
        });
        if !closed {
            return;
        }

        let abandoned = lock(&self.pending).clear();
        if abandoned > 0 {
            debug!(
                "Socket {} closed with {} unanswered requests",
                self.id(),
                abandoned
            );
        }
        debug!("Socket {} closed", self.id());

        let handlers = read(&self.listeners).close_handlers();
        for handler in handlers {
            handler();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn socket_pair(left: HeartbeatPolicy, right: HeartbeatPolicy) -> (Socket, Socket) {
        let ((a, a_events), (b, b_events)) = MemoryTransport::pair();
        (
            Socket::from_transport("left", Arc::new(a), a_events, left),
            Socket::from_transport("right", Arc::new(b), b_events, right),
        )
    }

    #[tokio::test]
    async fn test_events_reach_listener_in_order() {
        let (left, right) = socket_pair(HeartbeatPolicy::Disabled, HeartbeatPolicy::Disabled);
        let (tx, mut rx) = mpsc::unbounded_channel();
        right.on("chat", move |data, reply| {
            assert!(reply.is_none());
            let _ = tx.send(data);
        });
        left.start();
        right.start();

        for n in 0..3 {
            left.send("chat", json!(n)).unwrap();
        }
        for n in 0..3 {
            assert_eq!(rx.recv().await.unwrap(), json!(n));
        }
    }

    #[tokio::test]
    async fn test_reply_latch_sends_one_envelope() {
        let (left, right) = socket_pair(HeartbeatPolicy::Disabled, HeartbeatPolicy::Disabled);
        right.on("greet", |data, reply| {
            let reply = reply.expect("reply controller");
            assert_eq!(reply.resolve(json!({"hello": data})).unwrap(), true);
            assert_eq!(reply.reject(json!("twice")).unwrap(), false);
        });
        left.start();
        right.start();

        let resolved = Arc::new(AtomicUsize::new(0));
        let rejected = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = oneshot::channel();
        let counter = resolved.clone();
        let reject_counter = rejected.clone();
        left.send_with_reply(
            "greet",
            json!("bob"),
            move |value| {
                assert_eq!(value, json!({"hello": "bob"}));
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = done_tx.send(());
            },
            move |_| {
                reject_counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        done_rx.await.unwrap();
        // A stray second envelope would have to arrive before this request
        assert_eq!(left.request("greet", json!("eve")).await.unwrap(), json!({"hello": "eve"}));
        assert_eq!(resolved.load(Ordering::SeqCst), 1);
        assert_eq!(rejected.load(Ordering::SeqCst), 0);
        assert_eq!(left.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_rejection_surfaces_as_error() {
        let (left, right) = socket_pair(HeartbeatPolicy::Disabled, HeartbeatPolicy::Disabled);
        right.on("withdraw", |_, reply| {
            if let Some(reply) = reply {
                let _ = reply.reject(json!({"reason": "insufficient funds"}));
            }
        });
        left.start();
        right.start();

        match left.request("withdraw", json!(100)).await {
            Err(VibeError::Rejected(reason)) => {
                assert_eq!(reason, json!({"reason": "insufficient funds"}))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_after_close_errors() {
        let (left, right) = socket_pair(HeartbeatPolicy::Disabled, HeartbeatPolicy::Disabled);
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = closes.clone();
        left.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        left.start();
        right.start();

        left.close();
        left.closed().await;
        right.closed().await;
        left.close();

        assert_eq!(left.state(), SocketState::Closed);
        assert!(matches!(
            left.send("late", Value::Null),
            Err(VibeError::SocketClosed(_))
        ));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_abandons_pending_request() {
        let (left, right) = socket_pair(HeartbeatPolicy::Disabled, HeartbeatPolicy::Disabled);
        left.start();
        right.start();

        let pending = {
            let left = left.clone();
            tokio::spawn(async move { left.request("never", Value::Null).await })
        };
        tokio::task::yield_now().await;
        right.close();

        assert!(matches!(
            pending.await.unwrap(),
            Err(VibeError::SocketClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_socket() {
        let ((raw, _raw_events), (b, b_events)) = MemoryTransport::pair();
        let socket = Socket::from_transport("s", Arc::new(b), b_events, HeartbeatPolicy::Disabled);
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        socket.on_error(move |error| {
            assert!(matches!(error, VibeError::MalformedFrame(_)));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        socket.start();

        raw.send(Frame::from("not json")).await.unwrap();
        socket.closed().await;
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_keeps_both_sides_alive() {
        let client_policy = HeartbeatPolicy::Initiator {
            interval: Duration::from_millis(2_500),
            ack_timeout: Duration::from_millis(2_400),
        };
        let server_policy = HeartbeatPolicy::Responder {
            interval: Duration::from_millis(2_500),
        };
        let (client, server) = socket_pair(client_policy, server_policy);
        client.start();
        server.start();

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(client.state(), SocketState::Open);
        assert_eq!(server.state(), SocketState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_fails_heartbeat() {
        let ((a, a_events), (_silent, _silent_events)) = MemoryTransport::pair();
        let policy = HeartbeatPolicy::Initiator {
            interval: Duration::from_millis(2_500),
            ack_timeout: Duration::from_millis(2_400),
        };
        let socket = Socket::from_transport("client", Arc::new(a), a_events, policy);
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = failures.clone();
        socket.on_error(move |error| {
            if matches!(error, VibeError::HeartbeatFailure(_)) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        socket.start();

        tokio::time::timeout(Duration::from_millis(4_900), socket.closed())
            .await
            .expect("socket should close once the echo is overdue");
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    /// Closes like a memory transport but reports the close as failed
    struct StubbornClose(MemoryTransport);

    #[async_trait::async_trait]
    impl Transport for StubbornClose {
        async fn send(&self, frame: Frame) -> VibeResult<()> {
            self.0.send(frame).await
        }

        async fn close(&self) -> VibeResult<()> {
            self.0.close().await?;
            Err(VibeError::transport("close handshake refused"))
        }

        fn is_open(&self) -> bool {
            self.0.is_open()
        }

        fn name(&self) -> &'static str {
            "stubborn"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_close_after_heartbeat_failure_is_reported() {
        let ((a, a_events), (_silent, _silent_events)) = MemoryTransport::pair();
        let policy = HeartbeatPolicy::initiator(
            Duration::from_millis(2_500),
            Duration::from_millis(2_400),
        );
        let socket =
            Socket::from_transport("client", Arc::new(StubbornClose(a)), a_events, policy);
        let errors = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = errors.clone();
        socket.on_error(move |error| seen.lock().unwrap().push(error.category()));
        socket.start();

        socket.closed().await;
        assert_eq!(*errors.lock().unwrap(), vec!["heartbeat", "transport"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_ack_timeout_keeps_probes_spaced() {
        let ((a, a_events), (peer, mut peer_events)) = MemoryTransport::pair();
        let handshake = Handshake::decode("id=c&heartbeat=2500&_heartbeat=5000").unwrap();
        let socket =
            Socket::from_transport("c", Arc::new(a), a_events, handshake.initiator_policy());
        socket.start();

        let probes = Arc::new(AtomicUsize::new(0));
        let counter = probes.clone();
        tokio::spawn(async move {
            while let Some(TransportEvent::Message(frame)) = peer_events.recv().await {
                let event = codec::decode_event(&frame.into_text().unwrap()).unwrap();
                if event.is_heartbeat() {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let echo = codec::encode_event(&Event::heartbeat("echo")).unwrap();
                    let _ = peer.send(Frame::Text(echo)).await;
                }
            }
        });

        // Virtual time stands still while the tasks take turns
        for _ in 0..2_000 {
            tokio::task::yield_now().await;
        }
        assert_eq!(probes.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        let sent = probes.load(Ordering::SeqCst);
        assert!((7..=9).contains(&sent), "sent {sent} probes in 10s");
        assert_eq!(socket.state(), SocketState::Open);
    }

    #[tokio::test]
    async fn test_connecting_socket_queues_events() {
        let socket = Socket::connecting(Listeners::default());
        assert_eq!(socket.state(), SocketState::Connecting);
        socket.send("early", json!(1)).unwrap();

        let ((a, a_events), (_b, mut b_events)) = MemoryTransport::pair();
        let opens = Arc::new(AtomicUsize::new(0));
        let counter = opens.clone();
        socket.on_open(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let handshake = Handshake::new("abc", None, 5_000);
        socket.establish(&handshake, Arc::new(a), a_events);
        socket.opened().await.unwrap();

        assert_eq!(socket.id(), "abc");
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        match b_events.recv().await {
            Some(TransportEvent::Message(frame)) => {
                let event = codec::decode_event(&frame.into_text().unwrap()).unwrap();
                assert_eq!(event, Event::new("0", "early", json!(1)));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
