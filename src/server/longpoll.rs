// ! HTTP long-polling server transport
// !
// ! Outbound frames wait in an [`OutboundQueue`] until a poll acknowledges
// ! them, so a response lost in flight is resent on the next poll. At most
// ! one poll is held at a time; a newer poll releases the older one idle.
// ! When no poll is standing the disconnect grace timer runs and closes the
// ! transport if the client does not come back in time.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, trace};

use crate::core::error::{VibeError, VibeResult};
use crate::longpoll::OutboundQueue;
use crate::transport::traits::{EventSink, Frame, Transport, TransportEvents};

/// Answer to one poll exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollReply {
    /// Oldest unacknowledged message
    Frame(u64, String),
    /// Nothing arrived before the poll timeout
    Idle,
    /// The transport is closed
    Close,
}

#[derive(Debug)]
struct HeldPoll {
    generation: u64,
    reply: oneshot::Sender<PollReply>,
}

#[derive(Debug, Default)]
struct LongpollState {
    queue: OutboundQueue,
    held: Option<HeldPoll>,
    generation: u64,
    grace_timer: Option<JoinHandle<()>>,
}

/// Long-polling transport for one client
#[derive(Debug)]
pub struct LongpollServerTransport {
    id: String,
    state: Mutex<LongpollState>,
    sink: EventSink,
    poll_timeout: Duration,
    disconnect_grace: Duration,
    jsonp_callback: Option<String>,
}

enum Waiting {
    Closed,
    Ready(PollReply),
    Held(u64, oneshot::Receiver<PollReply>),
}

/// Releases a held poll when the exchange ends, however it ends
struct PollGuard<'a> {
    transport: &'a LongpollServerTransport,
    generation: Option<u64>,
}

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.transport.release(self.generation);
    }
}

impl LongpollServerTransport {
    /// Create an open transport; the grace timer runs until the first poll
    pub fn open(
        id: impl Into<String>,
        poll_timeout: Duration,
        disconnect_grace: Duration,
        jsonp_callback: Option<String>,
    ) -> (Arc<Self>, TransportEvents) {
        let (sink, events) = EventSink::channel("longpoll");
        sink.mark_open();

        let transport = Arc::new(Self {
            id: id.into(),
            state: Mutex::new(LongpollState::default()),
            sink,
            poll_timeout,
            disconnect_grace,
            jsonp_callback,
        });
        transport.release(None);
        (transport, events)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Callback name when responses must be wrapped as JSONP
    pub fn jsonp_callback(&self) -> Option<&str> {
        self.jsonp_callback.as_deref()
    }

    /// Messages not yet acknowledged by the client
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    fn lock(&self) -> MutexGuard<'_, LongpollState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve one poll carrying the client's acknowledgment
    pub async fn poll(&self, ack: Option<u64>) -> PollReply {
        let waiting = {
            let mut state = self.lock();
            if let Some(timer) = state.grace_timer.take() {
                timer.abort();
            }
            if let Some(ack) = ack {
                let pruned = state.queue.ack(ack);
                if pruned > 0 {
                    trace!("Long-poll {} acknowledged {} messages", self.id, pruned);
                }
            }
            if let Some(held) = state.held.take() {
                let _ = held.reply.send(PollReply::Idle);
            }

            if self.sink.is_closed() {
                Waiting::Closed
            } else if let Some((id, data)) = state.queue.head() {
                Waiting::Ready(PollReply::Frame(id, data.to_string()))
            } else {
                state.generation += 1;
                let generation = state.generation;
                let (tx, rx) = oneshot::channel();
                state.held = Some(HeldPoll {
                    generation,
                    reply: tx,
                });
                Waiting::Held(generation, rx)
            }
        };

        match waiting {
            Waiting::Closed => PollReply::Close,
            Waiting::Ready(reply) => {
                let _guard = PollGuard {
                    transport: self,
                    generation: None,
                };
                reply
            }
            Waiting::Held(generation, rx) => {
                let _guard = PollGuard {
                    transport: self,
                    generation: Some(generation),
                };
                match timeout(self.poll_timeout, rx).await {
                    Ok(Ok(reply)) => reply,
                    Ok(Err(_)) => PollReply::Close,
                    Err(_) => PollReply::Idle,
                }
            }
        }
    }

    /// Frame POSTed by the client
    pub fn receive(&self, frame: Frame) -> bool {
        self.sink.emit_message(frame)
    }

    pub fn fail(&self, error: VibeError) {
        self.sink.emit_error(error);
        self.shutdown();
    }

    /// Drop the held poll if it is still `generation` and start the grace timer
    fn release(&self, generation: Option<u64>) {
        let mut state = self.lock();
        if let Some(generation) = generation {
            if state
                .held
                .as_ref()
                .is_some_and(|held| held.generation == generation)
            {
                state.held = None;
            }
        }
        if state.held.is_some() || self.sink.is_closed() {
            return;
        }

        if let Some(timer) = state.grace_timer.take() {
            timer.abort();
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let sink = self.sink.clone();
        let grace = self.disconnect_grace;
        let id = self.id.clone();
        state.grace_timer = Some(runtime.spawn(async move {
            sleep(grace).await;
            if sink.emit_close() {
                debug!("Long-poll {} did not poll again within {:?}", id, grace);
            }
        }));
    }

    fn shutdown(&self) {
        let held = {
            let mut state = self.lock();
            if let Some(timer) = state.grace_timer.take() {
                timer.abort();
            }
            state.held.take()
        };
        if let Some(held) = held {
            let _ = held.reply.send(PollReply::Close);
        }
        self.sink.emit_close();
    }
}

#[async_trait]
impl Transport for LongpollServerTransport {
    async fn send(&self, frame: Frame) -> VibeResult<()> {
        let Frame::Text(text) = frame else {
            return Err(VibeError::protocol(
                "long-poll transport carries text frames only",
            ));
        };
        if self.sink.is_closed() {
            return Err(VibeError::closed(format!(
                "long-poll transport {} is closed",
                self.id
            )));
        }

        let mut state = self.lock();
        let message_id = state.queue.enqueue(text);
        trace!("Long-poll {} queued message {}", self.id, message_id);

        if let Some(held) = state.held.take() {
            if let Some((id, data)) = state.queue.head() {
                let _ = held.reply.send(PollReply::Frame(id, data.to_string()));
            }
        }
        Ok(())
    }

    async fn close(&self) -> VibeResult<()> {
        self.shutdown();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.sink.is_open()
    }

    fn name(&self) -> &'static str {
        "longpoll"
    }

    fn connection_info(&self) -> String {
        format!("long-poll transport {} ({} queued)", self.id, self.queued())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::traits::TransportEvent;
    use pretty_assertions::assert_eq;

    fn open() -> (Arc<LongpollServerTransport>, TransportEvents) {
        LongpollServerTransport::open(
            "lp",
            Duration::from_millis(15_000),
            Duration::from_millis(3_000),
            None,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacked_message_is_resent() {
        let (transport, _events) = open();
        transport.send(Frame::from("a")).await.unwrap();
        transport.send(Frame::from("b")).await.unwrap();

        assert_eq!(transport.poll(None).await, PollReply::Frame(1, "a".into()));
        // The response was lost: the client polls again without an ack
        assert_eq!(transport.poll(None).await, PollReply::Frame(1, "a".into()));
        assert_eq!(transport.poll(Some(1)).await, PollReply::Frame(2, "b".into()));
        assert_eq!(transport.queued(), 1);

        let idle = transport.poll(Some(2)).await;
        assert_eq!(idle, PollReply::Idle);
        assert_eq!(transport.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_poll_answered_by_send() {
        let (transport, _events) = open();
        let poller = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.poll(None).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        transport.send(Frame::from("hello")).await.unwrap();
        assert_eq!(poller.await.unwrap(), PollReply::Frame(1, "hello".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_answers_held_poll() {
        let (transport, mut events) = open();
        let poller = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.poll(None).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        transport.close().await.unwrap();
        assert_eq!(poller.await.unwrap(), PollReply::Close);
        assert!(matches!(events.recv().await, Some(TransportEvent::Close)));
        assert_eq!(transport.poll(None).await, PollReply::Close);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_timer_closes_abandoned_transport() {
        let (transport, mut events) = open();
        assert_eq!(transport.poll(None).await, PollReply::Idle);

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert!(transport.is_open());

        assert!(matches!(events.recv().await, Some(TransportEvent::Close)));
        assert!(!transport.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_poll_releases_older() {
        let (transport, _events) = open();
        let first = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.poll(None).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.poll(None).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(first.await.unwrap(), PollReply::Idle);
        transport.send(Frame::from("x")).await.unwrap();
        assert_eq!(second.await.unwrap(), PollReply::Frame(1, "x".into()));
    }
}
