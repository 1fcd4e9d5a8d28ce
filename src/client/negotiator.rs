// ! Transport negotiation
// !
// ! Tries candidate transports strictly one after another. A candidate wins
// ! by delivering its handshake before the connect timeout; a close, an
// ! undecodable handshake or a timeout moves on to the next candidate.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::core::config::ClientConfig;
use crate::core::error::{VibeError, VibeResult};
use crate::core::metrics::global_metrics;
use crate::protocol::handshake::Handshake;
use crate::transport::http::build_client;
use crate::transport::traits::{
    Frame, Transport, TransportEvent, TransportEvents, TransportKind,
};
use crate::transport::{HttpStreamClientTransport, LongpollClientTransport, WebSocketClientTransport};
use crate::utils::uri::Candidate;

/// Creates the transport for a candidate.
///
/// Connecting must not block: the transport reports its progress on the
/// returned event stream and the negotiator applies the timeout.
pub trait TransportConnector: Send + Sync {
    fn connect(&self, candidate: &Candidate) -> VibeResult<(Arc<dyn Transport>, TransportEvents)>;
}

/// Connector building the WebSocket, streaming and long-polling client transports
#[derive(Debug, Clone)]
pub struct DefaultConnector {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DefaultConnector {
    pub fn new(config: ClientConfig) -> VibeResult<Self> {
        Ok(Self {
            client: build_client(&config)?,
            config,
        })
    }
}

impl TransportConnector for DefaultConnector {
    fn connect(&self, candidate: &Candidate) -> VibeResult<(Arc<dyn Transport>, TransportEvents)> {
        let url = candidate.url.clone();
        Ok(match candidate.kind {
            TransportKind::WebSocket => {
                let (transport, events) = WebSocketClientTransport::connect(url, &self.config);
                (transport as Arc<dyn Transport>, events)
            }
            TransportKind::Stream => {
                let (transport, events) =
                    HttpStreamClientTransport::connect(self.client.clone(), url, &self.config);
                (transport as Arc<dyn Transport>, events)
            }
            TransportKind::LongPoll => {
                let (transport, events) =
                    LongpollClientTransport::connect(self.client.clone(), url, &self.config);
                (transport as Arc<dyn Transport>, events)
            }
        })
    }
}

/// The transport locked in for a socket's lifetime
pub struct Negotiated {
    pub kind: TransportKind,
    pub transport: Arc<dyn Transport>,
    pub events: TransportEvents,
    pub handshake: Handshake,
}

impl fmt::Debug for Negotiated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiated")
            .field("kind", &self.kind)
            .field("handshake", &self.handshake)
            .finish()
    }
}

enum Attempt {
    Handshake(String),
    Failed(VibeError),
    Cancelled,
}

/// Picks the first candidate transport that completes a handshake
pub struct Negotiator {
    candidates: Vec<Candidate>,
    connect_timeout: Duration,
    connector: Arc<dyn TransportConnector>,
}

impl Negotiator {
    pub fn new(
        candidates: Vec<Candidate>,
        connect_timeout: Duration,
        connector: Arc<dyn TransportConnector>,
    ) -> Self {
        Self {
            candidates,
            connect_timeout,
            connector,
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Run the candidates in order until one handshakes.
    ///
    /// `cancel` turning `true` aborts the in-flight candidate and returns
    /// [`VibeError::Cancelled`] without trying the remaining ones.
    pub async fn negotiate(&self, mut cancel: watch::Receiver<bool>) -> VibeResult<Negotiated> {
        let mut failures = Vec::new();

        for candidate in &self.candidates {
            if *cancel.borrow_and_update() {
                return Err(VibeError::Cancelled("negotiation cancelled".to_string()));
            }

            let kind = candidate.kind;
            debug!("Trying {} transport at {}", kind, candidate.url);

            let (transport, mut events) = match self.connector.connect(candidate) {
                Ok(pair) => pair,
                Err(e) => {
                    global_metrics().record_connection_attempt(kind.name(), false);
                    failures.push(format!("{kind}: {e}"));
                    continue;
                }
            };

            let attempt = self.await_handshake(kind, &mut events, &mut cancel).await;

            let error = match attempt {
                Attempt::Handshake(payload) => match Handshake::decode(&payload) {
                    Ok(handshake) => {
                        global_metrics().record_connection_attempt(kind.name(), true);
                        info!("Negotiated {} transport for socket {}", kind, handshake.id);
                        return Ok(Negotiated {
                            kind,
                            transport,
                            events,
                            handshake,
                        });
                    }
                    Err(e) => e,
                },
                Attempt::Failed(e) => e,
                Attempt::Cancelled => {
                    let _ = transport.close().await;
                    debug!("Negotiation cancelled during {} attempt", kind);
                    return Err(VibeError::Cancelled("negotiation cancelled".to_string()));
                }
            };

            global_metrics().record_connection_attempt(kind.name(), false);
            debug!("{} transport failed to open: {}", kind, error);
            let _ = transport.close().await;
            failures.push(format!("{kind}: {error}"));
        }

        Err(VibeError::NegotiationExhausted(if failures.is_empty() {
            "no candidate transports".to_string()
        } else {
            failures.join("; ")
        }))
    }

    async fn await_handshake(
        &self,
        kind: TransportKind,
        events: &mut TransportEvents,
        cancel: &mut watch::Receiver<bool>,
    ) -> Attempt {
        let deadline = sleep(self.connect_timeout);
        tokio::pin!(deadline);
        let mut last_error = None;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Open(payload))
                    | Some(TransportEvent::Message(Frame::Text(payload))) => {
                        return Attempt::Handshake(payload);
                    }
                    Some(TransportEvent::Message(Frame::Binary(_))) => {
                        return Attempt::Failed(VibeError::protocol(
                            "binary frame received before handshake",
                        ));
                    }
                    Some(TransportEvent::Error(e)) => last_error = Some(e),
                    Some(TransportEvent::Close) | None => {
                        return Attempt::Failed(last_error.unwrap_or_else(|| {
                            VibeError::connection(format!("{kind} closed before handshake"))
                        }));
                    }
                },
                _ = &mut deadline => {
                    return Attempt::Failed(VibeError::ConnectTimeout(format!(
                        "{kind} did not handshake within {:?}",
                        self.connect_timeout
                    )));
                }
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow_and_update() {
                        return Attempt::Cancelled;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;
    use crate::utils::uri::expand_candidates;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    /// Connector whose transports only handshake for the listed kinds
    struct ScriptedConnector {
        answering: Vec<TransportKind>,
        attempts: AtomicUsize,
        peers: Mutex<HashMap<TransportKind, (MemoryTransport, TransportEvents)>>,
    }

    impl ScriptedConnector {
        fn new(answering: Vec<TransportKind>) -> Arc<Self> {
            Arc::new(Self {
                answering,
                attempts: AtomicUsize::new(0),
                peers: Mutex::new(HashMap::new()),
            })
        }

        fn peer_is_open(&self, kind: TransportKind) -> bool {
            self.peers.lock().unwrap()[&kind].0.is_open()
        }
    }

    impl TransportConnector for ScriptedConnector {
        fn connect(
            &self,
            candidate: &Candidate,
        ) -> VibeResult<(Arc<dyn Transport>, TransportEvents)> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let ((local, events), (peer, peer_events)) = MemoryTransport::pair();
            if self.answering.contains(&candidate.kind) {
                let handshake = Handshake::new("negotiated", Some(20_000), 5_000).encode();
                let peer = Arc::new(peer);
                tokio::spawn(async move {
                    let _ = peer.send(Frame::Text(handshake)).await;
                    // Keep the peer alive for the lifetime of the test
                    let _keep = (peer, peer_events);
                    std::future::pending::<()>().await;
                });
            } else {
                self.peers
                    .lock()
                    .unwrap()
                    .insert(candidate.kind, (peer, peer_events));
            }
            Ok((Arc::new(local), events))
        }
    }

    fn candidates() -> Vec<Candidate> {
        expand_candidates("http://localhost:8080/vibe", &TransportKind::ALL).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_longpoll_after_timeouts() {
        let connector = ScriptedConnector::new(vec![TransportKind::LongPoll]);
        let negotiator = Negotiator::new(
            candidates(),
            Duration::from_millis(3_000),
            connector.clone(),
        );
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let started = Instant::now();
        let negotiated = negotiator.negotiate(cancel_rx).await.unwrap();

        assert_eq!(negotiated.kind, TransportKind::LongPoll);
        assert_eq!(negotiated.handshake.id, "negotiated");
        assert!(started.elapsed() >= Duration::from_millis(6_000));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
        // Timed-out candidates were torn down
        assert!(!connector.peer_is_open(TransportKind::WebSocket));
        assert!(!connector.peer_is_open(TransportKind::Stream));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_lists_every_candidate() {
        let connector = ScriptedConnector::new(Vec::new());
        let negotiator = Negotiator::new(candidates(), Duration::from_millis(3_000), connector);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        match negotiator.negotiate(cancel_rx).await {
            Err(VibeError::NegotiationExhausted(message)) => {
                assert!(message.contains("ws:"));
                assert!(message.contains("stream:"));
                assert!(message.contains("longpoll:"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_fallback() {
        let connector = ScriptedConnector::new(vec![TransportKind::LongPoll]);
        let negotiator = Negotiator::new(
            candidates(),
            Duration::from_millis(3_000),
            connector.clone(),
        );
        let (cancel_tx, cancel_rx) = watch::channel(false);

        tokio::spawn(async move {
            sleep(Duration::from_millis(1_000)).await;
            let _ = cancel_tx.send(true);
        });

        assert!(matches!(
            negotiator.negotiate(cancel_rx).await,
            Err(VibeError::Cancelled(_))
        ));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert!(!connector.peer_is_open(TransportKind::WebSocket));
    }
}
