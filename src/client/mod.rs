//! Vibe client implementation
//!
//! This module opens sockets against a vibe endpoint: it expands the URI
//! into transport candidates, negotiates one of them in the background and
//! hands the application a [`Socket`] that starts in `Connecting`.

pub mod negotiator;

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::core::config::ClientConfig;
use crate::core::error::{VibeError, VibeResult};
use crate::socket::{Listeners, Reply, Socket};
use crate::utils::uri::{expand_candidates, with_params};

pub use crate::utils::uri::Candidate;
pub use negotiator::{DefaultConnector, Negotiated, Negotiator, TransportConnector};

/// Open a socket to `uri` with `config`.
///
/// Must be called from within a Tokio runtime. Listeners attached right
/// after this returns still observe `open`, since negotiation needs at
/// least one network round trip.
pub fn open(uri: impl Into<String>, config: ClientConfig) -> VibeResult<Socket> {
    SocketBuilder::new(uri).config(config).connect()
}

/// Builder for client sockets with listeners registered before negotiation starts
pub struct SocketBuilder {
    uri: String,
    config: ClientConfig,
    listeners: Listeners,
    connector: Option<Arc<dyn TransportConnector>>,
}

impl SocketBuilder {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            config: ClientConfig::default(),
            listeners: Listeners::default(),
            connector: None,
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the transport factory (defaults to [`DefaultConnector`])
    pub fn connector(mut self, connector: Arc<dyn TransportConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn on<F>(mut self, event_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, Option<Reply>) + Send + Sync + 'static,
    {
        self.listeners.on(event_type, Arc::new(handler));
        self
    }

    pub fn on_open<F>(mut self, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.on_open(Arc::new(handler));
        self
    }

    pub fn on_close<F>(mut self, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.on_close(Arc::new(handler));
        self
    }

    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&VibeError) + Send + Sync + 'static,
    {
        self.listeners.on_error(Arc::new(handler));
        self
    }

    /// Start negotiating and return the connecting socket.
    ///
    /// An unusable URI fails here; transport failures are reported to the
    /// socket's `error` listeners followed by `close`.
    pub fn connect(self) -> VibeResult<Socket> {
        let open_params = self.config.open_params();
        let params: Vec<(&str, &str)> = open_params
            .iter()
            .map(|(key, value)| (*key, value.as_str()))
            .collect();
        let candidates = expand_candidates(&self.uri, &self.config.transports)?
            .into_iter()
            .map(|candidate| Candidate {
                url: with_params(&candidate.url, &params),
                ..candidate
            })
            .collect();
        let connector = match self.connector {
            Some(connector) => connector,
            None => Arc::new(DefaultConnector::new(self.config.clone())?),
        };
        let negotiator = Negotiator::new(candidates, self.config.connect_timeout(), connector);

        let socket = Socket::connecting(self.listeners);
        let cancel = socket.close_requests();
        let pending = socket.clone();

        tokio::spawn(async move {
            match negotiator.negotiate(cancel).await {
                Ok(negotiated) => {
                    pending.establish(
                        &negotiated.handshake,
                        negotiated.transport,
                        negotiated.events,
                    );
                }
                Err(VibeError::Cancelled(_)) => {
                    debug!("Socket closed while negotiating");
                    pending.abandon(None);
                }
                Err(e) => pending.abandon(Some(e)),
            }
        });

        Ok(socket)
    }
}

impl fmt::Debug for SocketBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketBuilder")
            .field("uri", &self.uri)
            .field("config", &self.config)
            .field("listeners", &self.listeners)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::handshake::Handshake;
    use crate::socket::SocketState;
    use crate::transport::memory::MemoryTransport;
    use crate::transport::traits::{Frame, Transport, TransportEvents, TransportKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SilentConnector;

    impl TransportConnector for SilentConnector {
        fn connect(
            &self,
            _candidate: &Candidate,
        ) -> VibeResult<(Arc<dyn Transport>, TransportEvents)> {
            let ((local, events), (peer, _peer_events)) = MemoryTransport::pair();
            // Dropping the peer's sender leaves the local side waiting forever
            drop(peer);
            Ok((Arc::new(local), events))
        }
    }

    struct EchoConnector;

    impl TransportConnector for EchoConnector {
        fn connect(
            &self,
            _candidate: &Candidate,
        ) -> VibeResult<(Arc<dyn Transport>, TransportEvents)> {
            let ((local, events), (peer, mut peer_events)) = MemoryTransport::pair();
            tokio::spawn(async move {
                let handshake = Handshake::new("echo-1", None, 5_000).encode();
                let _ = peer.send(Frame::Text(handshake)).await;
                while let Some(crate::transport::traits::TransportEvent::Message(frame)) =
                    peer_events.recv().await
                {
                    let _ = peer.send(frame).await;
                }
            });
            Ok((Arc::new(local), events))
        }
    }

    #[derive(Default)]
    struct RecordingConnector {
        urls: std::sync::Mutex<Vec<String>>,
    }

    impl TransportConnector for RecordingConnector {
        fn connect(
            &self,
            candidate: &Candidate,
        ) -> VibeResult<(Arc<dyn Transport>, TransportEvents)> {
            self.urls.lock().unwrap().push(candidate.url.to_string());
            SilentConnector.connect(candidate)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_options_ride_on_open_request() {
        let connector = Arc::new(RecordingConnector::default());
        let config = ClientConfig::default()
            .with_transports(vec![TransportKind::LongPoll])
            .with_heartbeat_ms(Some(2_500))
            .with_ack_timeout_ms(2_400);
        let socket = SocketBuilder::new("http://localhost/vibe")
            .config(config)
            .connector(connector.clone())
            .connect()
            .unwrap();

        assert!(socket.opened().await.is_err());
        assert_eq!(
            *connector.urls.lock().unwrap(),
            vec!["http://localhost/vibe?transport=longpoll&heartbeat=2500&_heartbeat=2400"]
        );
    }

    #[test]
    fn test_invalid_uri_fails_fast() {
        assert!(matches!(
            SocketBuilder::new("::not a uri::").connect(),
            Err(VibeError::InvalidUri(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_emits_error_then_close() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let on_error = order.clone();
        let on_close = order.clone();

        let socket = SocketBuilder::new("http://localhost/vibe")
            .config(ClientConfig::default().with_transports(vec![TransportKind::LongPoll]))
            .connector(Arc::new(SilentConnector))
            .on_error(move |e| {
                assert!(matches!(e, VibeError::NegotiationExhausted(_)));
                on_error.lock().unwrap().push("error");
            })
            .on_close(move || on_close.lock().unwrap().push("close"))
            .connect()
            .unwrap();

        assert!(socket.opened().await.is_err());
        assert_eq!(socket.state(), SocketState::Closed);
        assert_eq!(*order.lock().unwrap(), vec!["error", "close"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_negotiation_emits_close_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let close_counter = closes.clone();
        let error_counter = errors.clone();

        let socket = SocketBuilder::new("http://localhost/vibe")
            .connector(Arc::new(SilentConnector))
            .on_close(move || {
                close_counter.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |_| {
                error_counter.fetch_add(1, Ordering::SeqCst);
            })
            .connect()
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        socket.close();
        socket.closed().await;

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_negotiated_socket_round_trip() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let socket = SocketBuilder::new("http://localhost/vibe")
            .connector(Arc::new(EchoConnector))
            .on("echo", move |data, _| {
                let _ = tx.send(data);
            })
            .connect()
            .unwrap();

        socket.opened().await.unwrap();
        assert_eq!(socket.id(), "echo-1");
        assert_eq!(socket.transport_name(), Some("memory"));

        socket.send("echo", serde_json::json!({"n": 1})).unwrap();
        assert_eq!(rx.recv().await.unwrap(), serde_json::json!({"n": 1}));
    }
}
