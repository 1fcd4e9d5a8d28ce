// ! HTTP long-polling client transport
// !
// ! A single logical channel built from a chain of disposable GET exchanges.
// ! Every poll acknowledges the last message id received, so the server can
// ! retransmit anything a lost response carried; duplicates are dropped by
// ! the receipt tracker.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use url::Url;

use crate::core::config::ClientConfig;
use crate::core::error::{VibeError, VibeResult};
use crate::longpoll::ReceiptTracker;
use crate::protocol::codec::decode_longpoll_frame;
use crate::protocol::handshake::Handshake;
use crate::protocol::names::{PARAM_ID, PARAM_LAST_MSG_ID, PARAM_WHEN, WHEN_OPEN, WHEN_POLL};
use crate::transport::http::{HttpChannel, ensure_success};
use crate::transport::traits::{EventSink, Frame, Transport, TransportEvents};
use crate::utils::uri::with_params;

/// Result of one poll exchange
#[derive(Debug, PartialEq, Eq)]
enum PollOutcome {
    /// The server held the poll until its timeout without data
    Idle,
    /// The server closed the transport
    Closed,
    /// One framed message
    Frame(String),
}

/// HTTP long-polling transport for vibe clients
#[derive(Debug)]
pub struct LongpollClientTransport {
    channel: HttpChannel,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl LongpollClientTransport {
    /// Start the open exchange; progress is reported on the returned event stream
    pub fn connect(client: Client, url: Url, config: &ClientConfig) -> (Arc<Self>, TransportEvents) {
        let (sink, events) = EventSink::channel("longpoll");
        let channel = HttpChannel::new(client, url, config, sink, "longpoll");
        let poller = tokio::spawn(Self::run(channel.clone()));

        let transport = Arc::new(Self {
            channel,
            poller: Mutex::new(Some(poller)),
        });
        (transport, events)
    }

    async fn run(channel: HttpChannel) {
        if let Err(e) = Self::poll_loop(&channel).await {
            tracing::debug!("Long-poll transport ended with error: {}", e);
            channel.sink().emit_error(e);
        }
        channel.sink().emit_close();
    }

    async fn open(channel: &HttpChannel) -> VibeResult<()> {
        let url = with_params(channel.url(), &[(PARAM_WHEN, WHEN_OPEN)]);
        tracing::debug!("Opening long-poll transport: {}", url);

        let response = channel
            .request(Method::GET, url)
            .timeout(channel.read_timeout())
            .send()
            .await?;
        let body = ensure_success(response, "long-poll open")?.text().await?;
        let handshake = Handshake::decode(body.trim())?;
        channel.assign_id(&handshake.id);
        channel.sink().emit_open(Some(body.trim().to_string()));
        Ok(())
    }

    async fn poll_loop(channel: &HttpChannel) -> VibeResult<()> {
        Self::open(channel).await?;

        let id = channel
            .id()
            .ok_or_else(|| VibeError::protocol("long-poll handshake carried no id"))?
            .to_string();
        let mut tracker = ReceiptTracker::new();

        loop {
            let ack = tracker.last().map(|last| last.to_string());
            let mut params = vec![(PARAM_WHEN, WHEN_POLL), (PARAM_ID, id.as_str())];
            if let Some(ack) = ack.as_deref() {
                params.push((PARAM_LAST_MSG_ID, ack));
            }
            let url = with_params(channel.url(), &params);

            let sink = channel.sink().clone();
            let outcome = channel
                .retry()
                .execute_while(
                    || Self::poll_once(channel, url.clone()),
                    || sink.is_open(),
                    channel.context("poll"),
                )
                .await?;

            match outcome {
                PollOutcome::Idle => continue,
                PollOutcome::Closed => {
                    tracing::debug!("Long-poll transport {} closed by server", id);
                    return Ok(());
                }
                PollOutcome::Frame(body) => {
                    let (message_id, data) = decode_longpoll_frame(&body)?;
                    if tracker.accept(message_id) {
                        tracing::trace!("Long-poll message {}: {}", message_id, data);
                        channel.sink().emit_message(Frame::Text(data));
                    } else {
                        tracing::debug!("Dropping duplicate long-poll message {}", message_id);
                    }
                }
            }

            if !channel.sink().is_open() {
                return Ok(());
            }
        }
    }

    async fn poll_once(channel: &HttpChannel, url: Url) -> VibeResult<PollOutcome> {
        let response = channel
            .request(Method::GET, url)
            .timeout(channel.read_timeout())
            .send()
            .await?;
        let response = ensure_success(response, "poll")?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(PollOutcome::Idle);
        }
        let body = response.text().await?;
        if body.is_empty() {
            Ok(PollOutcome::Closed)
        } else {
            Ok(PollOutcome::Frame(body))
        }
    }
}

#[async_trait]
impl Transport for LongpollClientTransport {
    async fn send(&self, frame: Frame) -> VibeResult<()> {
        if !self.channel.sink().is_open() {
            return Err(VibeError::closed("long-poll transport is not open"));
        }
        self.channel.post(frame).await
    }

    async fn close(&self) -> VibeResult<()> {
        let was_open = self.channel.sink().is_open();
        self.channel.sink().emit_close();

        let poller = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(poller) = poller {
            poller.abort();
        }
        if was_open {
            self.channel.notify_abort();
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.channel.sink().is_open()
    }

    fn name(&self) -> &'static str {
        "longpoll"
    }

    fn connection_info(&self) -> String {
        format!("HTTP long-polling transport (url: {})", self.channel.url())
    }
}
