// ! HTTP streaming client transport
// !
// ! Downstream is one long-lived GET whose chunked body carries `data:`
// ! blocks; upstream is one POST per frame. The first decoded payload is the
// ! handshake.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Method};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use url::Url;

use crate::core::config::ClientConfig;
use crate::core::error::{VibeError, VibeResult};
use crate::protocol::codec::StreamDecoder;
use crate::protocol::handshake::Handshake;
use crate::protocol::names::{PARAM_WHEN, WHEN_OPEN};
use crate::transport::http::{HttpChannel, ensure_success};
use crate::transport::traits::{EventSink, Frame, Transport, TransportEvents};
use crate::utils::uri::with_params;

/// HTTP streaming transport for vibe clients
#[derive(Debug)]
pub struct HttpStreamClientTransport {
    channel: HttpChannel,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl HttpStreamClientTransport {
    /// Open the downstream request; progress is reported on the returned event stream
    pub fn connect(client: Client, url: Url, config: &ClientConfig) -> (Arc<Self>, TransportEvents) {
        let (sink, events) = EventSink::channel("stream");
        let channel = HttpChannel::new(client, url, config, sink, "stream");
        let reader = tokio::spawn(Self::run(channel.clone()));

        let transport = Arc::new(Self {
            channel,
            reader: Mutex::new(Some(reader)),
        });
        (transport, events)
    }

    async fn run(channel: HttpChannel) {
        if let Err(e) = Self::read_stream(&channel).await {
            tracing::debug!("Stream transport ended with error: {}", e);
            channel.sink().emit_error(e);
        }
        channel.sink().emit_close();
    }

    async fn read_stream(channel: &HttpChannel) -> VibeResult<()> {
        let url = with_params(channel.url(), &[(PARAM_WHEN, WHEN_OPEN)]);
        tracing::debug!("Opening stream: {}", url);

        let response = channel.request(Method::GET, url).send().await?;
        let mut body = ensure_success(response, "stream open")?.bytes_stream();
        let mut decoder = StreamDecoder::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for payload in decoder.feed(&chunk)? {
                let sink = channel.sink();
                if sink.is_open() {
                    tracing::trace!("Stream payload: {}", payload);
                    sink.emit_message(Frame::Text(payload));
                } else {
                    let handshake = Handshake::decode(&payload)?;
                    channel.assign_id(&handshake.id);
                    sink.emit_open(Some(payload));
                }
            }
        }

        tracing::debug!("Stream response ended");
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpStreamClientTransport {
    async fn send(&self, frame: Frame) -> VibeResult<()> {
        if !self.channel.sink().is_open() {
            return Err(VibeError::closed("stream transport is not open"));
        }
        self.channel.post(frame).await
    }

    async fn close(&self) -> VibeResult<()> {
        let was_open = self.channel.sink().is_open();
        self.channel.sink().emit_close();

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            reader.abort();
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
        "stream"
    }

    fn connection_info(&self) -> String {
        format!("HTTP streaming transport (url: {})", self.channel.url())
    }
}
