// ! HTTP exchange helpers shared by the streaming and long-polling clients
// !
// ! Both HTTP transports send upstream frames as individual POSTs addressed
// ! by the transport id the server assigned in the handshake, and both tell
// ! the server about a local close with a fire-and-forget `when=abort`.

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Response};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

use crate::core::config::ClientConfig;
use crate::core::error::{VibeError, VibeResult};
use crate::core::logging::ErrorContext;
use crate::core::retry::RetryPolicy;
use crate::protocol::names::{
    BINARY_CONTENT_TYPE, PARAM_ID, PARAM_WHEN, POST_DATA_PREFIX, TEXT_CONTENT_TYPE, WHEN_ABORT,
};
use crate::transport::traits::{EventSink, Frame};
use crate::utils::uri::with_params;

/// Upstream half of an HTTP transport
#[derive(Debug, Clone)]
pub(crate) struct HttpChannel {
    client: Client,
    url: Url,
    id: Arc<OnceLock<String>>,
    headers: Vec<(String, String)>,
    read_timeout: Duration,
    retry: RetryPolicy,
    sink: EventSink,
    transport: &'static str,
}

impl HttpChannel {
    pub(crate) fn new(
        client: Client,
        url: Url,
        config: &ClientConfig,
        sink: EventSink,
        transport: &'static str,
    ) -> Self {
        Self {
            client,
            url,
            id: Arc::new(OnceLock::new()),
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            read_timeout: config.read_timeout(),
            retry: RetryPolicy::new(config.retry.clone()),
            sink,
            transport,
        }
    }

    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    pub(crate) fn sink(&self) -> &EventSink {
        &self.sink
    }

    pub(crate) fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Transport id assigned by the server, once the handshake arrived
    pub(crate) fn id(&self) -> Option<&str> {
        self.id.get().map(String::as_str)
    }

    pub(crate) fn assign_id(&self, id: &str) {
        if self.id.set(id.to_string()).is_err() {
            debug!("{} transport already has id {:?}", self.transport, self.id());
        }
    }

    pub(crate) fn context(&self, operation: &str) -> ErrorContext {
        let context = ErrorContext::new(operation).with_transport(self.transport);
        match self.id() {
            Some(id) => context.with_socket_id(id),
            None => context,
        }
    }

    /// Request to `url` carrying the configured headers
    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.headers
            .iter()
            .fold(self.client.request(method, url), |request, (name, value)| {
                request.header(name.as_str(), value.as_str())
            })
    }

    /// Deliver one upstream frame, retrying while the transport stays open
    pub(crate) async fn post(&self, frame: Frame) -> VibeResult<()> {
        let id = self
            .id()
            .ok_or_else(|| VibeError::closed(format!("{} transport is not open", self.transport)))?
            .to_string();
        let url = with_params(&self.url, &[(PARAM_ID, id.as_str())]);

        let (content_type, body) = match frame {
            Frame::Text(text) => (
                TEXT_CONTENT_TYPE,
                Bytes::from(format!("{POST_DATA_PREFIX}{text}")),
            ),
            Frame::Binary(bytes) => (BINARY_CONTENT_TYPE, bytes),
        };

        let sink = self.sink.clone();
        self.retry
            .execute_while(
                || {
                    let request = self
                        .request(Method::POST, url.clone())
                        .timeout(self.read_timeout)
                        .header(CONTENT_TYPE, content_type)
                        .body(body.clone());
                    async move {
                        let response = request
                            .send()
                            .await
                            .map_err(|e| VibeError::TransportSendFailure(e.to_string()))?;
                        ensure_success(response, "POST").map(|_| ())
                    }
                },
                || sink.is_open(),
                self.context("post"),
            )
            .await?;

        trace!("{} transport {} posted frame", self.transport, id);
        Ok(())
    }

    /// Tell the server the transport is gone without waiting for an answer
    pub(crate) fn notify_abort(&self) {
        let Some(id) = self.id() else {
            return;
        };
        let url = with_params(&self.url, &[(PARAM_WHEN, WHEN_ABORT), (PARAM_ID, id)]);
        let request = self.request(Method::GET, url).timeout(self.read_timeout);
        let transport = self.transport;

        tokio::spawn(async move {
            if let Err(e) = request.send().await {
                debug!("{} abort notification failed: {}", transport, e);
            }
        });
    }
}

/// Map a non-success status to a protocol error
pub(crate) fn ensure_success(response: Response, exchange: &str) -> VibeResult<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if status.as_u16() >= 502 {
        Err(VibeError::connection(format!("{exchange} returned {status}")))
    } else {
        Err(VibeError::protocol(format!("{exchange} returned {status}")))
    }
}

/// Shared reqwest client for a socket's candidates
pub(crate) fn build_client(config: &ClientConfig) -> VibeResult<Client> {
    Client::builder()
        .connect_timeout(config.connect_timeout())
        .build()
        .map_err(VibeError::from)
}
