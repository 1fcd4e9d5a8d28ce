// ! WebSocket client transport
// !
// ! Module provides the WebSocket channel: one connection carrying text and
// ! binary frames in both directions. The first text message from the
// ! server is the handshake and is reported as `Open`.

use async_trait::async_trait;
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::{net::TcpStream, sync::Mutex, task::JoinHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message,
        client::IntoClientRequest,
        http::{HeaderName, HeaderValue, Request},
    },
};
use url::Url;

use crate::core::config::ClientConfig;
use crate::core::error::{VibeError, VibeResult};
use crate::transport::traits::{EventSink, Frame, Transport, TransportEvents};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// WebSocket transport for vibe clients
#[derive(Debug)]
pub struct WebSocketClientTransport {
    url: Url,
    sink: EventSink,
    writer: Arc<Mutex<Option<WsSink>>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl WebSocketClientTransport {
    /// Start connecting to `url`; progress is reported on the returned event stream
    ///
    /// # Arguments
    /// * `url` - WebSocket URL (e.g., "ws://localhost:8080/vibe?transport=ws")
    /// * `config` - Client configuration supplying extra headers
    pub fn connect(url: Url, config: &ClientConfig) -> (Arc<Self>, TransportEvents) {
        let (sink, events) = EventSink::channel("ws");
        let writer = Arc::new(Mutex::new(None));

        let reader = tokio::spawn(Self::run(
            url.clone(),
            config.headers.clone().into_iter().collect(),
            writer.clone(),
            sink.clone(),
        ));

        let transport = Arc::new(Self {
            url,
            sink,
            writer,
            reader: StdMutex::new(Some(reader)),
        });
        (transport, events)
    }

    fn build_request(url: &Url, headers: &[(String, String)]) -> VibeResult<Request<()>> {
        let mut request = url.as_str().into_client_request()?;
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| VibeError::configuration(format!("Invalid header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| VibeError::configuration(format!("Invalid header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }
        Ok(request)
    }

    async fn run(
        url: Url,
        headers: Vec<(String, String)>,
        writer: Arc<Mutex<Option<WsSink>>>,
        sink: EventSink,
    ) {
        tracing::debug!("Connecting to WebSocket: {}", url);

        let stream = match Self::build_request(&url, &headers) {
            Ok(request) => connect_async(request).await.map_err(VibeError::from),
            Err(e) => Err(e),
        };
        let (ws_sender, mut ws_receiver) = match stream {
            Ok((stream, _)) => stream.split(),
            Err(e) => {
                tracing::debug!("WebSocket connect to {} failed: {}", url, e);
                sink.emit_error(e);
                sink.emit_close();
                return;
            }
        };
        *writer.lock().await = Some(ws_sender);

        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    tracing::trace!("Received WebSocket message: {}", text);
                    let text = text.to_string();
                    if sink.is_open() {
                        sink.emit_message(Frame::Text(text));
                    } else {
                        sink.emit_open(Some(text));
                    }
                }
                Ok(Message::Binary(bytes)) => {
                    sink.emit_message(Frame::Binary(bytes));
                }
                Ok(Message::Close(_)) => {
                    tracing::debug!("WebSocket connection closed by server");
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Err(e) => {
                    tracing::debug!("WebSocket error: {}", e);
                    sink.emit_error(VibeError::from(e));
                    break;
                }
            }
        }

        writer.lock().await.take();
        sink.emit_close();
    }
}

#[async_trait]
impl Transport for WebSocketClientTransport {
    async fn send(&self, frame: Frame) -> VibeResult<()> {
        let mut writer = self.writer.lock().await;
        let writer = writer
            .as_mut()
            .ok_or_else(|| VibeError::closed("WebSocket not connected"))?;

        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes),
        };
        writer
            .send(message)
            .await
            .map_err(|e| VibeError::TransportSendFailure(format!("Failed to send message: {e}")))
    }

    async fn close(&self) -> VibeResult<()> {
        tracing::debug!("Closing WebSocket connection to {}", self.url);

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.send(Message::Close(None)).await;
        }

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            reader.abort();
        }

        self.sink.emit_close();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.sink.is_open()
    }

    fn name(&self) -> &'static str {
        "ws"
    }

    fn connection_info(&self) -> String {
        format!("WebSocket transport (url: {})", self.url)
    }
}
