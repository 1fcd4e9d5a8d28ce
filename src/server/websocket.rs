// ! WebSocket server transport
// !
// ! Wraps an upgraded axum WebSocket. The handshake is the first text
// ! message sent on accept; afterwards text and binary messages map
// ! one-to-one onto frames.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::{sync::Mutex, task::JoinHandle};

use crate::core::error::{VibeError, VibeResult};
use crate::transport::traits::{EventSink, Frame, Transport, TransportEvents};

/// WebSocket transport for one upgraded connection
#[derive(Debug)]
pub struct WebSocketServerTransport {
    sink: EventSink,
    writer: Mutex<Option<SplitSink<WebSocket, Message>>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl WebSocketServerTransport {
    /// Send `handshake` on `socket` and start reading
    pub async fn accept(socket: WebSocket, handshake: &str) -> VibeResult<(Arc<Self>, TransportEvents)> {
        let (mut ws_sender, ws_receiver) = socket.split();
        ws_sender
            .send(Message::Text(handshake.to_string().into()))
            .await
            .map_err(|e| VibeError::transport(format!("Failed to send handshake: {e}")))?;

        let (sink, events) = EventSink::channel("ws");
        sink.mark_open();
        let reader = tokio::spawn(Self::handle_messages(ws_receiver, sink.clone()));

        let transport = Arc::new(Self {
            sink,
            writer: Mutex::new(Some(ws_sender)),
            reader: StdMutex::new(Some(reader)),
        });
        Ok((transport, events))
    }

    async fn handle_messages(mut ws_receiver: SplitStream<WebSocket>, sink: EventSink) {
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    tracing::trace!("Received WebSocket message: {}", text.as_str());
                    sink.emit_message(Frame::Text(text.to_string()));
                }
                Ok(Message::Binary(bytes)) => {
                    sink.emit_message(Frame::Binary(bytes));
                }
                Ok(Message::Close(_)) => {
                    tracing::debug!("WebSocket client closed the connection");
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Err(e) => {
                    tracing::debug!("WebSocket error: {}", e);
                    sink.emit_error(VibeError::transport(e.to_string()));
                    break;
                }
            }
        }
        sink.emit_close();
    }
}

#[async_trait]
impl Transport for WebSocketServerTransport {
    async fn send(&self, frame: Frame) -> VibeResult<()> {
        let mut writer = self.writer.lock().await;
        let writer = writer
            .as_mut()
            .ok_or_else(|| VibeError::closed("WebSocket is closed"))?;

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
}
