// ! HTTP streaming server transport
// !
// ! The downstream half is the body of the open request: padding, then the
// ! handshake, then one `data:` block per frame. Upstream frames arrive as
// ! separate POSTs routed here by the dispatcher. Dropping the response body
// ! (the client went away) closes the transport.

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::core::error::{VibeError, VibeResult};
use crate::protocol::codec::{encode_stream_chunk, stream_padding};
use crate::transport::traits::{EventSink, Frame, Transport, TransportEvents};

/// Response body that reports close when the client disconnects
struct ResponseStream {
    chunks: UnboundedReceiverStream<Bytes>,
    sink: EventSink,
}

impl Stream for ResponseStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.chunks)
            .poll_next(cx)
            .map(|chunk| chunk.map(Ok))
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        self.sink.emit_close();
    }
}

/// Streaming transport for one open request
#[derive(Debug)]
pub struct StreamServerTransport {
    chunks: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    sink: EventSink,
}

impl StreamServerTransport {
    /// Create the transport and the response body carrying `handshake`
    pub fn open(handshake: &str, padding_bytes: usize) -> (Arc<Self>, TransportEvents, Body) {
        let (sink, events) = EventSink::channel("stream");
        sink.mark_open();

        let (tx, rx) = mpsc::unbounded_channel();
        let mut preamble = stream_padding(padding_bytes);
        preamble.push_str(&encode_stream_chunk(handshake));
        let _ = tx.send(Bytes::from(preamble));

        let body = Body::from_stream(ResponseStream {
            chunks: UnboundedReceiverStream::new(rx),
            sink: sink.clone(),
        });

        let transport = Arc::new(Self {
            chunks: Mutex::new(Some(tx)),
            sink,
        });
        (transport, events, body)
    }

    /// Frame POSTed by the client
    pub fn receive(&self, frame: Frame) -> bool {
        self.sink.emit_message(frame)
    }

    pub fn fail(&self, error: VibeError) {
        self.sink.emit_error(error);
        self.shutdown();
    }

    fn shutdown(&self) {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.sink.emit_close();
    }
}

#[async_trait]
impl Transport for StreamServerTransport {
    async fn send(&self, frame: Frame) -> VibeResult<()> {
        let Frame::Text(text) = frame else {
            return Err(VibeError::protocol(
                "stream transport carries text frames only",
            ));
        };
        let chunks = self.chunks.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = chunks
            .as_ref()
            .ok_or_else(|| VibeError::closed("stream transport is closed"))?;
        tx.send(Bytes::from(encode_stream_chunk(&text)))
            .map_err(|_| VibeError::closed("stream response is gone"))
    }

    async fn close(&self) -> VibeResult<()> {
        self.shutdown();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.sink.is_open()
    }

    fn name(&self) -> &'static str {
        "stream"
    }
}
