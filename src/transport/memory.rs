// ! In-process transport pair
// !
// ! Two connected endpoints where a frame sent on one side is delivered as a
// ! message on the other. Useful for embedding sockets inside one process
// ! and for exercising the socket layer without a network.

use async_trait::async_trait;

use crate::core::error::{VibeError, VibeResult};
use crate::transport::traits::{EventSink, Frame, Transport, TransportEvents};

/// One end of an in-process channel
#[derive(Debug)]
pub struct MemoryTransport {
    local: EventSink,
    peer: EventSink,
}

impl MemoryTransport {
    /// Create two connected, already-open endpoints
    pub fn pair() -> ((MemoryTransport, TransportEvents), (MemoryTransport, TransportEvents)) {
        let (left_sink, left_events) = EventSink::channel("memory");
        let (right_sink, right_events) = EventSink::channel("memory");
        left_sink.mark_open();
        right_sink.mark_open();

        let left = MemoryTransport {
            local: left_sink.clone(),
            peer: right_sink.clone(),
        };
        let right = MemoryTransport {
            local: right_sink,
            peer: left_sink,
        };
        ((left, left_events), (right, right_events))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: Frame) -> VibeResult<()> {
        if !self.local.is_open() {
            return Err(VibeError::closed("memory transport is closed"));
        }
        if self.peer.emit_message(frame) {
            Ok(())
        } else {
            Err(VibeError::closed("memory transport peer is gone"))
        }
    }

    async fn close(&self) -> VibeResult<()> {
        self.local.emit_close();
        self.peer.emit_close();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.local.is_open()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
