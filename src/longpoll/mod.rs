//! Long-poll exchange primitives
//!
//! Reconstructing a continuous channel from disposable request/response
//! pairs needs two pieces of bookkeeping: a retransmission queue on the
//! sending side, pruned only by explicit acknowledgment, and a receipt
//! tracker on the receiving side that acknowledges and deduplicates.
//! The server transport in [`crate::server`] and the client transport in
//! [`crate::transport`] drive these over HTTP.

pub mod queue;

pub use queue::{OutboundQueue, ReceiptTracker, parse_ack};

#[cfg(test)]
mod tests {
    use super::*;

    /// Every message survives responses that are lost before they are read.
    #[test]
    fn test_no_message_loss_with_dropped_responses() {
        let mut queue = OutboundQueue::new();
        let mut tracker = ReceiptTracker::new();
        let mut delivered = Vec::new();

        let sent: Vec<String> = (0..25).map(|n| format!("message-{n}")).collect();
        let mut pending = sent.iter();

        // Enqueue in bursts between polls; drop every third response
        for exchange in 0..200 {
            for _ in 0..(exchange % 3) {
                if let Some(data) = pending.next() {
                    queue.enqueue(data.as_str());
                }
            }

            if let Some(ack) = tracker.last() {
                queue.ack(ack);
            }
            let Some((id, data)) = queue.head() else {
                continue;
            };
            let data = data.to_string();

            if exchange % 3 == 0 {
                continue;
            }
            if tracker.accept(id) {
                delivered.push(data);
            }
        }

        assert_eq!(delivered, sent);
    }
}
