// ! Retransmission queue and receipt tracking
// !
// ! The server keeps every message until the client acknowledges it by id;
// ! the client remembers the highest id it has delivered so that a
// ! retransmitted frame is acknowledged again but dispatched only once.

use std::collections::{HashMap, VecDeque};

use crate::protocol::names::{PARAM_LAST_EVENT_IDS, PARAM_LAST_MSG_ID};

/// Ordered, not-yet-acknowledged outbound messages of one transport instance
#[derive(Debug)]
pub struct OutboundQueue {
    next_id: u64,
    entries: VecDeque<(u64, String)>,
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self {
            next_id: 1,
            entries: VecDeque::new(),
        }
    }
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, returning its id
    pub fn enqueue(&mut self, data: impl Into<String>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back((id, data.into()));
        id
    }

    /// Drop every message with an id up to and including `last_received`
    pub fn ack(&mut self, last_received: u64) -> usize {
        let mut pruned = 0;
        while self
            .entries
            .front()
            .is_some_and(|(id, _)| *id <= last_received)
        {
            self.entries.pop_front();
            pruned += 1;
        }
        pruned
    }

    /// Oldest unacknowledged message
    pub fn head(&self) -> Option<(u64, &str)> {
        self.entries.front().map(|(id, data)| (*id, data.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Highest message id delivered so far on the receiving side
#[derive(Debug, Default, Clone, Copy)]
pub struct ReceiptTracker {
    last: Option<u64>,
}

impl ReceiptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id`, returning `false` for a retransmission already delivered
    pub fn accept(&mut self, id: u64) -> bool {
        match self.last {
            Some(last) if id <= last => false,
            _ => {
                self.last = Some(id);
                true
            }
        }
    }

    /// Id to acknowledge on the next poll
    pub fn last(&self) -> Option<u64> {
        self.last
    }
}

/// Read the acknowledgment carried by a poll request.
///
/// Accepts `lastMsgId=<id>` or `lastEventIds=<id>,<id>,..`; the highest id wins.
pub fn parse_ack(params: &HashMap<String, String>) -> Option<u64> {
    let single = params
        .get(PARAM_LAST_MSG_ID)
        .and_then(|value| value.trim().parse::<u64>().ok());

    let listed = params.get(PARAM_LAST_EVENT_IDS).and_then(|value| {
        value
            .split(',')
            .filter_map(|id| id.trim().parse::<u64>().ok())
            .max()
    });

    single.max(listed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_assigns_increasing_ids() {
        let mut queue = OutboundQueue::new();
        assert_eq!(queue.enqueue("a"), 1);
        assert_eq!(queue.enqueue("b"), 2);
        assert_eq!(queue.head(), Some((1, "a")));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_ack_is_cumulative() {
        let mut queue = OutboundQueue::new();
        for data in ["a", "b", "c"] {
            queue.enqueue(data);
        }

        assert_eq!(queue.ack(2), 2);
        assert_eq!(queue.head(), Some((3, "c")));
        assert_eq!(queue.ack(2), 0);
        assert_eq!(queue.ack(10), 1);
        assert!(queue.is_empty());

        // Ids keep increasing after the queue drains
        assert_eq!(queue.enqueue("d"), 4);
    }

    #[test]
    fn test_receipt_tracker_filters_retransmissions() {
        let mut tracker = ReceiptTracker::new();
        assert_eq!(tracker.last(), None);
        assert!(tracker.accept(1));
        assert!(!tracker.accept(1));
        assert!(tracker.accept(2));
        assert_eq!(tracker.last(), Some(2));
    }

    #[test]
    fn test_parse_ack_variants() {
        let params = |pairs: &[(&str, &str)]| -> HashMap<String, String> {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };

        assert_eq!(parse_ack(&params(&[])), None);
        assert_eq!(parse_ack(&params(&[("lastMsgId", "4")])), Some(4));
        assert_eq!(parse_ack(&params(&[("lastEventIds", "3,9,5")])), Some(9));
        assert_eq!(parse_ack(&params(&[("lastMsgId", "junk")])), None);
        assert_eq!(
            parse_ack(&params(&[("lastMsgId", "2"), ("lastEventIds", "7")])),
            Some(7)
        );
    }
}
