//! Tunnel Outbound Queue
//!
//! Bounded FIFO between `Link::forward` callers and the tunnel's writer
//! task. The backpressure policy is to block the producer when the queue
//! is full; envelopes are never dropped. Envelopes queued while the link
//! is down stay queued and go out after reconnection; the consumer reads
//! the front entry and commits it only after a successful write, so an
//! interrupted write leaves the envelope in place and per-link ordering
//! survives reconnects.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;
use types::{CellError, Envelope, Result};

pub(crate) struct OutboundQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    space: Notify,
    items: Notify,
}

struct QueueState {
    entries: VecDeque<Envelope>,
    closed: bool,
}

impl OutboundQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            capacity,
            space: Notify::new(),
            items: Notify::new(),
        }
    }

    /// Enqueue, waiting for space when full. Fails only once the queue is
    /// closed by tunnel shutdown.
    pub(crate) async fn push(&self, envelope: Envelope) -> Result<()> {
        loop {
            let waiter = self.space.notified();
            {
                let mut state = self.state.lock();
                if state.closed {
                    // Wake the next producer so close propagates.
                    self.space.notify_one();
                    return Err(CellError::queue_closed("tunnel outbound queue"));
                }
                if state.entries.len() < self.capacity {
                    state.entries.push_back(envelope);
                    self.items.notify_one();
                    return Ok(());
                }
            }
            waiter.await;
        }
    }

    /// Wait for the next envelope and return a copy of it without
    /// removing it; [`OutboundQueue::commit`] removes it once it is safely
    /// on the wire. Keeping the entry until then means a write that fails
    /// or is torn down midway leaves the envelope queued for
    /// retransmission after reconnect. `None` once closed and drained.
    pub(crate) async fn front(&self) -> Option<Envelope> {
        loop {
            let waiter = self.items.notified();
            {
                let state = self.state.lock();
                if let Some(envelope) = state.entries.front() {
                    return Some(envelope.clone());
                }
                if state.closed {
                    self.items.notify_one();
                    return None;
                }
            }
            waiter.await;
        }
    }

    /// Drop the front entry after a successful write.
    pub(crate) fn commit(&self) {
        let mut state = self.state.lock();
        if state.entries.pop_front().is_some() {
            self.space.notify_one();
        }
    }

    /// Close the queue. Blocked producers fail, the consumer drains what
    /// remains and then sees the end.
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.space.notify_one();
        self.items.notify_one();
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use types::{CellAddress, CellPath, Payload};

    fn envelope(text: &str) -> Envelope {
        Envelope::request(
            CellAddress::qualified("a", "x"),
            CellPath::single(CellAddress::qualified("b", "y")),
            Payload::Text(text.into()),
        )
    }

    fn text_of(envelope: &Envelope) -> &str {
        match &envelope.payload {
            Payload::Text(t) => t,
            _ => panic!("expected text payload"),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = OutboundQueue::new(8);
        for i in 0..5 {
            queue.push(envelope(&format!("{}", i))).await.unwrap();
        }
        for i in 0..5 {
            let front = queue.front().await.unwrap();
            assert_eq!(text_of(&front), format!("{}", i));
            queue.commit();
        }
    }

    #[tokio::test]
    async fn test_full_queue_blocks_producer_until_space() {
        let queue = Arc::new(OutboundQueue::new(1));
        queue.push(envelope("first")).await.unwrap();

        let waiting = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(envelope("second")).await })
        };

        // The producer must still be blocked.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        assert_eq!(text_of(&queue.front().await.unwrap()), "first");
        queue.commit();
        waiting.await.unwrap().unwrap();
        assert_eq!(text_of(&queue.front().await.unwrap()), "second");
    }

    #[tokio::test]
    async fn test_front_keeps_entry_until_commit() {
        let queue = OutboundQueue::new(8);
        queue.push(envelope("a")).await.unwrap();

        // An uncommitted front read, e.g. a write torn down midway,
        // leaves the entry in place.
        assert_eq!(text_of(&queue.front().await.unwrap()), "a");
        assert_eq!(queue.len(), 1);
        assert_eq!(text_of(&queue.front().await.unwrap()), "a");

        queue.commit();
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_close_fails_producers_and_drains_consumer() {
        let queue = OutboundQueue::new(8);
        queue.push(envelope("remaining")).await.unwrap();
        queue.close();

        assert!(queue.push(envelope("rejected")).await.is_err());
        assert_eq!(text_of(&queue.front().await.unwrap()), "remaining");
        queue.commit();
        assert!(queue.front().await.is_none());
    }
}
