//! Outbound queue for frames sent while the connection is not open.
//!
//! Every send goes through the queue; the connection manager flushes it in
//! sequence order whenever the transport is writable. At capacity the oldest
//! non-critical entry is evicted. Critical entries are never evicted.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use sn_core::constants;
use sn_core::error::SnResult;

use crate::frame::Frame;
use crate::transport::FrameSink;

/// A frame waiting to be written.
#[derive(Debug, Clone)]
pub struct QueuedFrame {
    /// Strictly increasing for the lifetime of the queue.
    pub seq: u64,
    pub frame: Frame,
    pub enqueued_at: DateTime<Utc>,
}

/// Result of [`OutboundQueue::enqueue`].
#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    pub seq: u64,
    /// Entry dropped to make room, if any.
    pub evicted: Option<QueuedFrame>,
}

/// Queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub pending_critical: usize,
    pub total_enqueued: u64,
    pub total_sent: u64,
    pub total_evicted: u64,
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pending={} (critical={}), enqueued={}, sent={}, evicted={}",
            self.pending,
            self.pending_critical,
            self.total_enqueued,
            self.total_sent,
            self.total_evicted
        )
    }
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<QueuedFrame>,
    next_seq: u64,
    total_enqueued: u64,
    total_sent: u64,
    total_evicted: u64,
}

/// Bounded FIFO of outbound frames, internally synchronized.
#[derive(Debug)]
pub struct OutboundQueue {
    capacity: usize,
    state: Mutex<QueueState>,
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(constants::OUTBOUND_QUEUE_CAPACITY)
    }
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState {
                next_seq: 1,
                ..QueueState::default()
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a frame, evicting the oldest non-critical entry when full.
    pub fn enqueue(&self, frame: Frame) -> EnqueueOutcome {
        let mut state = self.lock();

        let mut evicted = None;
        if state.entries.len() >= self.capacity {
            match state.entries.iter().position(|e| !e.frame.is_critical()) {
                Some(index) => {
                    evicted = state.entries.remove(index);
                    state.total_evicted += 1;
                    if let Some(old) = &evicted {
                        warn!(
                            "outbound queue full ({}), evicted seq={} type={}",
                            self.capacity,
                            old.seq,
                            old.frame.frame_type()
                        );
                    }
                }
                None => warn!(
                    "outbound queue over capacity ({}) with only critical entries",
                    self.capacity
                ),
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.total_enqueued += 1;
        state.entries.push_back(QueuedFrame {
            seq,
            frame,
            enqueued_at: Utc::now(),
        });
        debug!("enqueued seq={seq}, pending={}", state.entries.len());

        EnqueueOutcome { seq, evicted }
    }

    fn front(&self) -> Option<QueuedFrame> {
        self.lock().entries.front().cloned()
    }

    /// Remove an entry the sink accepted.
    fn ack(&self, seq: u64) {
        let mut state = self.lock();
        if let Some(index) = state.entries.iter().position(|e| e.seq == seq) {
            state.entries.remove(index);
            state.total_sent += 1;
        }
    }

    /// Write queued frames in sequence order until the queue is empty.
    ///
    /// An entry is removed only after the sink accepts it. The first sink
    /// error stops the flush and leaves the rest queued. The lock is never
    /// held across the write.
    pub async fn flush<S>(&self, sink: &mut S) -> SnResult<usize>
    where
        S: FrameSink + ?Sized,
    {
        let mut sent = 0;
        while let Some(entry) = self.front() {
            let text = match entry.frame.to_wire() {
                Ok(text) => text,
                Err(e) => {
                    warn!("dropping unserializable frame seq={}: {e}", entry.seq);
                    self.ack(entry.seq);
                    continue;
                }
            };
            sink.send_text(text).await?;
            self.ack(entry.seq);
            sent += 1;
        }
        if sent > 0 {
            debug!("flushed {sent} queued frame(s)");
        }
        Ok(sent)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Drop every pending entry. Sequence numbers keep increasing.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.entries.len();
        state.entries.clear();
        dropped
    }

    /// Copy of the pending entries in sequence order.
    pub fn snapshot(&self) -> Vec<QueuedFrame> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            pending: state.entries.len(),
            pending_critical: state.entries.iter().filter(|e| e.frame.is_critical()).count(),
            total_enqueued: state.total_enqueued,
            total_sent: state.total_sent,
            total_evicted: state.total_evicted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sn_core::error::SnError;

    #[derive(Default)]
    struct RecordingSink {
        sent: Vec<String>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_text(&mut self, text: String) -> SnResult<()> {
            if self.fail_after == Some(self.sent.len()) {
                return Err(SnError::Transport("broken pipe".into()));
            }
            self.sent.push(text);
            Ok(())
        }

        async fn close(&mut self) -> SnResult<()> {
            Ok(())
        }
    }

    fn content_of(wire: &str) -> String {
        let value: serde_json::Value = serde_json::from_str(wire).unwrap();
        value["data"]["content"].as_str().unwrap_or_default().to_string()
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let queue = OutboundQueue::new(10);
        let a = queue.enqueue(Frame::join_chat("1"));
        let b = queue.enqueue(Frame::join_chat("2"));
        queue.clear();
        let c = queue.enqueue(Frame::join_chat("3"));
        assert!(a.seq < b.seq && b.seq < c.seq);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_evicts_oldest_non_critical() {
        let queue = OutboundQueue::new(3);
        queue.enqueue(Frame::chat_message("1", "critical", "c1"));
        let typing = queue.enqueue(Frame::typing("1", true));
        queue.enqueue(Frame::join_chat("1"));

        let outcome = queue.enqueue(Frame::chat_message("1", "second", "c2"));
        let evicted = outcome.evicted.expect("something evicted");
        assert_eq!(evicted.seq, typing.seq);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.stats().total_evicted, 1);
    }

    #[test]
    fn test_critical_entries_never_evicted() {
        let queue = OutboundQueue::new(2);
        queue.enqueue(Frame::chat_message("1", "a", "c1"));
        queue.enqueue(Frame::chat_message("1", "b", "c2"));
        let outcome = queue.enqueue(Frame::chat_message("1", "c", "c3"));
        assert!(outcome.evicted.is_none());
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.stats().pending_critical, 3);
    }

    #[tokio::test]
    async fn test_flush_in_order() {
        let queue = OutboundQueue::new(10);
        for text in ["a", "b", "c"] {
            queue.enqueue(Frame::chat_message("7", text, text));
        }

        let mut sink = RecordingSink::default();
        assert_eq!(queue.flush(&mut sink).await.unwrap(), 3);
        let contents: Vec<String> = sink.sent.iter().map(|s| content_of(s)).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
        assert_eq!(queue.stats().total_sent, 3);
    }

    #[tokio::test]
    async fn test_flush_failure_keeps_remaining() {
        let queue = OutboundQueue::new(10);
        for text in ["a", "b", "c"] {
            queue.enqueue(Frame::chat_message("7", text, text));
        }

        let mut sink = RecordingSink {
            fail_after: Some(1),
            ..Default::default()
        };
        assert!(queue.flush(&mut sink).await.is_err());
        assert_eq!(sink.sent.len(), 1);

        let remaining: Vec<String> = queue
            .snapshot()
            .iter()
            .map(|e| content_of(&e.frame.to_wire().unwrap()))
            .collect();
        assert_eq!(remaining, vec!["b", "c"]);

        let mut sink = RecordingSink::default();
        queue.flush(&mut sink).await.unwrap();
        let contents: Vec<String> = sink.sent.iter().map(|s| content_of(s)).collect();
        assert_eq!(contents, vec!["b", "c"]);
    }

    #[test]
    fn test_stats_display() {
        let queue = OutboundQueue::default();
        queue.enqueue(Frame::join_chat("1"));
        let text = queue.stats().to_string();
        assert!(text.contains("pending=1"));
        assert!(text.contains("enqueued=1"));
    }
}
