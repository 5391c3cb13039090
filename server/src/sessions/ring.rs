//! Byte-bounded scroll-back ring with `tokio::sync::Notify` for subscriber
//! wakeup.
//!
//! [`HistoryRing`] stores sequenced output chunks from a PTY. When the total
//! byte size exceeds the bound, the oldest chunks are evicted. Subscribers
//! (one per connected WebSocket) are woken via a shared [`Notify`] and catch
//! up by sequence number, so a slow client never blocks the PTY reader.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Notify;

/// Upper bound on the byte-sum of retained chunks (100 KiB).
pub const MAX_HISTORY_BYTES: usize = 100 * 1024;

/// A single sequenced output chunk.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    /// Monotonically increasing sequence number (unique within a session).
    pub seq: u64,
    /// The output bytes as lossy UTF-8 (may contain ANSI escapes).
    pub data: String,
}

/// Ring of [`OutputChunk`] items bounded by total byte size.
pub struct HistoryRing {
    chunks: VecDeque<OutputChunk>,
    total_bytes: usize,
    max_bytes: usize,
    next_seq: u64,
    notify: Arc<Notify>,
}

impl HistoryRing {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            total_bytes: 0,
            max_bytes,
            next_seq: 1,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Append a chunk, evicting the oldest until the byte bound holds again,
    /// and wake all waiters.
    pub fn push(&mut self, data: String) {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.total_bytes += data.len();
        self.chunks.push_back(OutputChunk { seq, data });
        while self.total_bytes > self.max_bytes {
            match self.chunks.pop_front() {
                Some(evicted) => self.total_bytes -= evicted.data.len(),
                None => break,
            }
        }

        self.notify.notify_waiters();
    }

    /// Clones of all chunks with `seq > since`, in order.
    pub fn read_since(&self, since: u64) -> Vec<OutputChunk> {
        self.chunks
            .iter()
            .filter(|c| c.seq > since)
            .cloned()
            .collect()
    }

    /// Quick check: are there chunks with `seq > since`?
    pub fn has_since(&self, since: u64) -> bool {
        self.chunks.back().is_some_and(|c| c.seq > since)
    }

    /// Snapshot of the retained data, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.data.clone()).collect()
    }

    /// Sequence number of the newest retained chunk (0 when empty).
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    /// Current byte-sum of retained chunks.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Clone of the shared `Notify` for external waiting.
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_bound_holds_under_eviction() {
        let mut ring = HistoryRing::new(100);
        for i in 0..50 {
            ring.push(format!("chunk-{i:04}"));
            assert!(ring.total_bytes() <= 100, "bound violated at push {i}");
        }
        // Oldest chunks are gone, newest retained in order.
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.last().unwrap(), "chunk-0049");
        assert!(!snapshot.contains(&"chunk-0000".to_string()));
    }

    #[test]
    fn oversized_chunk_leaves_ring_within_bound() {
        let mut ring = HistoryRing::new(10);
        ring.push("x".repeat(64));
        assert!(ring.total_bytes() <= 10);
        assert!(ring.snapshot().is_empty());
        // Sequence numbering still advances past the evicted chunk.
        ring.push("ok".to_string());
        assert_eq!(ring.last_seq(), 2);
    }

    #[test]
    fn read_since_returns_ordered_suffix() {
        let mut ring = HistoryRing::new(1024);
        ring.push("a".to_string());
        ring.push("b".to_string());
        ring.push("c".to_string());

        let all = ring.read_since(0);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].seq, 1);

        let tail = ring.read_since(2);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].data, "c");

        assert!(ring.has_since(2));
        assert!(!ring.has_since(3));
    }
}
