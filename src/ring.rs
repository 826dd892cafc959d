//! Generic bounded ring buffer with fan-out watchers (spec §4.5).
//!
//! The original keeps one lock-free slot array with a `(pointer, sequence)` pair per slot
//! so a single producer can publish without blocking readers. That trick only pays for
//! itself with genuine multi-writer contention; nothing in this crate needs it, and the
//! pointer/sequence dance is exactly the kind of manual synchronization memory-safe Rust
//! asks you to justify before reaching for `unsafe`. A `Mutex<VecDeque<T>>` gives the same
//! externally observable behavior (bounded history, oldest evicted first, constant-time
//! push) without it. Shared by the live-feed ring (§4.5) and the trace buffer ring
//! (§4.6.8) per the original's `internal/utils/rbuf.go`.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::mpsc;

const WATCHER_CHANNEL_CAPACITY: usize = 64;

/// A fixed-capacity history of the most recent `T`s pushed, plus any number of live
/// subscribers who receive a copy of each push as it happens.
pub struct RingBuffer<T: Clone + Send + 'static> {
    capacity: usize,
    buf: Mutex<VecDeque<T>>,
    watchers: Mutex<Vec<mpsc::Sender<T>>>,
}

impl<T: Clone + Send + 'static> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            capacity: capacity.max(1),
            buf: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// Appends `v` to the buffer, evicting the oldest entry if at capacity, and fans it
    /// out to every registered watcher. Slow watchers are never waited on: a full channel
    /// just drops this value for that watcher.
    pub fn add(&self, v: T) {
        {
            let mut buf = self.buf.lock().unwrap();
            if buf.len() >= self.capacity {
                buf.pop_front();
            }
            buf.push_back(v.clone());
        }
        let mut watchers = self.watchers.lock().unwrap();
        watchers.retain(|tx| match tx.try_send(v.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Returns up to `capacity` most recent entries, oldest first.
    pub fn get(&self) -> Vec<T> {
        self.buf.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buf.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a new watcher and returns the receiving half. Drop the receiver (or let
    /// it go out of scope) to unsubscribe; the next `add` call reaps it from the watcher
    /// list.
    pub fn watch(&self) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(WATCHER_CHANNEL_CAPACITY);
        self.watchers.lock().unwrap().push(tx);
        rx
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_past_capacity() {
        let rb = RingBuffer::new(3);
        for i in 0..5 {
            rb.add(i);
        }
        assert_eq!(rb.get(), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn watcher_receives_future_pushes() {
        let rb: RingBuffer<i32> = RingBuffer::new(4);
        rb.add(1);
        let mut rx = rb.watch();
        rb.add(2);
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn dropped_watcher_is_reaped_on_next_add() {
        let rb: RingBuffer<i32> = RingBuffer::new(4);
        let rx = rb.watch();
        drop(rx);
        rb.add(1);
        assert_eq!(rb.watcher_count(), 0);
    }

    #[test]
    fn get_returns_oldest_first() {
        let rb = RingBuffer::new(10);
        rb.add("a");
        rb.add("b");
        assert_eq!(rb.get(), vec!["a", "b"]);
    }
}
