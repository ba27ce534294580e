//! Bounded latest-wins queue.
//!
//! Used for the inbound frame queue and for every outbound channel. `push`
//! never blocks: when the queue is full the oldest item is evicted first, so
//! a stalled consumer costs freshness, never producer progress.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Capacity used when none is configured: only the newest item matters.
pub const DEFAULT_CAPACITY: usize = 1;

/// Fixed-capacity channel with drop-oldest-on-full semantics.
///
/// Handles are cheap to clone; all clones share the same buffer. The
/// intended topology is one producer and one consumer per queue.
pub struct BoundedLatestQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
    stats: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    pushed: AtomicU64,
    dropped: AtomicU64,
    popped: AtomicU64,
}

/// Snapshot of queue counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pushed: u64,
    pub dropped: u64,
    pub popped: u64,
}

impl<T> BoundedLatestQueue<T> {
    /// Create a queue. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            stats: Arc::new(Counters::default()),
        }
    }

    /// Insert `item`, evicting the oldest item if the queue is full.
    pub fn push(&self, item: T) {
        let mut item = item;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => {
                    self.stats.pushed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(TrySendError::Full(back)) => {
                    // The consumer may have drained it in between; that is fine.
                    if self.rx.try_recv().is_ok() {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    item = back;
                }
                // Unreachable while `self` holds a receiver.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Non-blocking pop.
    pub fn try_pop_nowait(&self) -> Option<T> {
        let item = self.rx.try_recv().ok()?;
        self.stats.popped.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    /// Block for up to `timeout` waiting for an item.
    pub fn pop(&self, timeout: Duration) -> Option<T> {
        let item = self.rx.recv_timeout(timeout).ok()?;
        self.stats.popped.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pushed: self.stats.pushed.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            popped: self.stats.popped.load(Ordering::Relaxed),
        }
    }
}

impl<T> Clone for BoundedLatestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            capacity: self.capacity,
            stats: self.stats.clone(),
        }
    }
}

impl<T> Default for BoundedLatestQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
