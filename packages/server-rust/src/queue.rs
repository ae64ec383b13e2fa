//! Bounded FIFO write queue between request handlers and batch workers.
//!
//! Producers call [`WriteQueue::enqueue`], which never blocks: at capacity it
//! fails fast with [`QueueError::Full`]. Workers call
//! [`WriteQueue::dequeue_batch`], which waits until a full batch is available
//! or the oldest pending record has waited `max_wait`, whichever comes first.
//!
//! Sequence ids are assigned under the same lock that appends the record, so
//! id order, queue order and drain order are identical.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use surge_core::{Document, RecordId, WriteRecord};
use tokio::sync::Notify;
use tokio::time::Instant;

/// Rejection from [`WriteQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue holds `capacity` records already.
    #[error("write queue full (capacity {capacity})")]
    Full { capacity: usize },
    /// The queue was closed for shutdown.
    #[error("write queue closed")]
    Closed,
}

struct QueueState {
    records: VecDeque<WriteRecord>,
    next_seq: u64,
    closed: bool,
}

impl QueueState {
    fn take(&mut self, max: usize) -> Vec<WriteRecord> {
        let n = max.min(self.records.len());
        self.records.drain(..n).collect()
    }
}

/// Shared, bounded, at-least-once write buffer.
///
/// Safe for many concurrent producers and consumers; no record is handed to
/// more than one consumer.
pub struct WriteQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl WriteQueue {
    /// Creates an empty queue holding at most `capacity` records.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                records: VecDeque::with_capacity(capacity.min(4096)),
                next_seq: 0,
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Appends a record carrying `payload` and returns its sequence id.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] at capacity and [`QueueError::Closed`]
    /// after [`close`](Self::close). Neither case blocks.
    pub fn enqueue(&self, payload: Document) -> Result<RecordId, QueueError> {
        let id = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            if state.records.len() >= self.capacity {
                drop(state);
                self.rejected.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("surge_writes_rejected_total").increment(1);
                return Err(QueueError::Full {
                    capacity: self.capacity,
                });
            }
            let id = RecordId(state.next_seq);
            state.next_seq += 1;
            state.records.push_back(WriteRecord::new(id, payload));
            id
        };

        self.accepted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("surge_writes_accepted_total").increment(1);
        self.notify.notify_waiters();
        Ok(id)
    }

    /// Removes up to `max_size` records in FIFO order.
    ///
    /// Returns as soon as `max_size` records are available. Otherwise waits
    /// until `max_wait` has elapsed since the oldest pending record was
    /// enqueued (or since the call began, if the queue is empty) and returns
    /// whatever is there, possibly nothing. After [`close`](Self::close) it
    /// returns immediately, with an empty batch once the queue is drained.
    pub async fn dequeue_batch(&self, max_size: usize, max_wait: Duration) -> Vec<WriteRecord> {
        let max_size = max_size.max(1);
        let idle_deadline = Instant::now() + max_wait;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so an enqueue between the check
            // and the await still wakes us.
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.state.lock();
                if state.records.len() >= max_size || state.closed {
                    return state.take(max_size);
                }
                state
                    .records
                    .front()
                    .map_or(idle_deadline, |oldest| oldest.enqueued_at() + max_wait)
            };

            if Instant::now() >= deadline
                || tokio::time::timeout_at(deadline, notified).await.is_err()
            {
                return self.state.lock().take(max_size);
            }
        }
    }

    /// Stops accepting records and wakes all waiting consumers.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Removes and returns every pending record.
    pub fn drain_all(&self) -> Vec<WriteRecord> {
        self.state.lock().records.drain(..).collect()
    }

    /// Current number of pending records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total records accepted since creation.
    #[must_use]
    pub fn accepted_total(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Total enqueue attempts rejected with [`QueueError::Full`].
    #[must_use]
    pub fn rejected_total(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}
