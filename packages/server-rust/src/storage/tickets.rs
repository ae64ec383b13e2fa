//! Fixed-size ticket pool gating concurrent operations against the store.
//!
//! A [`Ticket`] is an RAII permit: the in-flight count is incremented when it
//! is granted and decremented when it is dropped, including when the owning
//! future is cancelled. The count therefore never exceeds the capacity.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use surge_core::StoreError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// What to do when every ticket is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyPolicy {
    /// Wait up to `max_wait` for a ticket. At most `max_waiters` callers may
    /// wait at once; beyond that, callers fail immediately.
    Queue {
        max_wait: Duration,
        max_waiters: usize,
    },
    /// Fail immediately with [`StoreError::Busy`].
    Reject,
}

impl Default for BusyPolicy {
    fn default() -> Self {
        Self::Queue {
            max_wait: Duration::from_millis(250),
            max_waiters: 1024,
        }
    }
}

/// Counting resource of fixed capacity for store operations.
pub struct TicketPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    policy: BusyPolicy,
    waiters: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl TicketPool {
    /// Creates a pool of `capacity` tickets.
    #[must_use]
    pub fn new(capacity: usize, policy: BusyPolicy) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            policy,
            waiters: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Acquires a ticket according to the pool's [`BusyPolicy`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Busy`] when no ticket is free and the policy is
    /// `Reject`, the wait queue is full, or the bounded wait expires.
    pub async fn acquire(&self) -> Result<Ticket, StoreError> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(self.grant(permit));
        }

        let BusyPolicy::Queue {
            max_wait,
            max_waiters,
        } = self.policy
        else {
            return Err(StoreError::Busy { waited_ms: 0 });
        };

        if self.waiters.fetch_add(1, Ordering::AcqRel) >= max_waiters {
            self.waiters.fetch_sub(1, Ordering::AcqRel);
            return Err(StoreError::Busy { waited_ms: 0 });
        }
        let _waiting = WaiterGuard(&self.waiters);

        let start = Instant::now();
        match tokio::time::timeout(max_wait, Arc::clone(&self.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => Ok(self.grant(permit)),
            // The semaphore is never closed; treat it like an expired wait.
            Ok(Err(_)) | Err(_) => Err(StoreError::Busy {
                waited_ms: duration_ms(start.elapsed()),
            }),
        }
    }

    fn grant(&self, permit: OwnedSemaphorePermit) -> Ticket {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        Ticket {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn policy(&self) -> BusyPolicy {
        self.policy
    }

    /// Operations currently holding a ticket.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Highest in-flight count observed since creation.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Callers currently waiting for a ticket.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }
}

/// Permission to perform one operation against the store.
///
/// `Drop::drop` runs before any field is dropped, so the in-flight counter is
/// decremented before the permit returns to the semaphore and the count never
/// briefly exceeds capacity.
#[derive(Debug)]
pub struct Ticket {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

struct WaiterGuard<'a>(&'a AtomicUsize);

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
