//! Capacity-limited adapter in front of the constrained store.
//!
//! Every read and batched write acquires a [`Ticket`](super::Ticket) before it
//! touches the [`BackingStore`] and releases it when the call finishes, fails,
//! or is cancelled. Both operations carry a bounded timeout.

use std::sync::Arc;
use std::time::Duration;

use surge_core::{BackingStore, BatchWriteResult, Document, StoreError, WriteRecord};
use tracing::debug;

use super::tickets::{duration_ms, BusyPolicy, TicketPool};

/// Adapter settings mirrored from the store section of the pipeline config.
#[derive(Debug, Clone, Copy)]
pub struct AdapterConfig {
    /// Concurrent operations the store can sustain.
    pub ticket_capacity: usize,
    /// Behavior when all tickets are taken.
    pub busy_policy: BusyPolicy,
    /// Upper bound on a single read once it holds a ticket.
    pub read_timeout: Duration,
    /// Upper bound on a single batched write once it holds a ticket.
    pub write_timeout: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            ticket_capacity: 8,
            busy_policy: BusyPolicy::default(),
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// The only path through which the pipeline talks to the store.
pub struct StoreAdapter {
    backend: Arc<dyn BackingStore>,
    tickets: TicketPool,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl StoreAdapter {
    #[must_use]
    pub fn new(backend: Arc<dyn BackingStore>, config: AdapterConfig) -> Self {
        Self {
            backend,
            tickets: TicketPool::new(config.ticket_capacity, config.busy_policy),
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        }
    }

    /// Reads `key` from the store. `Ok(None)` means not found.
    ///
    /// # Errors
    ///
    /// [`StoreError::Busy`] if no ticket could be acquired,
    /// [`StoreError::Timeout`] if the read exceeded its timeout, or whatever
    /// the backend reported. Nothing is retried here.
    pub async fn read(&self, key: &str) -> Result<Option<Document>, StoreError> {
        let _ticket = self.tickets.acquire().await?;
        match tokio::time::timeout(self.read_timeout, self.backend.read(key)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                debug!(key, timeout_ms = duration_ms(self.read_timeout), "store read timed out");
                Err(StoreError::Timeout {
                    timeout_ms: duration_ms(self.read_timeout),
                })
            }
        }
    }

    /// Applies `records` in a single batched write.
    ///
    /// # Errors
    ///
    /// As for [`read`](Self::read); an `Err` means the whole batch failed.
    pub async fn write_batch(
        &self,
        records: &[WriteRecord],
    ) -> Result<BatchWriteResult, StoreError> {
        let _ticket = self.tickets.acquire().await?;
        match tokio::time::timeout(self.write_timeout, self.backend.write_batch(records)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(StoreError::Timeout {
                timeout_ms: duration_ms(self.write_timeout),
            }),
        }
    }

    /// Operations currently holding a ticket.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tickets.in_flight()
    }

    /// Highest in-flight count observed.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.tickets.peak_in_flight()
    }

    #[must_use]
    pub fn ticket_capacity(&self) -> usize {
        self.tickets.capacity()
    }

    /// Callers currently queued for a ticket.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.tickets.waiting()
    }
}
