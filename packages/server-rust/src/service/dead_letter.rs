//! Destinations for write records the pipeline gives up on.
//!
//! A record reaches a [`DeadLetterSink`] when its retry budget is exhausted,
//! when the pipeline shuts down with the discard policy, or when a writer is
//! aborted at the drain deadline while holding it. The loss is always
//! counted and logged; the sink decides whether anything is kept for recovery.

use std::fmt;

use parking_lot::Mutex;
use surge_core::{RecordId, StoreError, WriteRecord};
use tracing::error;

/// Why a group of records was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The store kept failing these records for every attempt.
    RetriesExhausted { attempts: u32, last_error: String },
    /// The pipeline shut down before they were flushed.
    Shutdown,
    /// A writer was aborted at the drain deadline while holding them. The
    /// store may or may not have applied them.
    AbortedInFlight,
}

impl DropReason {
    /// Builds a `RetriesExhausted` reason from the last observed failure.
    #[must_use]
    pub fn retries_exhausted(attempts: u32, last_error: Option<&StoreError>) -> Self {
        Self::RetriesExhausted {
            attempts,
            last_error: last_error.map_or_else(
                || "records reported failed by store".to_string(),
                ToString::to_string,
            ),
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Shutdown => "shutdown",
            Self::AbortedInFlight => "aborted_in_flight",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriesExhausted {
                attempts,
                last_error,
            } => write!(f, "retries exhausted after {attempts} attempts: {last_error}"),
            Self::Shutdown => f.write_str("discarded at shutdown"),
            Self::AbortedInFlight => f.write_str("writer aborted mid-flush, outcome unknown"),
        }
    }
}

/// Receives records that will never be written by the pipeline.
///
/// Called from worker tasks; implementations must not block for long.
pub trait DeadLetterSink: Send + Sync + 'static {
    fn on_dropped(&self, records: Vec<WriteRecord>, reason: &DropReason);
}

/// Default sink: one `error` entry per dropped group on the `surge::audit`
/// target. Payloads are not retained.
#[derive(Debug, Default, Clone, Copy)]
pub struct AuditLogSink;

impl DeadLetterSink for AuditLogSink {
    fn on_dropped(&self, records: Vec<WriteRecord>, reason: &DropReason) {
        let ids: Vec<RecordId> = records.iter().map(WriteRecord::id).collect();
        let oldest_enqueued_ms = records.iter().map(WriteRecord::enqueued_at_ms).min();
        error!(
            target: "surge::audit",
            count = ids.len(),
            reason = reason.label(),
            detail = %reason,
            ?oldest_enqueued_ms,
            ?ids,
            "write records dropped"
        );
    }
}

/// Sink that keeps dropped records in memory for inspection or replay.
#[derive(Debug, Default)]
pub struct MemoryDeadLetters {
    entries: Mutex<Vec<(WriteRecord, DropReason)>>,
}

impl MemoryDeadLetters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Ids of every retained record, in the order they were dropped.
    #[must_use]
    pub fn ids(&self) -> Vec<RecordId> {
        self.entries.lock().iter().map(|(r, _)| r.id()).collect()
    }

    /// Removes and returns everything retained so far.
    pub fn take(&self) -> Vec<(WriteRecord, DropReason)> {
        std::mem::take(&mut *self.entries.lock())
    }
}

impl DeadLetterSink for MemoryDeadLetters {
    fn on_dropped(&self, records: Vec<WriteRecord>, reason: &DropReason) {
        AuditLogSink.on_dropped(records.clone(), reason);
        self.entries
            .lock()
            .extend(records.into_iter().map(|r| (r, reason.clone())));
    }
}
