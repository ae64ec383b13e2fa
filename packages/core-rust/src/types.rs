use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Opaque document carried by a write record and returned by store reads.
///
/// The pipeline never inspects it; only the backing store interprets it.
pub type Document = serde_json::Value;

/// Sequence identifier assigned to a [`WriteRecord`] when it is enqueued.
///
/// Identifiers are strictly increasing in enqueue order, so comparing two ids
/// tells which record entered the queue first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Key under which a flushed record becomes readable from the store.
    #[must_use]
    pub fn store_key(self) -> String {
        format!("record:{}", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pending write: payload plus its sequence id and enqueue timestamps.
///
/// Immutable once created. The write queue hands each record to exactly one
/// batch; the worker that receives it owns it until it is flushed or dropped.
#[derive(Debug, Clone)]
pub struct WriteRecord {
    id: RecordId,
    payload: Document,
    enqueued_at: Instant,
    enqueued_at_ms: u64,
}

impl WriteRecord {
    /// Creates a record stamped with the current monotonic and wall-clock time.
    #[must_use]
    pub fn new(id: RecordId, payload: Document) -> Self {
        Self {
            id,
            payload,
            enqueued_at: Instant::now(),
            enqueued_at_ms: unix_millis(),
        }
    }

    #[must_use]
    pub fn id(&self) -> RecordId {
        self.id
    }

    #[must_use]
    pub fn payload(&self) -> &Document {
        &self.payload
    }

    /// Monotonic enqueue instant. Batch deadlines are measured from this.
    #[must_use]
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Wall-clock enqueue time in millis since the Unix epoch, for audit logs.
    #[must_use]
    pub fn enqueued_at_ms(&self) -> u64 {
        self.enqueued_at_ms
    }

    /// Time spent since enqueue.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// Outcome of a single batched write against the store.
///
/// Ephemeral: produced by the store for the worker that issued the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWriteResult {
    /// Records the store applied.
    pub succeeded: Vec<RecordId>,
    /// Records the store rejected; eligible for retry.
    pub failed: Vec<RecordId>,
}

impl BatchWriteResult {
    /// Result marking every record in `records` as applied.
    #[must_use]
    pub fn all_succeeded(records: &[WriteRecord]) -> Self {
        Self {
            succeeded: records.iter().map(WriteRecord::id).collect(),
            failed: Vec::new(),
        }
    }

    /// Result marking every record in `records` as failed.
    #[must_use]
    pub fn all_failed(records: &[WriteRecord]) -> Self {
        Self {
            succeeded: Vec::new(),
            failed: records.iter().map(WriteRecord::id).collect(),
        }
    }

    #[must_use]
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    /// `true` when no record failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// The failed ids as a set, for filtering the retry subset.
    #[must_use]
    pub fn failed_set(&self) -> HashSet<RecordId> {
        self.failed.iter().copied().collect()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
