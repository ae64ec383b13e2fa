//! Unit-of-work types passed through the request pipeline.

use serde::Serialize;
use surge_core::{Document, StoreError};

/// One inbound request. Parameterized only by identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOfWork {
    pub id: String,
}

impl UnitOfWork {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// A unit with a freshly generated UUID v4 identity.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

/// Outcome of a single logical read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadOutcome {
    pub key: String,
    /// `None` when the store reported the key as not found.
    pub value: Option<Document>,
    /// Whether the value came from the read cache.
    pub cached: bool,
}

/// Result returned once reads are resolved and writes are queued.
///
/// `writes_accepted` counts writes handed to the queue, not writes committed
/// to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitResult {
    pub unit_id: String,
    pub reads: Vec<ReadOutcome>,
    pub writes_accepted: usize,
    pub writes_rejected: usize,
}

/// Lifecycle of a single unit of work. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnitState {
    Received,
    ReadsResolved,
    WritesQueued,
    Responded,
}

impl UnitState {
    /// Moves to the next state. `Responded` is terminal and stays put.
    #[must_use]
    pub fn advance(self) -> Self {
        match self {
            Self::Received => Self::ReadsResolved,
            Self::ReadsResolved => Self::WritesQueued,
            Self::WritesQueued | Self::Responded => Self::Responded,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Responded
    }
}

/// Request-level failures. All are retryable by the client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// A store read failed while resolving reads.
    #[error("read of {key} failed: {source}")]
    Store {
        key: String,
        #[source]
        source: StoreError,
    },
    /// The write queue was full under the reject-request overflow policy.
    #[error("write queue full: {accepted} writes accepted before rejection")]
    Backpressure { accepted: usize },
    /// Too many units of work in flight.
    #[error("server overloaded, try again later")]
    Overloaded,
    /// The pipeline is shutting down and no longer accepts writes.
    #[error("pipeline shutting down: {accepted} writes accepted before close")]
    ShuttingDown { accepted: usize },
}

impl RequestError {
    /// Short stable label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store { source, .. } => source.kind(),
            Self::Backpressure { .. } => "backpressure",
            Self::Overloaded => "overloaded",
            Self::ShuttingDown { .. } => "shutting_down",
        }
    }
}
