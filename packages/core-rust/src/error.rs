//! Error taxonomy for operations against the constrained store.

/// Failure of a single store operation.
///
/// Every variant is recoverable at the operation level: reads surface it to the
/// unit-of-work caller as a retryable failure, writes feed it into the worker's
/// retry loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No ticket became available within the bounded wait, or the wait queue
    /// itself was full.
    #[error("store busy: no ticket available after {waited_ms}ms")]
    Busy { waited_ms: u64 },
    /// The underlying store could not be reached.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
    /// The operation held a ticket but did not complete within its timeout.
    #[error("store operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl StoreError {
    /// Shorthand for [`StoreError::Unavailable`].
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Stable label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Busy { .. } => "busy",
            Self::Unavailable { .. } => "unavailable",
            Self::Timeout { .. } => "timeout",
        }
    }
}
