//! Error classification for retry decisions

use std::time::Duration;

/// Top-level error classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient errors that should be retried with backoff
    Retryable(RetryableError),

    /// Permanent errors that should NOT be retried
    Permanent(PermanentError),
}

/// Transient errors (retry recommended)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryableError {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("generation backend unavailable")]
    BackendUnavailable,

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("{failed} of {total} acceptance criteria unmet")]
    CriteriaUnmet { failed: usize, total: usize },

    #[error("criteria runner could not evaluate")]
    EvaluationUnavailable,

    #[error("lineage store locked (SQLITE_BUSY)")]
    StoreLocked,
}

/// Permanent errors (do NOT retry)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermanentError {
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("invalid input in field '{field}': {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("cancelled")]
    Cancelled,

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Trait for error classification
pub trait RetryClassifiable {
    fn classify(&self) -> ErrorClass;

    fn is_retryable(&self) -> bool {
        matches!(self.classify(), ErrorClass::Retryable(_))
    }

    fn suggested_backoff(&self) -> Option<Duration>;
}
