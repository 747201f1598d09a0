//! Error taxonomy for orchestrator operations
//!
//! Contract violations (`TrackBusy`, `LineageNotFound`, `DuplicateLineage`,
//! `IllegalTransition`, `NotReady`) are reported synchronously and never
//! mutate state. Failures of delegated work (generation, validation) are
//! normally absorbed by the retry loop and only surface as events or as a
//! `Stalled` track.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::gateway::GenerationError;
use crate::retry::classifier::{ErrorClass, PermanentError, RetryClassifiable, RetryableError};
use crate::types::{LineageId, MaturityState, TrackKey, TrackRole};

/// Orchestrator result type alias
pub type Result<T> = std::result::Result<T, TwinTrackError>;

#[derive(Debug, Error)]
pub enum TwinTrackError {
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("intent extraction failed: {reason}")]
    Extraction { reason: String },

    /// The criterion evaluation itself could not run (distinct from a criterion failing).
    #[error("criterion '{criterion}' could not be evaluated: {reason}")]
    Validation { criterion: String, reason: String },

    #[error("tracks diverged on criteria: {}", .mismatches.join(", "))]
    DivergenceDetected { mismatches: Vec<String> },

    #[error("track {lineage}/{role} already has an operation in flight")]
    TrackBusy { lineage: LineageId, role: TrackRole },

    #[error("lineage {0} not found")]
    LineageNotFound(LineageId),

    #[error("an active lineage {existing} already exists for {spec}")]
    DuplicateLineage { spec: String, existing: LineageId },

    #[error("illegal transition for {track}: {from} -> {to}")]
    IllegalTransition {
        track: TrackKey,
        from: MaturityState,
        to: MaturityState,
    },

    /// An ordering precondition is not met yet (e.g. no committed pass).
    #[error("{track} is not ready: {reason}")]
    NotReady { track: TrackKey, reason: String },

    #[error("specification {spec} was already recorded with different content")]
    SpecificationConflict { spec: String },

    #[error("invalid specification: {0}")]
    InvalidSpecification(String),

    #[error("failed to read specification {path}: {source}")]
    SpecificationRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("lineage store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("corrupt lineage record: {0}")]
    CorruptRecord(String),

    #[error("failed to (de)serialize {what}: {source}")]
    Serialization {
        what: &'static str,
        source: serde_json::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("operation cancelled by orchestrator shutdown")]
    Cancelled,

    #[error("lineage task failed: {0}")]
    TaskFailed(String),
}

impl TwinTrackError {
    pub(crate) fn store(message: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Store {
            message: message.into(),
            source: Some(source),
        }
    }

    pub(crate) fn not_ready(track: TrackKey, reason: impl Into<String>) -> Self {
        Self::NotReady {
            track,
            reason: reason.into(),
        }
    }

    /// Contract violations are the caller's fault and leave state untouched.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::TrackBusy { .. }
                | Self::LineageNotFound(_)
                | Self::DuplicateLineage { .. }
                | Self::IllegalTransition { .. }
                | Self::NotReady { .. }
        )
    }
}

/// Attach store context to rusqlite results
pub(crate) trait StoreContext<T> {
    fn context(self, message: &'static str) -> Result<T>;
}

impl<T> StoreContext<T> for std::result::Result<T, rusqlite::Error> {
    fn context(self, message: &'static str) -> Result<T> {
        self.map_err(|e| TwinTrackError::store(message, e))
    }
}

impl RetryClassifiable for TwinTrackError {
    fn classify(&self) -> ErrorClass {
        match self {
            TwinTrackError::Generation(err) => err.classify(),

            TwinTrackError::Validation { .. } => {
                ErrorClass::Retryable(RetryableError::EvaluationUnavailable)
            }

            TwinTrackError::Store {
                source: Some(source),
                ..
            } => classify_sqlite_error(source),

            TwinTrackError::Cancelled => ErrorClass::Permanent(PermanentError::Cancelled),

            TwinTrackError::TrackBusy { .. }
            | TwinTrackError::LineageNotFound(_)
            | TwinTrackError::DuplicateLineage { .. }
            | TwinTrackError::IllegalTransition { .. }
            | TwinTrackError::NotReady { .. }
            | TwinTrackError::SpecificationConflict { .. }
            | TwinTrackError::InvalidSpecification(_) => {
                ErrorClass::Permanent(PermanentError::InvalidInput {
                    field: "request".to_string(),
                    reason: self.to_string(),
                })
            }

            _ => ErrorClass::Permanent(PermanentError::Rejected(self.to_string())),
        }
    }

    fn suggested_backoff(&self) -> Option<Duration> {
        match self.classify() {
            ErrorClass::Retryable(RetryableError::StoreLocked) => Some(Duration::from_millis(200)),
            ErrorClass::Retryable(RetryableError::RateLimited { retry_after_secs }) => {
                Some(Duration::from_secs(retry_after_secs))
            }
            _ => None,
        }
    }
}

// SQLITE_BUSY / SQLITE_LOCKED clear up on their own; everything else is permanent.
fn classify_sqlite_error(err: &rusqlite::Error) -> ErrorClass {
    match err {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) =>
        {
            ErrorClass::Retryable(RetryableError::StoreLocked)
        }
        _ => ErrorClass::Permanent(PermanentError::Storage(err.to_string())),
    }
}
