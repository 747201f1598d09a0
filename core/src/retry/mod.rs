//! Retry logic with exponential backoff
//!
//! - Error classification (retryable vs permanent)
//! - Exponential backoff with jitter, bounded by a total attempt count
//! - Cancellation support
//! - Status callbacks so callers can log or record each scheduled retry

pub mod classifier;
pub mod strategy;

pub use classifier::{ErrorClass, RetryClassifiable};
pub use strategy::{RetryPolicy, RetryStatus, execute_with_backoff_cancellable};

/// Retry error types
///
/// Each variant carries the number of attempts actually made, so callers can
/// tell "permanent on first try" apart from "exhausted after N".
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::error::Error> {
    #[error("retry budget exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },

    #[error("permanent error after {attempts} attempts (not retryable): {error}")]
    Permanent { attempts: u32, error: E },

    /// External cancellation requested
    #[error("retry aborted by cancellation after {attempts} attempts")]
    Aborted { attempts: u32 },
}

impl<E: std::error::Error> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::Permanent { attempts, .. }
            | Self::Aborted { attempts } => *attempts,
        }
    }

    /// The last error the operation produced, if it produced one.
    pub fn into_last_error(self) -> Option<E> {
        match self {
            Self::Exhausted { last_error, .. } => Some(last_error),
            Self::Permanent { error, .. } => Some(error),
            Self::Aborted { .. } => None,
        }
    }
}
