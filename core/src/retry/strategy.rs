//! Backoff strategy implementation
//!
//! The delay schedule comes from backon's exponential builder; the loop
//! around it is hand-driven so that each attempt can be numbered, reported
//! through a status callback and interrupted by a cancellation token.

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use twintrack_async_utils::OrCancelExt;

use super::RetryError;
use super::classifier::RetryClassifiable;

/// Retry policy for delegated calls.
///
/// `max_attempts` counts every call including the first one, so the default
/// of 3 means one initial attempt plus two retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
    /// Random variation applied to every delay (±factor). 0 disables jitter.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_interval_ms: 500,
            max_interval_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Policy that tries exactly once
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delays between attempts, before jitter. Yields `max_attempts - 1` values.
    pub fn delays(&self) -> ExponentialBackoff {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.base_interval_ms))
            .with_max_delay(Duration::from_millis(
                self.max_interval_ms.max(self.base_interval_ms),
            ))
            .with_factor(self.multiplier as f32)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
            .build()
    }
}

/// Retry status for progress callbacks
#[derive(Debug, Clone)]
pub struct RetryStatus {
    /// Attempt that just failed (1-indexed)
    pub attempt: u32,
    /// Total elapsed time since first attempt
    pub elapsed: Duration,
    /// Duration of the upcoming backoff sleep
    pub sleep: Duration,
    /// Human-readable reason for the retry
    pub reason: String,
}

/// Execute `operation` until it succeeds, fails permanently, runs out of
/// attempts or `cancel` fires.
///
/// The operation receives the 1-indexed attempt number. Only errors
/// classified as retryable are retried; a suggested backoff from the error
/// is honoured when it is longer than the computed delay.
pub async fn execute_with_backoff_cancellable<F, Fut, T, E, StatusCb>(
    mut operation: F,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut status_cb: StatusCb,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut + Send,
    Fut: Future<Output = Result<T, E>> + Send,
    E: std::error::Error + RetryClassifiable + Send + Sync + 'static,
    StatusCb: FnMut(RetryStatus) + Send,
{
    let start_time = Instant::now();
    let mut delays = policy.delays();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Aborted { attempts: attempt });
        }

        attempt = attempt.saturating_add(1);
        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(RetryError::Permanent {
                attempts: attempt,
                error: err,
            });
        }

        let Some(delay) = delays.next() else {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last_error: err,
            });
        };

        let mut sleep = apply_jitter(delay, policy.jitter_factor);
        if let Some(suggested) = err.suggested_backoff() {
            sleep = sleep.max(suggested);
        }

        status_cb(RetryStatus {
            attempt,
            elapsed: start_time.elapsed(),
            sleep,
            reason: err.to_string(),
        });

        if tokio::time::sleep(sleep).or_cancel(cancel).await.is_err() {
            return Err(RetryError::Aborted { attempts: attempt });
        }
    }
}

/// Apply jitter to a duration
///
/// Adds random variation (±jitter_factor) to prevent thundering herd.
/// Example: 100ms with 0.5 jitter → 50ms to 150ms
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }
    let jitter = rand::rng().random_range(-jitter_factor..=jitter_factor);
    let jittered_ms = (duration.as_millis() as f64 * (1.0 + jitter)).max(0.0) as u64;
    Duration::from_millis(jittered_ms)
}
