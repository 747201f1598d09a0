//! Async utilities for interruptible external calls.
//!
//! Every call the orchestrator makes across a process boundary (generation
//! backends, criteria runners) has to give up when either its own deadline
//! passes or the whole orchestrator is shutting down. These extension traits
//! express both races on any future.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Error returned when a future is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelErr {
    Cancelled,
}

/// Why a deadline-bound future did not produce its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// The cancellation token fired first.
    Cancelled,
    /// The deadline elapsed first.
    TimedOut(Duration),
}

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::TimedOut(after) => write!(f, "timed out after {}ms", after.as_millis()),
        }
    }
}

impl std::error::Error for Interrupted {}

impl From<CancelErr> for Interrupted {
    fn from(_: CancelErr) -> Self {
        Self::Cancelled
    }
}

/// Extension trait for making futures cancellable.
///
/// Races any future against a `CancellationToken`, returning
/// `Err(CancelErr::Cancelled)` if the token is cancelled before the
/// future completes.
#[async_trait]
pub trait OrCancelExt: Sized {
    type Output;

    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, CancelErr>;
}

#[async_trait]
impl<F> OrCancelExt for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, CancelErr> {
        tokio::select! {
            _ = token.cancelled() => Err(CancelErr::Cancelled),
            res = self => Ok(res),
        }
    }
}

/// Extension trait bounding a future by both a timeout and a token.
///
/// Cancellation wins ties: a token that is already cancelled never lets the
/// future start doing work.
#[async_trait]
pub trait WithDeadlineExt: Sized {
    type Output;

    async fn with_deadline(
        self,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<Self::Output, Interrupted>;
}

#[async_trait]
impl<F> WithDeadlineExt for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn with_deadline(
        self,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<Self::Output, Interrupted> {
        if token.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Interrupted::Cancelled),
            res = tokio::time::timeout(timeout, self) => {
                res.map_err(|_| Interrupted::TimedOut(timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::task;
    use tokio::time::sleep;

    #[tokio::test]
    async fn or_cancel_returns_output_when_future_wins() {
        let token = CancellationToken::new();

        let result = async { 42 }.or_cancel(&token).await;

        assert_eq!(Ok(42), result);
    }

    #[tokio::test]
    async fn or_cancel_returns_err_when_token_fires_first() {
        let token = CancellationToken::new();
        let token_clone = token.clone();

        let cancel_handle = task::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            token_clone.cancel();
        });

        let result = async {
            sleep(Duration::from_millis(100)).await;
            7
        }
        .or_cancel(&token)
        .await;

        cancel_handle.await.expect("cancel task panicked");
        assert_eq!(Err(CancelErr::Cancelled), result);
    }

    #[tokio::test]
    async fn deadline_passes_through_fast_futures() {
        let token = CancellationToken::new();

        let result = async { "done" }
            .with_deadline(Duration::from_millis(50), &token)
            .await;

        assert_eq!(Ok("done"), result);
    }

    #[tokio::test]
    async fn deadline_reports_timeout() {
        let token = CancellationToken::new();
        let limit = Duration::from_millis(10);

        let result = async {
            sleep(Duration::from_millis(200)).await;
            1
        }
        .with_deadline(limit, &token)
        .await;

        assert_eq!(Err(Interrupted::TimedOut(limit)), result);
    }

    #[tokio::test]
    async fn deadline_prefers_prior_cancellation() {
        let token = CancellationToken::new();
        token.cancel();

        let result = async { 5 }
            .with_deadline(Duration::from_secs(1), &token)
            .await;

        assert_eq!(Err(Interrupted::Cancelled), result);
    }

    #[test]
    fn interrupted_display_mentions_elapsed_budget() {
        let err = Interrupted::TimedOut(Duration::from_millis(1500));
        assert_eq!("timed out after 1500ms", err.to_string());
    }
}
