//! Caller context: cancellation plus an optional deadline.

use crate::error::{RelayError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Carried through every suspension point of a call.
///
/// Cloning shares the cancellation token.
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    started: Instant,
    deadline: Option<Instant>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CallContext {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            started: Instant::now(),
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fails if the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(self.deadline_error());
        }
        Ok(())
    }

    /// Whether sleeping for `wait` would cross the deadline.
    pub fn would_exceed(&self, wait: Duration) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() + wait > deadline)
    }

    pub(crate) fn deadline_error(&self) -> RelayError {
        let budget = self
            .deadline
            .map_or(Duration::ZERO, |deadline| {
                deadline.saturating_duration_since(self.started)
            });
        RelayError::DeadlineExceeded(budget)
    }

    /// Sleeps for `wait`. Fails immediately when the sleep would outlive the
    /// deadline, and early when the token is cancelled.
    pub async fn sleep(&self, wait: Duration) -> Result<()> {
        self.check()?;
        if self.would_exceed(wait) {
            return Err(self.deadline_error());
        }
        tokio::select! {
            () = self.cancel.cancelled() => Err(RelayError::Cancelled),
            () = tokio::time::sleep(wait) => Ok(()),
        }
    }

    /// Runs `fut` until it completes, the token fires, or the deadline passes.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        self.check()?;
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            () = self.cancel.cancelled() => Err(RelayError::Cancelled),
            () = expired => Err(self.deadline_error()),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_fails_fast_past_deadline() {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(50));
        let start = std::time::Instant::now();
        let err = ctx.sleep(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, RelayError::DeadlineExceeded(_)));
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_cancel_wakes_sleeper() {
        let ctx = CallContext::new();
        let sleeper = ctx.clone();
        let handle = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(RelayError::Cancelled)));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(30));
        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(matches!(result, Err(RelayError::DeadlineExceeded(_))));
    }

    #[tokio::test]
    async fn test_run_returns_output() {
        let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
        assert_eq!(ctx.run(async { 7 }).await.unwrap(), 7);
    }
}
