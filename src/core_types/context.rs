//! Per-request cancellation and deadline signal
//!
//! Every provider call and key-value store round-trip made by this crate runs
//! under [`RequestContext::run`], so cancelling the token (or passing the
//! deadline) aborts whatever is currently in flight.

use crate::error::{LlmError, LlmResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation token plus optional deadline for one logical request
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Context that is never cancelled and has no deadline
    pub fn new() -> Self {
        Self::default()
    }

    /// Context driven by an externally owned cancellation token
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Add a deadline `timeout` from now. An earlier existing deadline wins.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel the request
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True when the token is cancelled or the deadline has passed
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail fast if the request is already cancelled
    pub fn check(&self) -> LlmResult<()> {
        if self.token.is_cancelled() {
            return Err(LlmError::cancelled("request cancelled"));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(LlmError::cancelled("request deadline exceeded"));
        }
        Ok(())
    }

    /// Race `fut` against cancellation and the deadline
    pub async fn run<F, T>(&self, fut: F) -> LlmResult<T>
    where
        F: Future<Output = LlmResult<T>>,
    {
        self.check()?;
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(LlmError::cancelled("request cancelled")),
            _ = deadline => Err(LlmError::cancelled("request deadline exceeded")),
            result = fut => result,
        }
    }
}
