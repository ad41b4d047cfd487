// src/limiter/context.rs

use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::RateLimiterError;

/// Deadline and cancellation signal for a blocking wait.
///
/// The default context never expires and is never cancelled.
#[derive(Debug, Clone, Default)]
pub struct WaitContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl WaitContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Ties the wait to an externally owned token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || matches!(self.deadline, Some(d) if d <= Instant::now())
    }

    /// Resolves once the token fires or the deadline passes
    pub(crate) async fn done(&self) -> RateLimiterError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => RateLimiterError::Cancelled("context cancelled".to_string()),
                _ = time::sleep_until(deadline) => RateLimiterError::Cancelled("deadline exceeded".to_string()),
            },
            None => {
                self.cancel.cancelled().await;
                RateLimiterError::Cancelled("context cancelled".to_string())
            }
        }
    }
}
