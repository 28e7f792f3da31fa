//! Bounded retry for transient object-store failures.

use crate::services::store::StoreResult;
use std::{future::Future, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Backoff doubles per attempt and is capped at this multiple of the base.
const MAX_BACKOFF_SHIFT: u32 = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first one. Zero behaves like one.
    pub attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_backoff: Duration::from_millis(100),
        }
    }
}

/// Outcome of a retried call that can also be cancelled.
#[derive(Debug)]
pub enum Retried<T> {
    Done(StoreResult<T>),
    Cancelled,
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * (1 << attempt.min(MAX_BACKOFF_SHIFT))
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts are used up. Cancellation is observed before every try and
    /// during backoff.
    pub async fn run<T, F, Fut>(&self, what: &str, cancel: &CancellationToken, mut op: F) -> Retried<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Retried::Cancelled;
            }
            let result = tokio::select! {
                _ = cancel.cancelled() => return Retried::Cancelled,
                result = op() => result,
            };
            match result {
                Err(err) if err.is_transient() && attempt + 1 < attempts => {
                    let delay = self.backoff(attempt);
                    warn!(%what, attempt = attempt + 1, ?delay, error = %err, "transient store failure; retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Retried::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                other => return Retried::Done(other),
            }
        }
    }
}
