//! Wrapping calls to rate-limited services.
//!
//! Callers pick the policy: [`RateLimiter::run`] waits for a slot,
//! [`RateLimiter::try_run`] fails fast with [`SluiceError::RateLimited`].

use std::future::Future;

use tracing::debug;

use super::limiter::RateLimiter;
use crate::error::{Result, SluiceError};

impl RateLimiter {
    /// Wait for admission, then run `f`.
    pub async fn run<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire().await;
        f().await
    }

    /// Run `f` only if a slot is free right now.
    ///
    /// When the limiter is full, `f` is not called and the error carries how
    /// long until the oldest admission expires.
    pub async fn try_run<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.check() {
            let retry_after = self.time_until_reset();
            debug!(
                limiter = %self.name(),
                retry_after_ms = retry_after.as_millis() as u64,
                "Rejecting guarded call"
            );
            return Err(SluiceError::RateLimited {
                limiter: self.name().to_string(),
                retry_after,
            });
        }
        Ok(f().await)
    }
}
