//! Time sources for rate limiters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;

/// A source of "now" plus the ability to wait.
///
/// Limiters read time and suspend only through this trait, which lets tests
/// drive them with simulated time.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;

    /// Suspend the caller until `now_ms()` reaches `deadline_ms`.
    async fn sleep_until(&self, deadline_ms: u64);
}

/// Wall-clock anchored, monotonic clock.
///
/// The epoch reading is taken once at construction; afterwards time advances
/// with `tokio::time::Instant`, so it never steps backwards and follows
/// tokio's paused time in tests.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    anchor_ms: u64,
    anchor: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            anchor_ms: Utc::now().timestamp_millis().max(0) as u64,
            anchor: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.anchor_ms + self.anchor.elapsed().as_millis() as u64
    }

    async fn sleep_until(&self, deadline_ms: u64) {
        let offset = Duration::from_millis(deadline_ms.saturating_sub(self.anchor_ms));
        tokio::time::sleep_until(self.anchor + offset).await;
    }
}

/// A clock that only moves when told to.
///
/// `sleep_until` moves the clock forward to the deadline instead of waiting,
/// so simulations finish instantly while still observing the delays.
/// Sleepers with the same deadline overlap the way they would in real time.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep_until(&self, deadline_ms: u64) {
        self.now.fetch_max(deadline_ms, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }
}
