//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::clock::{Clock, MonotonicClock};
use super::window::SlidingWindow;
use crate::config::LimiterConfig;
use crate::error::{Result, SluiceError};

/// Name used when a limiter is configured without one.
pub const DEFAULT_NAME: &str = "RateLimiter";

/// Extra delay added to every computed wait in [`RateLimiter::acquire`], so a
/// waiter never re-contends at the exact millisecond an entry expires.
pub const ACQUIRE_SLACK_MS: u64 = 100;

/// A named sliding-window rate limiter guarding one external resource.
///
/// This struct is thread-safe and can be shared across multiple tasks. Every
/// operation purges, evaluates and records under a single lock acquisition,
/// so the budget holds even with parallel callers.
pub struct RateLimiter {
    /// Label for logs and lookups
    name: String,
    /// Admissions within the current window
    window: Mutex<SlidingWindow>,
    /// Time source
    clock: Arc<dyn Clock>,
}

/// Point-in-time view of a limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterStatus {
    pub name: String,
    pub max_requests: u32,
    pub window_ms: u64,
    pub active: usize,
    pub remaining: u32,
    pub reset_in_ms: u64,
}

impl RateLimiter {
    /// Create a limiter driven by the system clock.
    pub fn new(config: LimiterConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a limiter driven by the given clock.
    ///
    /// Fails with [`SluiceError::InvalidLimit`] if either `max_requests` or
    /// `window_ms` is zero.
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let name = config.effective_name().to_string();

        debug!(
            limiter = %name,
            max_requests = config.max_requests,
            window_ms = config.window_ms,
            "Creating rate limiter"
        );

        Ok(Self {
            name,
            window: Mutex::new(SlidingWindow::new(config.max_requests, config.window_ms)),
            clock,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_requests(&self) -> u32 {
        self.window.lock().max_requests()
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window.lock().window_ms())
    }

    /// Try to admit one request without waiting.
    ///
    /// Returns `true` and records the admission if the window has room,
    /// otherwise returns `false` and records nothing.
    pub fn check(&self) -> bool {
        let mut window = self.window.lock();
        let now = self.clock.now_ms();

        if window.try_record(now) {
            trace!(limiter = %self.name, now, "Request admitted");
            return true;
        }

        let count = window.active(now);
        let max = window.max_requests();
        drop(window);

        info!(
            limiter = %self.name,
            count = count,
            max_requests = max,
            "Rate limit exceeded"
        );
        false
    }

    /// Wait until a request can be admitted, then admit it.
    ///
    /// Never rejects. While the window is full the caller sleeps until the
    /// oldest entry expires plus [`ACQUIRE_SLACK_MS`], then re-evaluates from
    /// scratch. Dropping the returned future abandons the wait without
    /// recording anything.
    pub async fn acquire(&self) {
        self.admit_before(None).await;
    }

    /// Like [`acquire`](Self::acquire), but give up after `timeout`.
    ///
    /// The deadline is measured on the limiter's clock. Waits are cut short
    /// at the deadline; if the window is still full then, nothing is recorded
    /// and [`SluiceError::Timeout`] is returned.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<()> {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let deadline = self.clock.now_ms().saturating_add(timeout_ms);

        if self.admit_before(Some(deadline)).await {
            return Ok(());
        }

        warn!(
            limiter = %self.name,
            timeout_ms = timeout_ms,
            "Gave up waiting for rate limit"
        );
        Err(SluiceError::Timeout {
            limiter: self.name.clone(),
            waited: timeout,
        })
    }

    /// Admission loop shared by `acquire` and `acquire_timeout`.
    ///
    /// Returns `false` only when `deadline` is reached with the window full.
    async fn admit_before(&self, deadline: Option<u64>) -> bool {
        loop {
            let wake_at = {
                let mut window = self.window.lock();
                let now = self.clock.now_ms();

                match window.wait_hint(now) {
                    None => {
                        window.try_record(now);
                        trace!(limiter = %self.name, now, "Request admitted");
                        return true;
                    }
                    Some(until_expiry) => {
                        let retry_at = now + until_expiry + ACQUIRE_SLACK_MS;
                        match deadline {
                            Some(deadline) if now >= deadline => return false,
                            Some(deadline) => retry_at.min(deadline),
                            None => retry_at,
                        }
                    }
                }
            };

            info!(
                limiter = %self.name,
                wake_at = wake_at,
                "Rate limit reached, waiting"
            );
            self.clock.sleep_until(wake_at).await;
        }
    }

    /// Admissions still available in the current window.
    pub fn remaining(&self) -> u32 {
        let mut window = self.window.lock();
        window.remaining(self.clock.now_ms())
    }

    /// Time until the oldest admission leaves the window.
    ///
    /// Zero when nothing has been admitted within the window.
    pub fn time_until_reset(&self) -> Duration {
        let mut window = self.window.lock();
        Duration::from_millis(window.time_until_reset(self.clock.now_ms()))
    }

    /// Forget every admission. Configuration is unchanged.
    pub fn reset(&self) {
        self.window.lock().clear();
        info!(limiter = %self.name, "Rate limiter reset");
    }

    /// Snapshot of the limiter's state, taken under one lock acquisition.
    pub fn status(&self) -> LimiterStatus {
        let mut window = self.window.lock();
        let now = self.clock.now_ms();

        LimiterStatus {
            name: self.name.clone(),
            max_requests: window.max_requests(),
            window_ms: window.window_ms(),
            active: window.active(now),
            remaining: window.remaining(now),
            reset_in_ms: window.time_until_reset(now),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let window = self.window.lock();
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("max_requests", &window.max_requests())
            .field("window_ms", &window.window_ms())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;
    use tokio_test::{assert_pending, assert_ready};

    fn manual_limiter(max_requests: u32, window_ms: u64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::with_clock(
            LimiterConfig::new("test", max_requests, window_ms),
            clock.clone(),
        )
        .unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_rejects_zero_max_requests() {
        let err = RateLimiter::new(LimiterConfig::new("zero", 0, 1000)).unwrap_err();
        assert!(matches!(err, SluiceError::InvalidLimit { .. }));
    }

    #[test]
    fn test_rejects_zero_window() {
        let err = RateLimiter::new(LimiterConfig::new("zero", 5, 0)).unwrap_err();
        assert!(matches!(err, SluiceError::InvalidLimit { .. }));
    }

    #[test]
    fn test_empty_name_falls_back_to_default() {
        let limiter = RateLimiter::new(LimiterConfig::new("", 1, 1000)).unwrap();
        assert_eq!(limiter.name(), DEFAULT_NAME);
        assert_eq!(limiter.max_requests(), 1);
        assert_eq!(limiter.window(), Duration::from_secs(1));
    }

    #[test]
    fn test_check_sliding_window_scenario() {
        let (limiter, clock) = manual_limiter(2, 1000);

        assert!(limiter.check());
        clock.set(100);
        assert!(limiter.check());
        clock.set(200);
        assert!(!limiter.check());

        // The t=0 entry is purged; t=100 still counts
        clock.set(1001);
        assert!(limiter.check());
        assert!(!limiter.check());
    }

    #[test]
    fn test_rejected_check_does_not_consume() {
        let (limiter, clock) = manual_limiter(1, 1000);

        assert!(limiter.check());
        for t in [10, 500, 999] {
            clock.set(t);
            assert!(!limiter.check());
        }

        // Only the t=0 admission was recorded, so t=1000 is clear
        clock.set(1000);
        assert!(limiter.check());
    }

    #[test]
    fn test_remaining_tracks_active_admissions() {
        let (limiter, clock) = manual_limiter(3, 1000);

        assert_eq!(limiter.remaining(), 3);
        limiter.check();
        clock.set(300);
        limiter.check();
        assert_eq!(limiter.remaining(), 1);

        limiter.check();
        limiter.check();
        assert_eq!(limiter.remaining(), 0);

        clock.set(1000);
        assert_eq!(limiter.remaining(), 1);
        clock.set(1300);
        assert_eq!(limiter.remaining(), 3);
    }

    #[test]
    fn test_time_until_reset() {
        let (limiter, clock) = manual_limiter(2, 1000);

        assert_eq!(limiter.time_until_reset(), Duration::ZERO);

        clock.set(100);
        limiter.check();
        clock.set(400);
        limiter.check();

        assert_eq!(limiter.time_until_reset(), Duration::from_millis(700));
        clock.set(900);
        assert_eq!(limiter.time_until_reset(), Duration::from_millis(200));

        // Oldest expired; the next oldest (t=400) now governs
        clock.set(1100);
        assert_eq!(limiter.time_until_reset(), Duration::from_millis(300));

        clock.set(1400);
        assert_eq!(limiter.time_until_reset(), Duration::ZERO);
        assert_eq!(limiter.remaining(), 2);
    }

    #[test]
    fn test_reset_clears_state() {
        let (limiter, clock) = manual_limiter(2, 1000);

        limiter.check();
        limiter.check();
        clock.set(50);
        assert!(!limiter.check());

        limiter.reset();
        assert_eq!(limiter.remaining(), 2);
        assert_eq!(limiter.time_until_reset(), Duration::ZERO);
        assert!(limiter.check());
        assert_eq!(limiter.max_requests(), 2);
    }

    #[test]
    fn test_status_snapshot() {
        let (limiter, clock) = manual_limiter(5, 2000);

        limiter.check();
        clock.set(500);
        limiter.check();

        let status = limiter.status();
        assert_eq!(
            status,
            LimiterStatus {
                name: "test".to_string(),
                max_requests: 5,
                window_ms: 2000,
                active: 2,
                remaining: 3,
                reset_in_ms: 1500,
            }
        );
    }

    #[tokio::test]
    async fn test_acquire_immediate_when_under_limit() {
        let (limiter, clock) = manual_limiter(2, 1000);

        limiter.acquire().await;
        limiter.acquire().await;

        assert_eq!(clock.now_ms(), 0);
        assert_eq!(limiter.remaining(), 0);
    }

    #[tokio::test]
    async fn test_acquire_waits_window_plus_slack() {
        let (limiter, clock) = manual_limiter(1, 100);

        limiter.acquire().await;
        clock.set(10);
        limiter.acquire().await;

        // 100 - (10 - 0) + 100 slack
        assert_eq!(clock.now_ms(), 200);
        assert_eq!(limiter.remaining(), 0);
        assert_eq!(limiter.time_until_reset(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_acquire_records_on_resolution() {
        let (limiter, clock) = manual_limiter(2, 1000);

        limiter.check();
        clock.set(500);
        limiter.check();
        clock.set(600);

        limiter.acquire().await;

        // Waited until t=1100: t=0 expired, t=500 and t=1100 remain
        assert_eq!(clock.now_ms(), 1100);
        assert_eq!(limiter.status().active, 2);
        assert_eq!(limiter.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_stays_pending_until_deadline() {
        let limiter = RateLimiter::new(LimiterConfig::new("paused", 1, 100)).unwrap();

        limiter.acquire().await;
        tokio::time::advance(Duration::from_millis(10)).await;

        let mut waiter = tokio_test::task::spawn(limiter.acquire());
        assert_pending!(waiter.poll());

        // The waiter is due 190ms after it started
        tokio::time::advance(Duration::from_millis(179)).await;
        assert_pending!(waiter.poll());

        tokio::time::advance(Duration::from_millis(12)).await;
        assert_ready!(waiter.poll());
        drop(waiter);

        assert_eq!(limiter.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout_records_nothing() {
        let limiter = RateLimiter::new(LimiterConfig::new("slow", 1, 60_000)).unwrap();

        limiter.acquire().await;
        let err = limiter
            .acquire_timeout(Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, SluiceError::Timeout { ref limiter, .. } if limiter == "slow"));
        assert_eq!(limiter.status().active, 1);
    }

    #[tokio::test]
    async fn test_acquire_timeout_uses_limiter_clock() {
        let (limiter, clock) = manual_limiter(1, 60_000);

        limiter.acquire().await;
        let err = limiter
            .acquire_timeout(Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, SluiceError::Timeout { .. }));
        assert_eq!(clock.now_ms(), 1000);
        assert_eq!(limiter.status().active, 1);
    }

    #[tokio::test]
    async fn test_acquire_timeout_admits_when_slot_frees_in_time() {
        let (limiter, clock) = manual_limiter(1, 500);

        limiter.acquire().await;
        limiter
            .acquire_timeout(Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(clock.now_ms(), 600);
        assert_eq!(limiter.remaining(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_simulated_time() {
        let (limiter, clock) = manual_limiter(1, 1000);

        limiter.check();
        tokio::join!(limiter.acquire(), limiter.acquire());

        // Both waiters target t=1100; the second then waits out that admission
        assert_eq!(clock.now_ms(), 2200);
    }

    #[test]
    fn test_huge_budget_is_not_preallocated() {
        let limiter = RateLimiter::new(LimiterConfig::new("big", u32::MAX, 1000)).unwrap();

        assert!(limiter.check());
        assert_eq!(limiter.remaining(), u32::MAX - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout_succeeds_within_budget() {
        let limiter = RateLimiter::new(LimiterConfig::new("quick", 1, 500)).unwrap();

        limiter.acquire().await;
        limiter
            .acquire_timeout(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(limiter.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_respects_window() {
        let limiter = Arc::new(RateLimiter::new(LimiterConfig::new("shared", 2, 1000)).unwrap());
        let start = tokio::time::Instant::now();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire().await;
                    tokio::time::Instant::now()
                })
            })
            .collect();

        let mut admitted: Vec<Duration> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap().duration_since(start))
            .collect();
        admitted.sort();

        assert_eq!(admitted.len(), 6);
        // Any three consecutive admissions span at least one window
        for triple in admitted.windows(3) {
            assert!(triple[2] - triple[0] >= Duration::from_millis(1000));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_check_never_exceeds_budget() {
        let limiter = Arc::new(RateLimiter::new(LimiterConfig::new("race", 10, 60_000)).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { (0..50).filter(|_| limiter.check()).count() })
            })
            .collect();

        let admitted: usize = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .sum();

        assert_eq!(admitted, 10);
        assert_eq!(limiter.remaining(), 0);
    }
}
