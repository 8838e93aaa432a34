//! Sliding window of admission timestamps.

use std::collections::VecDeque;

/// The timestamps admitted within the last `window_ms` milliseconds.
///
/// This type holds no clock and no lock: every operation takes `now`
/// explicitly, and callers are expected to serialize access. Timestamps are
/// milliseconds since the Unix epoch, stored oldest first.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    /// Maximum admissions allowed inside one window
    max_requests: u32,
    /// Look-back length in milliseconds
    window_ms: u64,
    /// Admitted timestamps, ascending
    requests: VecDeque<u64>,
}

impl SlidingWindow {
    /// Create an empty window.
    pub fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
            requests: VecDeque::new(),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Drop every timestamp that has aged out of the window.
    ///
    /// An entry survives while `now - ts < window_ms`, so an entry exactly
    /// `window_ms` old is dropped.
    pub fn purge(&mut self, now: u64) {
        while let Some(&oldest) = self.requests.front() {
            if now.saturating_sub(oldest) < self.window_ms {
                break;
            }
            self.requests.pop_front();
        }
    }

    /// Record an admission at `now` if the window has room.
    ///
    /// Returns `false` without recording when the window is full.
    pub fn try_record(&mut self, now: u64) -> bool {
        self.purge(now);
        if self.is_full() {
            return false;
        }
        self.requests.push_back(now);
        true
    }

    /// How long until the oldest entry leaves the window, if the window is full.
    ///
    /// Returns `None` when an admission would succeed right now.
    pub fn wait_hint(&mut self, now: u64) -> Option<u64> {
        self.purge(now);
        if self.is_full() {
            Some(self.until_oldest_expires(now))
        } else {
            None
        }
    }

    /// Admissions still available in the current window.
    pub fn remaining(&mut self, now: u64) -> u32 {
        self.purge(now);
        self.max_requests.saturating_sub(self.requests.len() as u32)
    }

    /// Milliseconds until the oldest entry expires, or 0 if the window is empty.
    pub fn time_until_reset(&mut self, now: u64) -> u64 {
        self.purge(now);
        self.until_oldest_expires(now)
    }

    /// Number of timestamps currently inside the window.
    pub fn active(&mut self, now: u64) -> usize {
        self.purge(now);
        self.requests.len()
    }

    /// Forget every admission.
    pub fn clear(&mut self) {
        self.requests.clear();
    }

    fn is_full(&self) -> bool {
        self.requests.len() >= self.max_requests as usize
    }

    fn until_oldest_expires(&self, now: u64) -> u64 {
        match self.requests.front() {
            Some(&oldest) => self.window_ms.saturating_sub(now.saturating_sub(oldest)),
            None => 0,
        }
    }
}
