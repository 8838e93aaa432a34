//! Named limiters, one per protected resource.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use super::clock::{Clock, MonotonicClock};
use super::limiter::{LimiterStatus, RateLimiter};
use crate::config::LimiterConfig;
use crate::error::{Result, SluiceError};

/// The set of limiters built at startup.
///
/// Constructed once from configuration and handed to whatever needs to
/// guard an upstream call. Limiters are shared by `Arc`.
#[derive(Debug, Default)]
pub struct LimiterRegistry {
    limiters: DashMap<String, Arc<RateLimiter>>,
}

impl LimiterRegistry {
    /// Build one limiter per entry, all driven by the system clock.
    pub fn from_config(configs: &[LimiterConfig]) -> Result<Self> {
        Self::with_clock(configs, Arc::new(MonotonicClock::new()))
    }

    /// Build one limiter per entry, all sharing `clock`.
    pub fn with_clock(configs: &[LimiterConfig], clock: Arc<dyn Clock>) -> Result<Self> {
        let registry = Self::default();
        for config in configs {
            registry.insert(RateLimiter::with_clock(config.clone(), clock.clone())?)?;
        }

        info!(count = registry.len(), "Rate limiters initialized");
        Ok(registry)
    }

    /// Add a limiter. Names must be unique.
    pub fn insert(&self, limiter: RateLimiter) -> Result<Arc<RateLimiter>> {
        use dashmap::mapref::entry::Entry;

        match self.limiters.entry(limiter.name().to_string()) {
            Entry::Occupied(entry) => Err(SluiceError::Config(format!(
                "duplicate limiter name: {}",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                let limiter = Arc::new(limiter);
                entry.insert(limiter.clone());
                Ok(limiter)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.get(name).map(|entry| entry.value().clone())
    }

    /// Like [`get`](Self::get), but a missing name is an error.
    pub fn require(&self, name: &str) -> Result<Arc<RateLimiter>> {
        self.get(name)
            .ok_or_else(|| SluiceError::UnknownLimiter(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.limiters.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Clear every limiter's admissions.
    pub fn reset_all(&self) {
        for entry in self.limiters.iter() {
            entry.value().reset();
        }
    }

    /// Status of every limiter, sorted by name.
    pub fn snapshot(&self) -> Vec<LimiterStatus> {
        let mut statuses: Vec<LimiterStatus> =
            self.limiters.iter().map(|e| e.value().status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}
