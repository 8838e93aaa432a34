//! Sliding-window rate limiting.

mod clock;
mod guard;
mod limiter;
mod registry;
mod window;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use limiter::{LimiterStatus, RateLimiter, ACQUIRE_SLACK_MS, DEFAULT_NAME};
pub use registry::LimiterRegistry;
pub use window::SlidingWindow;
