//! Sluice - Sliding-Window Rate Limiting
//!
//! This crate provides named, in-process rate limiters that gate calls to
//! rate-constrained external APIs. Each limiter tracks the timestamps of
//! admitted requests over a sliding window and offers both a non-blocking
//! check and a waiting acquire.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use config::{LimiterConfig, SluiceConfig};
pub use error::{Result, SluiceError};
pub use ratelimit::{LimiterRegistry, RateLimiter};
