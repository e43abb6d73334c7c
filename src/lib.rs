//! Request Governor - concurrency-limited retries for outbound API calls
//!
//! This crate runs caller-supplied async tasks under a bounded number of
//! admission slots, retrying tasks that fail with a rate-limit signal (HTTP
//! 429) using exponential backoff or the server's Retry-After hint. All other
//! failures are returned to the caller untouched.

pub mod config;
pub mod error;
pub mod governor;
pub mod simulate;
pub mod telemetry;

pub use governor::{
    classify_error, ApiError, ErrorClass, GovernorStats, RateLimitSignal, RequestGovernor,
    RetryOptions,
};
