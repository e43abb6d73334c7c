//! Concurrency-limited retry executor for outbound API calls.

mod backoff;
mod classify;
mod executor;
mod options;
mod slots;

pub use backoff::{backoff_delay, initial_stagger};
pub use classify::{
    classify_error, classify_error_at, parse_retry_after, ApiError, ApiResponse, ErrorClass,
    RateLimitSignal, TOO_MANY_REQUESTS,
};
pub use executor::RequestGovernor;
pub use options::{
    RetryOptions, DEFAULT_BASE_DELAY, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_DELAY, DEFAULT_RETRIES,
};
pub use slots::GovernorStats;
