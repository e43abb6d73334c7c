//! Per-call retry and admission options.

use std::time::Duration;

use crate::error::{GovernorError, Result};

/// Default number of retries after the first attempt.
pub const DEFAULT_RETRIES: u32 = 4;
/// Default base delay for exponential backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
/// Default ceiling for the computed backoff, applied before jitter.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(15_000);
/// Default number of concurrently executing tasks.
pub const DEFAULT_MAX_CONCURRENT: usize = 1;

/// Options controlling a single `execute` call.
///
/// Every field has a default, so callers usually start from
/// `RetryOptions::default()` and override what they need:
///
/// ```
/// use std::time::Duration;
/// use request_governor::RetryOptions;
///
/// let options = RetryOptions::default()
///     .retries(2)
///     .base_delay(Duration::from_millis(800))
///     .initial_stagger(false);
/// assert_eq!(options.retries, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOptions {
    /// Retries allowed after the first attempt (total attempts = retries + 1)
    pub retries: u32,
    /// Base for exponential backoff
    pub base_delay: Duration,
    /// Upper clamp on the computed backoff before jitter
    pub max_delay: Duration,
    /// Scale backoff by a random factor in `[0.7, 1.3]`
    pub jitter: bool,
    /// Maximum number of tasks executing at once in the governor's pool
    pub max_concurrent: usize,
    /// Sleep 80..280 ms before the first attempt
    pub initial_stagger: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            initial_stagger: true,
        }
    }
}

impl RetryOptions {
    /// Retries allowed after the first attempt.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Base for exponential backoff.
    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Ceiling for the computed backoff, applied before jitter.
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Enable or disable backoff jitter.
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Maximum tasks executing at once in the pool.
    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Enable or disable the randomized delay before the first attempt.
    pub fn initial_stagger(mut self, initial_stagger: bool) -> Self {
        self.initial_stagger = initial_stagger;
        self
    }

    /// Check the options for values that can never make progress.
    ///
    /// A `base_delay` larger than `max_delay` is accepted; the clamp applies.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(GovernorError::InvalidOptions(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
