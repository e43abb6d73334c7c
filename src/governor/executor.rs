//! The request governor: admission control plus rate-limit retries.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, trace, warn};

use super::backoff::{backoff_delay, initial_stagger};
use super::classify::{classify_error, ErrorClass, RateLimitSignal};
use super::options::RetryOptions;
use super::slots::{GovernorStats, SlotPool};

static SHARED: OnceLock<RequestGovernor> = OnceLock::new();

/// Runs tasks under a bounded number of concurrent slots and retries them
/// when they fail with a rate-limit error.
///
/// Each instance owns its own slot pool. Cloning a governor shares the pool.
///
/// Tasks may be invoked more than once, so they must tolerate repetition
/// (idempotent reads, or writes the server deduplicates).
#[derive(Clone)]
pub struct RequestGovernor {
    pool: Arc<SlotPool>,
}

impl RequestGovernor {
    /// Create a governor with an empty slot pool.
    pub fn new() -> Self {
        Self {
            pool: Arc::new(SlotPool::new()),
        }
    }

    /// Process-wide governor for call sites that deliberately share one pool.
    ///
    /// Callers sharing it should agree on `max_concurrent`; a caller asking for
    /// a lower limit only gets in when the running count is below that limit.
    /// A caller with a higher limit still waits behind anyone already queued.
    pub fn shared() -> &'static RequestGovernor {
        SHARED.get_or_init(RequestGovernor::new)
    }

    /// Current slot usage.
    pub fn stats(&self) -> GovernorStats {
        self.pool.stats()
    }

    /// Run `task` with the default options.
    pub async fn execute_default<T, E, F, Fut>(&self, task: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimitSignal,
    {
        self.execute(task, &RetryOptions::default()).await
    }

    /// Run `task` once a slot is free, retrying rate-limit failures.
    ///
    /// The slot is held from admission until the call settles, across every
    /// retry. Non-rate-limit errors are returned on first occurrence; a
    /// rate-limit error is returned once `options.retries` retries are spent.
    /// Errors are returned exactly as the task produced them.
    pub async fn execute<T, E, F, Fut>(&self, mut task: F, options: &RetryOptions) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimitSignal,
    {
        let _slot = self.pool.acquire(options.max_concurrent).await;

        if options.initial_stagger {
            let stagger = initial_stagger();
            trace!(stagger_ms = stagger.as_millis() as u64, "Staggering first attempt");
            sleep(stagger).await;
        }

        let mut attempt: u32 = 0;
        loop {
            let error = match task().await {
                Ok(value) => {
                    trace!(attempt, "Task succeeded");
                    return Ok(value);
                }
                Err(error) => error,
            };

            let delay = match next_delay(&error, attempt, options) {
                Some(delay) => delay,
                None => return Err(error),
            };
            drop(error);

            sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RequestGovernor {
    fn default() -> Self {
        Self::new()
    }
}

/// Decide how long to wait before retrying, or `None` if `error` is terminal.
fn next_delay<E: RateLimitSignal>(error: &E, attempt: u32, options: &RetryOptions) -> Option<Duration> {
    let retry_after = match classify_error(error) {
        ErrorClass::Other => {
            debug!(attempt, error = %error.message(), "Task failed, not retrying");
            return None;
        }
        ErrorClass::RateLimited { retry_after } => retry_after,
    };

    if attempt >= options.retries {
        warn!(
            attempts = attempt + 1,
            error = %error.message(),
            "Rate limited, retries exhausted"
        );
        return None;
    }

    let delay = match retry_after {
        Some(wait) => {
            debug!(attempt, delay_ms = wait.as_millis() as u64, "Rate limited, honoring Retry-After");
            wait
        }
        None => {
            let wait = backoff_delay(attempt, options);
            debug!(attempt, delay_ms = wait.as_millis() as u64, "Rate limited, backing off");
            wait
        }
    };
    Some(delay)
}
