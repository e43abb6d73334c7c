//! Synthetic workload for exercising a retry policy.
//!
//! A [`FlakyUpstream`] answers the first few attempts of every request with
//! HTTP 429 and then succeeds, which is enough to watch admission, backoff and
//! Retry-After handling end to end without a real server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::governor::{ApiError, RequestGovernor, RetryOptions};

/// Something a simulated call talks to.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Handle one attempt of request `request_id`.
    async fn call(&self, request_id: usize) -> Result<String, ApiError>;
}

/// Behavior of a [`FlakyUpstream`].
#[derive(Debug, Clone, Default)]
pub struct UpstreamBehavior {
    /// Attempts per request answered with 429 before succeeding
    pub rate_limited_attempts: u32,
    /// Retry-After value sent with each 429
    pub retry_after: Option<String>,
    /// Every n-th request fails with a 404 instead
    pub not_found_every: Option<usize>,
    /// Time spent handling each attempt
    pub latency: Duration,
}

/// In-process upstream that rate-limits, then succeeds.
pub struct FlakyUpstream {
    behavior: UpstreamBehavior,
    attempts: Mutex<HashMap<usize, u32>>,
}

impl FlakyUpstream {
    /// Create an upstream that has seen no requests yet.
    pub fn new(behavior: UpstreamBehavior) -> Self {
        Self {
            behavior,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Attempts seen so far for `request_id`.
    pub fn attempts(&self, request_id: usize) -> u32 {
        self.attempts.lock().get(&request_id).copied().unwrap_or(0)
    }

    fn record_attempt(&self, request_id: usize) -> u32 {
        let mut attempts = self.attempts.lock();
        let seen = attempts.entry(request_id).or_insert(0);
        *seen += 1;
        *seen
    }
}

#[async_trait]
impl Upstream for FlakyUpstream {
    async fn call(&self, request_id: usize) -> Result<String, ApiError> {
        let attempt = self.record_attempt(request_id);

        if !self.behavior.latency.is_zero() {
            sleep(self.behavior.latency).await;
        }

        if let Some(every) = self.behavior.not_found_every {
            if every > 0 && (request_id + 1) % every == 0 {
                return Err(ApiError::new("Not Found").with_response_status(404));
            }
        }

        if attempt <= self.behavior.rate_limited_attempts {
            let mut error = ApiError::too_many_requests();
            if let Some(retry_after) = &self.behavior.retry_after {
                error = error.with_retry_after(retry_after.clone());
            }
            return Err(error);
        }

        Ok(format!("request {} served on attempt {}", request_id, attempt))
    }
}

/// Attempt and concurrency counters kept while a simulation runs.
#[derive(Default)]
struct AttemptTracker {
    total: AtomicU64,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl AttemptTracker {
    async fn observe<U: Upstream + ?Sized>(&self, upstream: &U, request_id: usize) -> Result<String, ApiError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_in_flight, Ordering::SeqCst);

        let outcome = upstream.call(request_id).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Summary of a simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationReport {
    /// Requests issued
    pub calls: usize,
    /// Requests that eventually succeeded
    pub succeeded: usize,
    /// Requests that ended in an error
    pub failed: usize,
    /// Upstream attempts across all requests, retries included
    pub total_attempts: u64,
    /// Highest number of upstream attempts in progress at once
    pub peak_concurrency: usize,
    /// Wall-clock duration of the run
    pub elapsed_ms: u64,
}

/// Issue `calls` requests at once through `governor` and wait for all of them.
pub async fn run_simulation<U: Upstream + ?Sized>(
    governor: &RequestGovernor,
    upstream: &U,
    calls: usize,
    options: &RetryOptions,
) -> SimulationReport {
    info!(
        calls,
        max_concurrent = options.max_concurrent,
        retries = options.retries,
        "Starting simulation"
    );
    let started = Instant::now();
    let tracker = AttemptTracker::default();
    let tracker = &tracker;

    let outcomes = join_all((0..calls).map(|request_id| {
        governor.execute(move || tracker.observe(upstream, request_id), options)
    }))
    .await;

    let mut succeeded = 0;
    for (request_id, outcome) in outcomes.iter().enumerate() {
        match outcome {
            Ok(_) => succeeded += 1,
            Err(e) => debug!(request_id, error = %e, "Simulated request failed"),
        }
    }

    let report = SimulationReport {
        calls,
        succeeded,
        failed: calls - succeeded,
        total_attempts: tracker.total.load(Ordering::SeqCst),
        peak_concurrency: tracker.peak.load(Ordering::SeqCst),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        attempts = report.total_attempts,
        elapsed_ms = report.elapsed_ms,
        "Simulation finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::RateLimitSignal;

    fn options(max_concurrent: usize) -> RetryOptions {
        RetryOptions::default()
            .base_delay(Duration::from_millis(10))
            .jitter(false)
            .initial_stagger(false)
            .max_concurrent(max_concurrent)
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_rate_limits_then_succeeds() {
        let upstream = FlakyUpstream::new(UpstreamBehavior {
            rate_limited_attempts: 2,
            ..Default::default()
        });

        assert_eq!(upstream.call(0).await.unwrap_err().status_code(), Some(429));
        assert!(upstream.call(0).await.is_err());
        assert!(upstream.call(0).await.is_ok());
        assert!(upstream.call(1).await.is_err());
        assert_eq!(upstream.attempts(0), 3);
        assert_eq!(upstream.attempts(1), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_sends_retry_after() {
        let upstream = FlakyUpstream::new(UpstreamBehavior {
            rate_limited_attempts: 1,
            retry_after: Some("3".to_string()),
            ..Default::default()
        });

        let error = upstream.call(0).await.unwrap_err();
        assert_eq!(error.retry_after(), Some("3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_all_recover() {
        let governor = RequestGovernor::new();
        let upstream = FlakyUpstream::new(UpstreamBehavior {
            rate_limited_attempts: 1,
            latency: Duration::from_millis(5),
            ..Default::default()
        });

        let report = run_simulation(&governor, &upstream, 6, &options(2)).await;

        assert_eq!(report.calls, 6);
        assert_eq!(report.succeeded, 6);
        assert_eq!(report.failed, 0);
        assert_eq!(report.total_attempts, 12);
        assert_eq!(report.peak_concurrency, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_counts_failures() {
        let governor = RequestGovernor::new();
        let upstream = FlakyUpstream::new(UpstreamBehavior {
            not_found_every: Some(3),
            ..Default::default()
        });

        let report = run_simulation(&governor, &upstream, 6, &options(3)).await;

        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed, 2);
        assert_eq!(report.total_attempts, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_exhausts_retries() {
        let governor = RequestGovernor::new();
        let upstream = FlakyUpstream::new(UpstreamBehavior {
            rate_limited_attempts: 10,
            ..Default::default()
        });

        let report = run_simulation(&governor, &upstream, 2, &options(1).retries(2)).await;

        assert_eq!(report.failed, 2);
        assert_eq!(report.total_attempts, 6);
        assert_eq!(governor.stats().running, 0);
    }

    struct CountingUpstream {
        served: AtomicU64,
    }

    #[async_trait]
    impl Upstream for CountingUpstream {
        async fn call(&self, request_id: usize) -> Result<String, ApiError> {
            self.served.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(1)).await;
            Ok(request_id.to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_accepts_any_upstream() {
        let governor = RequestGovernor::new();
        let upstream = CountingUpstream {
            served: AtomicU64::new(0),
        };

        let report = run_simulation(&governor, &upstream, 4, &options(2)).await;

        assert_eq!(report.succeeded, 4);
        assert_eq!(report.total_attempts, 4);
        assert_eq!(report.peak_concurrency, 2);
        assert_eq!(upstream.served.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_through_trait_object() {
        let governor = RequestGovernor::new();
        let upstream: Box<dyn Upstream> = Box::new(FlakyUpstream::new(UpstreamBehavior {
            rate_limited_attempts: 1,
            ..Default::default()
        }));

        let report = run_simulation(&governor, upstream.as_ref(), 3, &options(1)).await;

        assert_eq!(report.succeeded, 3);
        assert_eq!(report.total_attempts, 6);
    }
}
