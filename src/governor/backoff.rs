//! Delay computation for the initial stagger and exponential backoff.

use std::time::Duration;

use rand::Rng;

use super::options::RetryOptions;

/// Minimum initial stagger before the first attempt.
const STAGGER_FLOOR_MS: u64 = 80;
/// Width of the random band added on top of the stagger floor.
const STAGGER_SPREAD_MS: u64 = 200;
/// Jitter scales the backoff by a factor drawn from this range.
const JITTER_LOW: f64 = 0.7;
const JITTER_HIGH: f64 = 1.3;

/// Random delay inserted before the first attempt to spread out bursts.
pub fn initial_stagger() -> Duration {
    initial_stagger_with(&mut rand::thread_rng())
}

pub(crate) fn initial_stagger_with<R: Rng>(rng: &mut R) -> Duration {
    Duration::from_millis(STAGGER_FLOOR_MS + rng.gen_range(0..STAGGER_SPREAD_MS))
}

/// Backoff before the retry that follows the failed `attempt` (0-based).
///
/// `min(base_delay * 2^attempt, max_delay)`, scaled by a random factor in
/// `[0.7, 1.3]` and rounded to whole milliseconds when jitter is enabled.
pub fn backoff_delay(attempt: u32, options: &RetryOptions) -> Duration {
    backoff_delay_with(attempt, options, &mut rand::thread_rng())
}

pub(crate) fn backoff_delay_with<R: Rng>(
    attempt: u32,
    options: &RetryOptions,
    rng: &mut R,
) -> Duration {
    let clamped = clamped_backoff_ms(attempt, options);
    if !options.jitter {
        return Duration::from_millis(clamped);
    }

    let factor = rng.gen_range(JITTER_LOW..=JITTER_HIGH);
    Duration::from_millis((clamped as f64 * factor).round() as u64)
}

fn clamped_backoff_ms(attempt: u32, options: &RetryOptions) -> u64 {
    let base = duration_ms(options.base_delay);
    let max = duration_ms(options.max_delay);
    let multiplier = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    base.saturating_mul(multiplier).min(max)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
