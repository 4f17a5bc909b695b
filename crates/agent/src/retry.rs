//! Exponential backoff between retriable attempts.

use rand::Rng;
use std::time::Duration;

use scribeloop_core::task::RetryPolicy;

/// Delay before the next attempt, without jitter.
///
/// `retries_used` is the number of failed attempts so far (1 after the
/// first failure). The base delay doubles per retry and is capped.
pub fn backoff_delay(policy: &RetryPolicy, retries_used: u32) -> Duration {
    let base_ms = policy.base_delay.as_millis();
    if base_ms == 0 || retries_used == 0 {
        return Duration::ZERO;
    }
    let max_ms = policy.max_delay.as_millis().max(base_ms);
    let shift = (retries_used - 1).min(20);
    let backoff_ms = base_ms.saturating_mul(1u128 << shift).min(max_ms);
    Duration::from_millis(u64::try_from(backoff_ms).unwrap_or(u64::MAX))
}

/// Equal jitter: keep half the delay, randomize the other half.
pub fn with_jitter<R: Rng>(delay: Duration, rng: &mut R) -> Duration {
    let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if ms < 2 {
        return delay;
    }
    let half = ms / 2;
    Duration::from_millis(half + rng.random_range(0..=ms - half))
}

/// The delay the engine actually sleeps for.
pub fn next_delay(policy: &RetryPolicy, retries_used: u32) -> Duration {
    let delay = backoff_delay(policy, retries_used);
    if policy.jitter {
        with_jitter(delay, &mut rand::rng())
    } else {
        delay
    }
}
