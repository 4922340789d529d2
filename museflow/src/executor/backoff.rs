//! Inter-attempt delay computation.

use crate::config::StageRetryConfig;
use rand::Rng;
use std::time::Duration;

/// Computes the delay to sleep before attempt `attempt` (1-indexed).
///
/// The first attempt never waits. Attempt `n` waits
/// `initial_delay_ms * backoff_multiplier^(n - 2)` milliseconds, capped at
/// `max_delay_ms`, with optional full jitter.
#[must_use]
pub fn delay_before_attempt(attempt: u32, config: &StageRetryConfig) -> Duration {
    if attempt <= 1 {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
    let raw = config.initial_delay_ms as f64 * config.backoff_multiplier.powi(exponent);
    let capped = raw.min(config.max_delay_ms as f64).max(0.0);

    let millis = if config.jitter && capped > 0.0 {
        rand::thread_rng().gen_range(0.0..=capped)
    } else {
        capped
    };

    Duration::from_millis(millis as u64)
}
