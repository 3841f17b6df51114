// Exponential backoff with deterministic jitter.

use std::time::Duration;

use crate::config::BackoffConfig;

/// Delay before retry number `attempt` (zero-based).
///
/// The base doubles per attempt and is capped at `max_delay`; a jitter
/// factor in `[0.75, 1.25]` seeded from the attempt number spreads
/// concurrent retriers apart without a random source.
pub fn calculate_backoff(attempt: u32, config: &BackoffConfig) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX).min(62);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

/// Honour a server retry hint when it asks for longer than our own schedule.
pub fn throttle_delay(
    attempt: u32,
    retry_after: Option<Duration>,
    config: &BackoffConfig,
) -> Duration {
    let ours = calculate_backoff(attempt, config);
    retry_after.map_or(ours, |hint| hint.max(ours))
}
