//! Retry scheduling with exponential backoff
//!
//! Both the email dispatcher and the webhook worker reschedule temporary
//! failures with the same curve:
//!
//! `delay = min(base * 2^(attempt - 1), max_delay) * (1 ± jitter)`
//!
//! Attempts are 1-indexed, so the first retry waits roughly `base` seconds.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;

/// Calculate the backoff delay for a retry attempt.
///
/// # Arguments
/// * `attempt` - The attempt number being scheduled (1-indexed)
/// * `base_delay_secs` - Base delay in seconds
/// * `max_delay_secs` - Ceiling applied before jitter
/// * `jitter_factor` - Random spread (e.g. 0.2 for ±20%)
pub fn backoff_delay(
    attempt: u32,
    base_delay_secs: u64,
    max_delay_secs: u64,
    jitter_factor: f64,
) -> Duration {
    // Saturating operations keep absurd attempt counts from overflowing
    let exponent = attempt.saturating_sub(1);
    let delay = if exponent >= 63 {
        // 2^63 would overflow, use max_delay directly
        max_delay_secs
    } else {
        let multiplier = 1u64 << exponent; // 2^exponent
        base_delay_secs
            .saturating_mul(multiplier)
            .min(max_delay_secs)
    };

    // Apply jitter: delay * (1 ± jitter_factor)
    // Intentional precision loss and casting for randomization
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let jittered_delay = {
        let jitter_range = (delay as f64) * jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        ((delay as f64) + jitter).max(0.0) as u64
    };

    Duration::from_secs(jittered_delay)
}

/// Calculate the timestamp at which a retry attempt becomes due.
pub fn next_retry_at(
    now: DateTime<Utc>,
    attempt: u32,
    base_delay_secs: u64,
    max_delay_secs: u64,
    jitter_factor: f64,
) -> DateTime<Utc> {
    let delay = backoff_delay(attempt, base_delay_secs, max_delay_secs, jitter_factor);
    let delta = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);

    now.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Backoff parameters for one class of retried work.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub jitter_factor: f64,
}

impl RetryPolicy {
    /// The delay before `attempt` (1-indexed) becomes due.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        backoff_delay(
            attempt,
            self.base_delay_secs,
            self.max_delay_secs,
            self.jitter_factor,
        )
    }

    /// The timestamp at which `attempt` (1-indexed) becomes due.
    #[must_use]
    pub fn next_retry_at(&self, now: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
        next_retry_at(
            now,
            attempt,
            self.base_delay_secs,
            self.max_delay_secs,
            self.jitter_factor,
        )
    }
}
