//! Retry scheduling.
//!
//! The delay grows linearly with the number of failed attempts:
//! `delay = retry_count * base_delay`. Older documentation of this relay
//! describes the schedule as exponential; the implemented behaviour has
//! always been linear and is kept as such.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Delay before the next attempt after `retry_count` failures.
#[must_use]
pub fn backoff(retry_count: u32, base_delay: Duration) -> Duration {
    base_delay.saturating_mul(retry_count)
}

/// The instant at which a message that has failed `retry_count` times may be
/// picked up again.
#[must_use]
pub fn next_attempt_at(
    now: DateTime<Utc>,
    retry_count: u32,
    base_delay: Duration,
) -> DateTime<Utc> {
    let delay = TimeDelta::from_std(backoff(retry_count, base_delay)).unwrap_or(TimeDelta::MAX);
    now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
