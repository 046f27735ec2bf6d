//! Retry policy for transient apply failures.
//!
//! The schedule is `backoff_multiplier ^ retry_count` seconds after the
//! failure that incremented `retry_count`: with a multiplier of 3 the delays
//! run 3s, 9s, 27s. Exceeding `max_retries` is terminal — the update goes to
//! `failed` and is never retried automatically.

use chrono::{DateTime, Duration, Utc};

use tug_common::entities::Update;
use tug_common::errors::ApplyError;

/// What the orchestrator should do with a failed apply attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Transient and under budget: retry at the given instant.
    Retry { next_retry_at: DateTime<Utc> },
    /// Transient but the retry budget is spent, or fatal: mark failed.
    GiveUp,
}

/// Classify a failed attempt for an update whose `retry_count` has NOT yet
/// been incremented for this failure.
pub fn disposition(update: &Update, error: &ApplyError, now: DateTime<Utc>) -> FailureDisposition {
    if !error.is_transient() {
        return FailureDisposition::GiveUp;
    }
    let attempt = update.retry_count + 1;
    if attempt > update.max_retries {
        return FailureDisposition::GiveUp;
    }
    FailureDisposition::Retry {
        next_retry_at: now + backoff_delay(update.backoff_multiplier, attempt),
    }
}

/// Delay before retry number `attempt` (1-based): `multiplier ^ attempt`
/// seconds, saturating instead of overflowing for absurd inputs.
pub fn backoff_delay(multiplier: u32, attempt: u32) -> Duration {
    let secs = (multiplier as i64)
        .checked_pow(attempt)
        .unwrap_or(i64::MAX / 1000);
    Duration::seconds(secs)
}
