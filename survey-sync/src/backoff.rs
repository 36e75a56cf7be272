//! Retry scheduling for failed queue entries

use std::time::Duration;

/// Exponential backoff with a cap, plus the attempt count at which a
/// record is flagged as error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Consecutive failures before the record's status becomes `error`
    pub error_threshold: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            max: Duration::from_secs(3600),
            error_threshold: 5,
        }
    }
}

impl RetryPolicy {
    /// Retries are immediate and the record is never flagged
    pub fn immediate() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
            error_threshold: u32::MAX,
        }
    }

    /// Delay before the next attempt after `attempts` failures:
    /// `base * 2^(attempts - 1)`, capped at `max`
    pub fn delay_for(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempts - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Earliest retry time in milliseconds
    pub fn next_attempt_at(&self, now_millis: i64, attempts: u32) -> i64 {
        let delay = i64::try_from(self.delay_for(attempts).as_millis()).unwrap_or(i64::MAX);
        now_millis.saturating_add(delay)
    }

    pub fn exceeds_threshold(&self, attempts: u32) -> bool {
        attempts >= self.error_threshold
    }
}
