//! Exponential backoff between retry attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Capped exponential backoff: `min(base * 2^attempt, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    /// Delay before the first retry (in milliseconds).
    ///
    /// Default: 1000
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single delay (in milliseconds).
    ///
    /// Default: 5000
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay_ms: defaults::base_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
        }
    }
}

impl Backoff {
    /// Delay to wait after the zero-indexed `attempt` failed.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let millis = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);

        Duration::from_millis(millis)
    }
}

mod defaults {
    pub const fn base_delay_ms() -> u64 {
        1000
    }

    pub const fn max_delay_ms() -> u64 {
        5000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_capped() {
        let backoff = Backoff::default();

        assert_eq!(backoff.delay(0), Duration::from_millis(1000));
        assert_eq!(backoff.delay(1), Duration::from_millis(2000));
        assert_eq!(backoff.delay(2), Duration::from_millis(4000));
        assert_eq!(backoff.delay(3), Duration::from_millis(5000));
        assert_eq!(backoff.delay(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_backoff_does_not_overflow() {
        let backoff = Backoff {
            base_delay_ms: u64::MAX / 2,
            max_delay_ms: u64::MAX,
        };

        assert_eq!(backoff.delay(64), Duration::from_millis(u64::MAX));
        assert_eq!(backoff.delay(200), Duration::from_millis(u64::MAX));
    }
}
