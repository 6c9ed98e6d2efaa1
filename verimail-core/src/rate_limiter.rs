//! Admission control for bulk runs using the token bucket algorithm.
//!
//! Two independent scopes can be configured: a single global bucket, and one
//! bucket per recipient domain created on first use. Each bucket holds up to
//! `requests` tokens and refills continuously at `requests / window_secs`
//! tokens per second, so a drained bucket is full again after one window.
//!
//! ```text
//! Global limit: 3 requests / 60s
//! - Bucket starts with 3 tokens
//! - Tokens refill at 0.05/sec
//! - The fourth address in quick succession waits ceil(1 / 0.05) = 20s
//! ```

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use verimail_common::{Domain, ErrorKind, tracing};

use crate::config::ConfigError;

/// `requests` admissions per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    pub requests: u32,
    pub window_secs: u64,
}

impl RateWindow {
    fn validate(
        &self,
        requests_field: &'static str,
        window_field: &'static str,
    ) -> Result<(), ConfigError> {
        let positive = |field| ConfigError::Invalid {
            field,
            reason: "must be greater than 0".to_string(),
        };

        if self.requests == 0 {
            return Err(positive(requests_field));
        }

        if self.window_secs == 0 {
            return Err(positive(window_field));
        }

        Ok(())
    }
}

/// Configuration for rate limiting. A scope left as `None` is not limited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub global: Option<RateWindow>,
    pub per_domain: Option<RateWindow>,
}

impl RateLimitConfig {
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.global.is_some() || self.per_domain.is_some()
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a window has zero requests or zero
    /// length.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(global) = &self.global {
            global.validate("rate_limit.global.requests", "rate_limit.global.window_secs")?;
        }

        if let Some(per_domain) = &self.per_domain {
            per_domain.validate(
                "rate_limit.per_domain.requests",
                "rate_limit.per_domain.window_secs",
            )?;
        }

        Ok(())
    }
}

/// Token bucket for a single scope
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(window: RateWindow) -> Self {
        let capacity = f64::from(window.requests);
        #[allow(clippy::cast_precision_loss)]
        let window_secs = window.window_secs as f64;

        Self {
            tokens: capacity,
            capacity,
            refill_rate: capacity / window_secs,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = elapsed.mul_add(self.refill_rate, self.tokens).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes one token, or returns how long until one is available.
    fn try_consume(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            // Very long windows give waits beyond what `Duration` holds.
            let seconds = ((1.0 - self.tokens) / self.refill_rate).ceil();
            Err(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX))
        }
    }
}

/// Which bucket turned an address away.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitScope {
    Global,
    Domain(Domain),
}

impl fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Domain(domain) => write!(f, "per-domain ({domain})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Rate limit exceeded ({scope}), retry in {}s", .wait.as_secs())]
pub struct RateLimited {
    pub scope: RateLimitScope,
    /// Whole seconds until a token is available.
    pub wait: Duration,
}

impl RateLimited {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::RateLimitExceeded
    }
}

/// Global and per-domain rate limiter.
///
/// Each check locks one bucket at a time and refills and consumes under the
/// same lock, so concurrent checks never both spend the last token.
#[derive(Debug)]
pub struct RateLimiter {
    global: Option<Mutex<TokenBucket>>,
    per_domain: Option<RateWindow>,
    buckets: DashMap<Domain, Arc<Mutex<TokenBucket>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            global: config.global.map(|window| Mutex::new(TokenBucket::new(window))),
            per_domain: config.per_domain,
            buckets: DashMap::new(),
        }
    }

    fn bucket(&self, window: RateWindow, domain: &Domain) -> Arc<Mutex<TokenBucket>> {
        self.buckets
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(window))))
            .clone()
    }

    /// Admits or refuses one address.
    ///
    /// Addresses without a domain are always admitted; rejecting malformed
    /// input is the syntax validator's job. A token taken from the global
    /// bucket is kept even if the domain bucket then refuses the address.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimited`] naming the scope that refused the address and
    /// how long until it would admit one.
    pub fn check_admission(&self, email: &str) -> Result<(), RateLimited> {
        let Some(domain) = Domain::from_email(email) else {
            return Ok(());
        };

        if let Some(global) = &self.global {
            global.lock().try_consume().map_err(|wait| {
                tracing::debug!(
                    wait_seconds = wait.as_secs(),
                    "Global rate limit exceeded"
                );
                RateLimited {
                    scope: RateLimitScope::Global,
                    wait,
                }
            })?;
        }

        if let Some(window) = self.per_domain {
            let bucket = self.bucket(window, &domain);
            let consumed = bucket.lock().try_consume();

            consumed.map_err(|wait| {
                tracing::debug!(
                    domain = %domain,
                    wait_seconds = wait.as_secs(),
                    "Per-domain rate limit exceeded"
                );
                RateLimited {
                    scope: RateLimitScope::Domain(domain),
                    wait,
                }
            })?;
        }

        Ok(())
    }

    /// Current state of a bucket, refilled up to now.
    ///
    /// Returns `None` for an unconfigured scope, or for a domain that has not
    /// been seen yet.
    pub fn stats(&self, scope: &RateLimitScope) -> Option<RateLimitStats> {
        let read = |bucket: &Mutex<TokenBucket>| {
            let mut bucket = bucket.lock();
            bucket.refill();

            RateLimitStats {
                available_tokens: bucket.tokens,
                capacity: bucket.capacity,
                refill_rate: bucket.refill_rate,
            }
        };

        match scope {
            RateLimitScope::Global => self.global.as_ref().map(read),
            RateLimitScope::Domain(domain) => {
                self.buckets.get(domain).map(|bucket| read(&**bucket))
            }
        }
    }
}

/// Statistics for a single bucket
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    pub available_tokens: f64,
    pub capacity: f64,
    /// Tokens per second
    pub refill_rate: f64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const fn window(requests: u32, window_secs: u64) -> RateWindow {
        RateWindow {
            requests,
            window_secs,
        }
    }

    fn global(requests: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            global: Some(window(requests, window_secs)),
            per_domain: None,
        })
    }

    #[test]
    fn test_token_bucket_consume() {
        let mut bucket = TokenBucket::new(window(5, 10));
        assert!((bucket.refill_rate - 0.5).abs() < f64::EPSILON);

        for _ in 0..5 {
            assert!(bucket.try_consume().is_ok());
        }

        // Two seconds at 0.5 tokens per second buys the next token.
        assert_eq!(bucket.try_consume(), Err(Duration::from_secs(2)));
    }

    #[test]
    #[cfg_attr(miri, ignore = "Time-based test not compatible with Miri")]
    fn test_token_bucket_refills_after_window() {
        let mut bucket = TokenBucket::new(window(3, 60));
        for _ in 0..3 {
            bucket.try_consume().unwrap();
        }
        assert!(bucket.try_consume().is_err());

        bucket.last_refill = Instant::now().checked_sub(Duration::from_secs(60)).unwrap();
        bucket.refill();
        assert!((bucket.tokens - 3.0).abs() < 0.01);
    }

    #[test]
    #[cfg_attr(miri, ignore = "Time-based test not compatible with Miri")]
    fn test_partial_refill_is_fractional() {
        let mut bucket = TokenBucket::new(window(10, 10));
        for _ in 0..10 {
            bucket.try_consume().unwrap();
        }

        bucket.last_refill = Instant::now()
            .checked_sub(Duration::from_millis(500))
            .unwrap();
        bucket.refill();
        assert!(bucket.tokens > 0.45 && bucket.tokens < 0.6);
        assert_eq!(bucket.try_consume(), Err(Duration::from_secs(1)));
    }

    #[test]
    fn test_admissions_bounded_by_capacity() {
        let limiter = global(3, 60);

        let allowed = (0..5)
            .filter(|i| limiter.check_admission(&format!("user{i}@example.com")).is_ok())
            .count();
        assert_eq!(allowed, 3);

        let denied = limiter.check_admission("late@example.com").unwrap_err();
        assert_eq!(denied.scope, RateLimitScope::Global);
        assert_eq!(denied.wait, Duration::from_secs(20));
        assert_eq!(denied.kind(), ErrorKind::RateLimitExceeded);
    }

    #[test]
    fn test_long_window_denial_saturates_wait() {
        let config = RateLimitConfig {
            global: Some(window(1, u64::MAX)),
            per_domain: None,
        };
        assert!(config.validate().is_ok());

        let limiter = RateLimiter::new(&config);
        limiter.check_admission("a@example.com").unwrap();

        let denied = limiter.check_admission("b@example.com").unwrap_err();
        assert_eq!(denied.wait, Duration::MAX);
    }

    #[test]
    fn test_per_domain_buckets_are_independent() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            global: None,
            per_domain: Some(window(2, 60)),
        });

        assert!(limiter.check_admission("a@example.com").is_ok());
        assert!(limiter.check_admission("b@EXAMPLE.com").is_ok());

        let denied = limiter.check_admission("c@example.com").unwrap_err();
        assert_eq!(
            denied.scope,
            RateLimitScope::Domain(Domain::new("example.com"))
        );

        assert!(limiter.check_admission("a@example.org").is_ok());
    }

    #[test]
    fn test_global_token_is_not_refunded() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            global: Some(window(10, 60)),
            per_domain: Some(window(1, 60)),
        });

        limiter.check_admission("a@example.com").unwrap();
        assert!(limiter.check_admission("b@example.com").is_err());

        let stats = limiter.stats(&RateLimitScope::Global).unwrap();
        assert!((stats.available_tokens - 8.0).abs() < 0.01);
    }

    #[test]
    fn test_malformed_address_is_admitted() {
        let limiter = global(1, 60);
        limiter.check_admission("a@example.com").unwrap();

        assert!(limiter.check_admission("not-an-email").is_ok());
        assert!(limiter.check_admission("trailing@").is_ok());
        assert!(limiter.check_admission("b@example.com").is_err());
    }

    #[test]
    fn test_disabled_limiter_admits_everything() {
        let limiter = RateLimiter::new(&RateLimitConfig::default());
        for _ in 0..1000 {
            assert!(limiter.check_admission("a@example.com").is_ok());
        }
        assert!(limiter.stats(&RateLimitScope::Global).is_none());
    }

    #[test]
    fn test_stats() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            global: None,
            per_domain: Some(window(20, 2)),
        });
        let scope = RateLimitScope::Domain(Domain::new("example.com"));

        assert!(limiter.stats(&scope).is_none());

        limiter.check_admission("a@example.com").unwrap();

        let stats = limiter.stats(&scope).unwrap();
        assert!((stats.available_tokens - 19.0).abs() < 0.1);
        assert!((stats.capacity - 20.0_f64).abs() < f64::EPSILON);
        assert!((stats.refill_rate - 10.0_f64).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate() {
        assert!(RateLimitConfig::default().validate().is_ok());
        assert!(
            RateLimitConfig {
                global: Some(window(0, 60)),
                per_domain: None,
            }
            .validate()
            .is_err()
        );
    }
}
