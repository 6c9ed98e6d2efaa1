//! Validating many addresses with bounded concurrency.
//!
//! Addresses are processed in sequential batches of `concurrency`. Every
//! address in a batch runs concurrently and the next batch starts only once
//! the whole batch has settled.

use std::{
    fmt,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use futures_util::{FutureExt, StreamExt, stream::FuturesUnordered};
use serde::Serialize;
use thiserror::Error;
use verimail_common::{AggregatedResult, tracing};

use crate::{
    config::ConfigError,
    pipeline::{Pipeline, PipelineError, panic_message},
    rate_limiter::{RateLimitConfig, RateLimiter},
};

/// Error returned by an [`EmailCheck`] that could not produce a verdict.
pub type CheckError = Box<dyn std::error::Error + Send + Sync>;

/// Something that can validate a single address.
#[async_trait]
pub trait EmailCheck: Send + Sync {
    async fn check(&self, email: &str) -> Result<AggregatedResult, CheckError>;
}

#[async_trait]
impl EmailCheck for Pipeline {
    async fn check(&self, email: &str) -> Result<AggregatedResult, CheckError> {
        Ok(self.validate(email).await)
    }
}

/// Called with `(completed, total)` once per address.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Clone)]
pub struct BulkOptions {
    /// Addresses per batch.
    pub concurrency: usize,
    /// Record failed addresses and carry on, rather than stopping at the first.
    pub continue_on_error: bool,
    pub rate_limit: Option<RateLimitConfig>,
    pub on_progress: Option<ProgressFn>,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            concurrency: 10,
            continue_on_error: true,
            rate_limit: None,
            on_progress: None,
        }
    }
}

impl fmt::Debug for BulkOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkOptions")
            .field("concurrency", &self.concurrency)
            .field("continue_on_error", &self.continue_on_error)
            .field("rate_limit", &self.rate_limit)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum BulkError {
    #[error("Concurrency must be at least 1, got {0}")]
    InvalidConcurrency(usize),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Validation of {email} (#{index}) failed: {source}")]
    Check {
        index: usize,
        email: String,
        source: CheckError,
    },

    #[error("Validation of {email} (#{index}) panicked: {message}")]
    Panicked {
        index: usize,
        email: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkOutcome {
    /// In input order.
    pub results: Vec<AggregatedResult>,
    pub total: usize,
    pub valid: usize,
    /// Includes rate-limited addresses.
    pub invalid: usize,
    /// Addresses whose validation failed outright.
    pub errors: usize,
    pub elapsed_ms: u64,
}

impl BulkOutcome {
    const fn empty() -> Self {
        Self {
            results: Vec::new(),
            total: 0,
            valid: 0,
            invalid: 0,
            errors: 0,
            elapsed_ms: 0,
        }
    }
}

pub struct BulkProcessor {
    checker: Arc<dyn EmailCheck>,
    concurrency: usize,
    continue_on_error: bool,
    on_progress: Option<ProgressFn>,
    /// Lives as long as the processor, so buckets carry over between calls.
    limiter: Option<RateLimiter>,
}

impl fmt::Debug for BulkProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkProcessor")
            .field("concurrency", &self.concurrency)
            .field("continue_on_error", &self.continue_on_error)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl BulkProcessor {
    /// # Errors
    ///
    /// Returns an error if `concurrency` is 0 or the rate limits are invalid.
    pub fn new(checker: Arc<dyn EmailCheck>, options: BulkOptions) -> Result<Self, BulkError> {
        if options.concurrency < 1 {
            return Err(BulkError::InvalidConcurrency(options.concurrency));
        }

        let limiter = match options.rate_limit {
            Some(config) if config.is_enabled() => {
                config.validate()?;
                Some(RateLimiter::new(&config))
            }
            _ => None,
        };

        Ok(Self {
            checker,
            concurrency: options.concurrency,
            continue_on_error: options.continue_on_error,
            on_progress: options.on_progress,
            limiter,
        })
    }

    #[must_use]
    pub const fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_ref()
    }

    fn report(&self, completed: usize, total: usize) {
        if let Some(on_progress) = &self.on_progress {
            on_progress(completed, total);
        }
    }

    /// Validates `emails`, returning one result per address in input order.
    ///
    /// # Errors
    ///
    /// With `continue_on_error` off, the first address whose check fails or
    /// panics is returned as an error once its batch has settled; later
    /// batches are not started.
    #[tracing::instrument(level = "debug", skip_all, fields(total = emails.len()))]
    pub async fn process(&self, emails: &[String]) -> Result<BulkOutcome, BulkError> {
        if emails.is_empty() {
            return Ok(BulkOutcome::empty());
        }

        let start = Instant::now();
        let total = emails.len();
        let mut results: Vec<Option<AggregatedResult>> = vec![None; total];
        let mut completed = 0;
        let mut errors = 0;

        for (batch, chunk) in emails.chunks(self.concurrency).enumerate() {
            let offset = batch * self.concurrency;
            let mut in_flight = FuturesUnordered::new();

            for (index, email) in chunk.iter().enumerate().map(|(i, e)| (offset + i, e)) {
                if let Some(limiter) = &self.limiter
                    && let Err(denied) = limiter.check_admission(email)
                {
                    tracing::info!(email = %email, "{denied}");
                    results[index] = Some(AggregatedResult::rate_limited(email.as_str()));
                    completed += 1;
                    self.report(completed, total);
                    continue;
                }

                let checker = Arc::clone(&self.checker);
                in_flight.push(async move {
                    let started = Instant::now();
                    let outcome = AssertUnwindSafe(checker.check(email))
                        .catch_unwind()
                        .await;
                    (index, outcome, started.elapsed())
                });
            }

            let mut first_error = None;

            while let Some((index, outcome, elapsed)) = in_flight.next().await {
                let email = &emails[index];

                let failure = match outcome {
                    Ok(Ok(result)) => {
                        results[index] = Some(result);
                        None
                    }
                    Ok(Err(source)) => Some(BulkError::Check {
                        index,
                        email: email.clone(),
                        source,
                    }),
                    Err(panic) => Some(BulkError::Panicked {
                        index,
                        email: email.clone(),
                        message: panic_message(panic.as_ref()),
                    }),
                };

                if let Some(err) = failure {
                    tracing::warn!("{err}");
                    errors += 1;

                    if self.continue_on_error {
                        results[index] = Some(AggregatedResult::errored(email.as_str(), elapsed));
                    } else {
                        first_error.get_or_insert(err);
                    }
                }

                completed += 1;
                self.report(completed, total);
            }

            if let Some(err) = first_error {
                return Err(err);
            }

            tracing::debug!(batch, completed, total, "Batch settled");
        }

        let results: Vec<AggregatedResult> = results.into_iter().flatten().collect();
        let valid = results.iter().filter(|result| result.valid).count();

        Ok(BulkOutcome {
            total,
            valid,
            invalid: total - valid,
            errors,
            elapsed_ms: millis(start.elapsed()),
            results,
        })
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use verimail_common::{FailureReason, ValidatorName, ValidatorOutcome};

    use super::*;
    use crate::rate_limiter::RateWindow;

    /// Valid unless the local part says otherwise; `fail@` errors and
    /// `panic@` panics.
    #[derive(Default)]
    struct Scripted {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmailCheck for Scripted {
        async fn check(&self, email: &str) -> Result<AggregatedResult, CheckError> {
            self.seen.lock().push(email.to_string());

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            // Later addresses finish first.
            let delay = 50 - email.len().min(50);
            tokio::time::sleep(Duration::from_millis(u64::try_from(delay).unwrap())).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let local = email.split('@').next().unwrap_or_default();
            match local {
                "fail" => Err("scripted failure".into()),
                "panic" => panic!("scripted panic"),
                _ => Ok(AggregatedResult::from_outcomes(
                    email,
                    [ValidatorOutcome::pass(ValidatorName::Regex)],
                    Duration::ZERO,
                )),
            }
        }
    }

    fn emails(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_empty_input() {
        let checker = Arc::new(Scripted::default());
        let processor = BulkProcessor::new(checker.clone(), BulkOptions::default()).unwrap();

        let outcome = processor.process(&[]).await.unwrap();
        assert_eq!(outcome, BulkOutcome::empty());
        assert!(checker.seen.lock().is_empty());
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let options = BulkOptions {
            concurrency: 0,
            ..BulkOptions::default()
        };

        assert!(matches!(
            BulkProcessor::new(Arc::new(Scripted::default()), options),
            Err(BulkError::InvalidConcurrency(0))
        ));
    }

    #[tokio::test]
    async fn test_order_and_concurrency_bound() {
        let checker = Arc::new(Scripted::default());
        let options = BulkOptions {
            concurrency: 3,
            ..BulkOptions::default()
        };
        let processor = BulkProcessor::new(checker.clone(), options).unwrap();

        let input = emails(&[
            "a@example.com",
            "bb@example.com",
            "ccc@example.com",
            "dddd@example.com",
            "eeeee@example.com",
            "ffffff@example.com",
            "ggggggg@example.com",
        ]);
        let outcome = processor.process(&input).await.unwrap();

        let order: Vec<_> = outcome.results.iter().map(|r| r.email.clone()).collect();
        assert_eq!(order, input);
        assert_eq!(outcome.total, 7);
        assert_eq!(outcome.valid, 7);
        assert_eq!(outcome.errors, 0);
        assert!(checker.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_errors_are_recorded_when_continuing() {
        let processor =
            BulkProcessor::new(Arc::new(Scripted::default()), BulkOptions::default()).unwrap();

        let input = emails(&["ok@example.com", "fail@example.com", "panic@example.com"]);
        let outcome = processor.process(&input).await.unwrap();

        assert_eq!(outcome.valid, 1);
        assert_eq!(outcome.invalid, 2);
        assert_eq!(outcome.errors, 2);
        assert_eq!(outcome.results[1].failure_reason, Some(FailureReason::Custom));
        assert_eq!(outcome.results[2].score, 0);
    }

    #[tokio::test]
    async fn test_fail_fast_stops_after_the_batch() {
        let checker = Arc::new(Scripted::default());
        let options = BulkOptions {
            concurrency: 2,
            continue_on_error: false,
            ..BulkOptions::default()
        };
        let processor = BulkProcessor::new(checker.clone(), options).unwrap();

        let input = emails(&[
            "fail@example.com",
            "ok@example.com",
            "never@example.com",
        ]);
        let err = processor.process(&input).await.unwrap_err();

        assert!(matches!(err, BulkError::Check { index: 0, .. }));
        // The other member of the batch still ran; the next batch never did.
        let seen = checker.seen.lock().clone();
        assert!(seen.contains(&"ok@example.com".to_string()));
        assert!(!seen.contains(&"never@example.com".to_string()));
    }

    #[tokio::test]
    async fn test_rate_limited_addresses_are_invalid_not_errors() {
        let checker = Arc::new(Scripted::default());
        let options = BulkOptions {
            rate_limit: Some(RateLimitConfig {
                global: Some(RateWindow {
                    requests: 3,
                    window_secs: 60,
                }),
                per_domain: None,
            }),
            ..BulkOptions::default()
        };
        let processor = BulkProcessor::new(checker.clone(), options).unwrap();

        let input = emails(&[
            "a@example.com",
            "b@example.com",
            "c@example.com",
            "d@example.com",
            "e@example.com",
        ]);
        let outcome = processor.process(&input).await.unwrap();

        assert_eq!(outcome.valid, 3);
        assert_eq!(outcome.invalid, 2);
        assert_eq!(outcome.errors, 0);
        for result in &outcome.results[3..] {
            assert_eq!(result.failure_reason, Some(FailureReason::RateLimit));
            assert!(result.validators.is_empty());
        }
        assert_eq!(checker.seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_progress_fires_once_per_address() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);

        let options = BulkOptions {
            concurrency: 2,
            on_progress: Some(Arc::new(move |completed, total| {
                recorded.lock().push((completed, total));
            })),
            ..BulkOptions::default()
        };
        let processor = BulkProcessor::new(Arc::new(Scripted::default()), options).unwrap();

        let input = emails(&["a@example.com", "fail@example.com", "c@example.com"]);
        processor.process(&input).await.unwrap();

        assert_eq!(*calls.lock(), [(1, 3), (2, 3), (3, 3)]);
    }
}
