//! Email address validation.
//!
//! A [`Pipeline`] runs up to five validators against an address, in order:
//! syntax, typo, disposable domain, MX records and an SMTP mailbox probe. The
//! outcomes are folded into an [`AggregatedResult`] carrying a 0 to 100 score.
//! [`BulkProcessor`] runs a pipeline over many addresses with bounded
//! concurrency and optional rate limiting.

pub mod bulk;
pub mod config;
pub mod pipeline;
pub mod rate_limiter;
pub mod validators;

use std::sync::Arc;

pub use bulk::{
    BulkError, BulkOptions, BulkOutcome, BulkProcessor, CheckError, EmailCheck, ProgressFn,
};
pub use config::{Config, ConfigError, Preset, RawConfig, ValidationConfig};
pub use pipeline::{Pipeline, PipelineError};
pub use rate_limiter::{RateLimitConfig, RateLimitScope, RateLimited, RateLimiter, RateWindow};
pub use verimail_common::AggregatedResult;

/// Validates a single address.
///
/// # Errors
///
/// Returns an error only if `config` is invalid or the system resolver cannot
/// be set up; problems with the address itself are reported in the result.
pub async fn validate_one(
    email: &str,
    config: &ValidationConfig,
) -> Result<AggregatedResult, PipelineError> {
    Ok(Pipeline::new(config)?.validate(email).await)
}

/// Validates many addresses with one pipeline.
///
/// # Errors
///
/// Returns an error if the configuration or options are invalid, or, with
/// `continue_on_error` off, for the first address that could not be checked.
pub async fn validate_bulk(
    emails: &[String],
    config: &ValidationConfig,
    options: BulkOptions,
) -> Result<BulkOutcome, BulkError> {
    let pipeline = Pipeline::new(config)?;

    BulkProcessor::new(Arc::new(pipeline), options)?
        .process(emails)
        .await
}
