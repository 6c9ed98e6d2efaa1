//! The aggregated verdict for one address.

use std::{collections::BTreeMap, time::Duration};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::outcome::{ValidatorName, ValidatorOutcome};

/// Why an address was judged invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureReason {
    Regex,
    Typo,
    Disposable,
    Mx,
    Smtp,
    /// Admission was denied before any validator ran.
    #[serde(rename = "rate-limit")]
    RateLimit,
    /// The address could not be processed at all.
    Custom,
}

impl From<ValidatorName> for FailureReason {
    fn from(name: ValidatorName) -> Self {
        match name {
            ValidatorName::Regex => Self::Regex,
            ValidatorName::Typo => Self::Typo,
            ValidatorName::Disposable => Self::Disposable,
            ValidatorName::Mx => Self::Mx,
            ValidatorName::Smtp => Self::Smtp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub email: String,
    pub valid: bool,
    pub score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    pub validators: BTreeMap<ValidatorName, ValidatorOutcome>,
    pub elapsed_ms: u64,
    pub timestamp: String,
}

impl AggregatedResult {
    /// Fold the outcomes of a pipeline run into a verdict.
    ///
    /// The address is valid unless some outcome failed with a severity other
    /// than [`Severity::Warning`](crate::Severity::Warning); the first such
    /// outcome in execution order names the failure reason.
    #[must_use]
    pub fn from_outcomes(
        email: impl Into<String>,
        outcomes: impl IntoIterator<Item = ValidatorOutcome>,
        elapsed: Duration,
    ) -> Self {
        let validators: BTreeMap<_, _> = outcomes
            .into_iter()
            .map(|outcome| (outcome.name, outcome))
            .collect();

        let failure_reason = validators
            .values()
            .find(|outcome| outcome.is_blocking())
            .map(|outcome| FailureReason::from(outcome.name));

        Self {
            email: email.into(),
            valid: failure_reason.is_none(),
            score: score(validators.values()),
            failure_reason,
            validators,
            elapsed_ms: millis(elapsed),
            timestamp: now(),
        }
    }

    /// The entry recorded for an address that the rate limiter turned away.
    #[must_use]
    pub fn rate_limited(email: impl Into<String>) -> Self {
        Self::rejected(email, FailureReason::RateLimit, Duration::ZERO)
    }

    /// The entry recorded for an address whose validation failed outright.
    #[must_use]
    pub fn errored(email: impl Into<String>, elapsed: Duration) -> Self {
        Self::rejected(email, FailureReason::Custom, elapsed)
    }

    fn rejected(email: impl Into<String>, reason: FailureReason, elapsed: Duration) -> Self {
        Self {
            email: email.into(),
            valid: false,
            score: 0,
            failure_reason: Some(reason),
            validators: BTreeMap::new(),
            elapsed_ms: millis(elapsed),
            timestamp: now(),
        }
    }
}

/// Sum of the weights of the passing outcomes, clamped to 100.
pub fn score<'a>(outcomes: impl IntoIterator<Item = &'a ValidatorOutcome>) -> u8 {
    let total: u32 = outcomes
        .into_iter()
        .filter(|outcome| outcome.passed)
        .map(|outcome| u32::from(outcome.name.weight()))
        .sum();

    u8::try_from(total.min(100)).unwrap_or(100)
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
