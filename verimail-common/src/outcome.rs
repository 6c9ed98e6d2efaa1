//! Per-validator outcomes.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorKind, Severity};

/// The five built-in validators.
///
/// The derived ordering is the execution order of the pipeline, so a
/// `BTreeMap<ValidatorName, _>` iterates stages in the order they ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorName {
    Regex,
    Typo,
    Disposable,
    Mx,
    Smtp,
}

impl ValidatorName {
    pub const ALL: [Self; 5] = [Self::Regex, Self::Typo, Self::Disposable, Self::Mx, Self::Smtp];

    /// Points contributed to the score when this validator passes.
    #[must_use]
    pub const fn weight(self) -> u8 {
        match self {
            Self::Regex | Self::Disposable | Self::Mx => 20,
            Self::Typo => 10,
            Self::Smtp => 30,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Regex => "regex",
            Self::Typo => "typo",
            Self::Disposable => "disposable",
            Self::Mx => "mx",
            Self::Smtp => "smtp",
        }
    }
}

impl Display for ValidatorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of running a single validator against one address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorOutcome {
    pub name: ValidatorName,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Only meaningful when `passed` is `false`.
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl ValidatorOutcome {
    #[must_use]
    pub fn pass(name: ValidatorName) -> Self {
        Self {
            name,
            passed: true,
            error_kind: None,
            error_message: None,
            severity: Severity::default(),
            details: Map::new(),
        }
    }

    /// A failing outcome with the kind's default severity.
    #[must_use]
    pub fn fail(name: ValidatorName, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            severity: kind.default_severity(),
            details: Map::new(),
        }
    }

    #[must_use]
    pub const fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Whether this outcome makes the address invalid.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        !self.passed && self.severity != Severity::Warning
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_one_hundred() {
        let total: u32 = ValidatorName::ALL
            .iter()
            .map(|name| u32::from(name.weight()))
            .sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_ordering_is_execution_order() {
        let mut names = vec![
            ValidatorName::Smtp,
            ValidatorName::Regex,
            ValidatorName::Mx,
            ValidatorName::Typo,
            ValidatorName::Disposable,
        ];
        names.sort();
        assert_eq!(names, ValidatorName::ALL);
    }

    #[test]
    fn test_warning_failure_is_not_blocking() {
        let typo = ValidatorOutcome::fail(
            ValidatorName::Typo,
            ErrorKind::TypoDetected,
            "Did you mean gmail.com?",
        );
        assert!(!typo.passed);
        assert!(!typo.is_blocking());

        let mx = ValidatorOutcome::fail(ValidatorName::Mx, ErrorKind::MxNotFound, "no servers");
        assert!(mx.is_blocking());
        assert!(!ValidatorOutcome::pass(ValidatorName::Mx).is_blocking());
    }

    #[test]
    fn test_details() {
        let outcome = ValidatorOutcome::pass(ValidatorName::Mx)
            .with_detail("quality_score", 20)
            .with_detail("fallback", false);

        assert_eq!(outcome.details["quality_score"], 20);
        assert_eq!(outcome.details["fallback"], false);
    }
}
