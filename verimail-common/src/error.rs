//! Error taxonomy shared by every validator.
//!
//! Validators never surface errors as `Err` to the pipeline; instead they
//! classify the failure as an [`ErrorKind`] and attach it to their outcome.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// How much a failing outcome counts against the overall verdict.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Advisory only, never flips the verdict.
    Warning,
    #[default]
    Error,
    Critical,
}

/// Classification of a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ConfigInvalid,
    SyntaxInvalid,
    TypoDetected,
    DisposableDomain,
    MxNotFound,
    MxLookupFailed,
    SmtpMailboxNotFound,
    SmtpConnectionFailed,
    SmtpTimeout,
    RateLimitExceeded,
    NetworkError,
    /// A stage failed in a way no validator classified.
    Custom,
}

impl ErrorKind {
    /// Stable machine-readable code, identical to the serialized form.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::SyntaxInvalid => "SYNTAX_INVALID",
            Self::TypoDetected => "TYPO_DETECTED",
            Self::DisposableDomain => "DISPOSABLE_DOMAIN",
            Self::MxNotFound => "MX_NOT_FOUND",
            Self::MxLookupFailed => "MX_LOOKUP_FAILED",
            Self::SmtpMailboxNotFound => "SMTP_MAILBOX_NOT_FOUND",
            Self::SmtpConnectionFailed => "SMTP_CONNECTION_FAILED",
            Self::SmtpTimeout => "SMTP_TIMEOUT",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::NetworkError => "NETWORK_ERROR",
            Self::Custom => "CUSTOM",
        }
    }

    /// The severity an outcome carrying this kind gets unless overridden.
    #[must_use]
    pub const fn default_severity(self) -> Severity {
        match self {
            Self::TypoDetected => Severity::Warning,
            Self::ConfigInvalid => Severity::Critical,
            _ => Severity::Error,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_code_matches_serialized_form() {
        for kind in [
            ErrorKind::ConfigInvalid,
            ErrorKind::MxNotFound,
            ErrorKind::SmtpMailboxNotFound,
            ErrorKind::RateLimitExceeded,
            ErrorKind::Custom,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.code()));
        }
    }

    #[test]
    fn test_typo_is_only_a_warning() {
        assert_eq!(ErrorKind::TypoDetected.default_severity(), Severity::Warning);
        assert_eq!(ErrorKind::DisposableDomain.default_severity(), Severity::Error);
        assert_eq!(ErrorKind::ConfigInvalid.default_severity(), Severity::Critical);
    }
}
