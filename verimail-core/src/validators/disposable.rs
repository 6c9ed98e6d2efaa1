//! Disposable mailbox detection.
//!
//! The domain list is compiled into the binary and parsed once, on first use.

use std::sync::LazyLock;

use ahash::AHashSet;
use regex::Regex;
use serde::Serialize;
use verimail_common::{Domain, ErrorKind, ValidatorName, ValidatorOutcome, tracing};

static DOMAINS: LazyLock<AHashSet<&'static str>> = LazyLock::new(|| {
    let domains: AHashSet<_> = parse_list(include_str!("../../data/disposable_domains.txt")).collect();
    tracing::debug!(count = domains.len(), "Loaded disposable domain list");
    domains
});

#[allow(clippy::expect_used, reason = "The patterns are literals")]
static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^(?:temp|tmp|throwaway|trash|burner|fake|disposable)-?(?:e?-?mail|inbox|box)s?\d*\.",
        r"^(?:\d+|ten|twenty)-?minutes?-?(?:e?mail|inbox)\.",
        r"(?:^|\.)guerrilla-?mail",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("disposable pattern compiles"))
    .collect()
});

/// One lowercased domain per line; blank lines and `#` comments are skipped.
fn parse_list(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchReason {
    /// The domain, or a parent of it, is on the list.
    List,
    /// The domain name looks like a throwaway service.
    Pattern,
}

impl MatchReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Pattern => "pattern",
        }
    }
}

/// Whether mail for `domain` goes to a disposable mailbox provider.
pub fn check(domain: &Domain) -> Option<MatchReason> {
    let name = domain.as_str();

    let mut suffix = Some(name);
    while let Some(candidate) = suffix {
        if DOMAINS.contains(candidate) {
            return Some(MatchReason::List);
        }
        suffix = candidate.split_once('.').map(|(_, parent)| parent);
    }

    PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(name))
        .then_some(MatchReason::Pattern)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DisposableValidator;

impl DisposableValidator {
    pub fn check(self, domain: &Domain) -> ValidatorOutcome {
        match check(domain) {
            Some(reason) => ValidatorOutcome::fail(
                ValidatorName::Disposable,
                ErrorKind::DisposableDomain,
                format!("{domain} is a disposable email provider"),
            )
            .with_detail("match_reason", reason.as_str()),
            None => ValidatorOutcome::pass(ValidatorName::Disposable),
        }
    }
}
