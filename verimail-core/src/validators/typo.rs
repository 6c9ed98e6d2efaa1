//! Typo detection against well-known mailbox providers using Levenshtein
//! distance.

use textdistance::str::levenshtein;
use verimail_common::{Domain, ErrorKind, ValidatorName, ValidatorOutcome};

const PROVIDERS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "yahoo.com",
    "yahoo.co.uk",
    "ymail.com",
    "hotmail.com",
    "hotmail.co.uk",
    "outlook.com",
    "live.com",
    "msn.com",
    "icloud.com",
    "me.com",
    "aol.com",
    "protonmail.com",
    "proton.me",
    "gmx.com",
    "mail.com",
    "yandex.com",
    "zoho.com",
    "fastmail.com",
    "comcast.net",
    "verizon.net",
    "att.net",
];

const MAX_DISTANCE: usize = 2;
const MIN_CONFIDENCE: f64 = 0.75;

/// A likely intended domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Suggestion {
    pub domain: &'static str,
    /// `1 - distance / longest length`, rounded to two decimals.
    pub confidence: f64,
}

/// Suggests a well-known provider `domain` may be a misspelling of.
///
/// Returns `None` for the providers themselves and for anything more than two
/// edits or less than 75% similar.
pub fn suggest(domain: &str) -> Option<Suggestion> {
    if PROVIDERS.iter().any(|provider| *provider == domain) {
        return None;
    }

    let mut best: Option<Suggestion> = None;

    for provider in PROVIDERS {
        let distance = levenshtein(domain, provider);
        if distance == 0 || distance > MAX_DISTANCE {
            continue;
        }

        let longest = domain.chars().count().max(provider.chars().count());
        #[allow(clippy::cast_precision_loss)]
        let confidence = 1.0 - distance as f64 / longest as f64;

        if confidence >= MIN_CONFIDENCE
            && best.is_none_or(|current| confidence > current.confidence)
        {
            best = Some(Suggestion {
                domain: *provider,
                confidence: (confidence * 100.0).round() / 100.0,
            });
        }
    }

    best
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TypoValidator;

impl TypoValidator {
    /// A failing outcome here is always a warning.
    pub fn check(self, domain: &Domain) -> ValidatorOutcome {
        match suggest(domain.as_str()) {
            Some(suggestion) => ValidatorOutcome::fail(
                ValidatorName::Typo,
                ErrorKind::TypoDetected,
                format!("Did you mean {}?", suggestion.domain),
            )
            .with_detail("suggestion", suggestion.domain)
            .with_detail("confidence", suggestion.confidence),
            None => ValidatorOutcome::pass(ValidatorName::Typo),
        }
    }
}
