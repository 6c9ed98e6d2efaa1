//! Address syntax checks.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use verimail_common::{ErrorKind, ValidatorName, ValidatorOutcome};

/// RFC 5321 section 4.5.3.1.3
const MAX_ADDRESS_LENGTH: usize = 254;
/// RFC 5321 section 4.5.3.1.1
const MAX_LOCAL_PART_LENGTH: usize = 64;

#[allow(clippy::expect_used, reason = "The pattern is a literal")]
static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@(?:[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,63}$",
    )
    .expect("address pattern compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("Email address is empty")]
    Empty,

    #[error("Email address exceeds {MAX_ADDRESS_LENGTH} characters")]
    TooLong,

    #[error("Email address must contain '@'")]
    MissingAt,

    #[error("Local part exceeds {MAX_LOCAL_PART_LENGTH} characters")]
    LocalPartTooLong,

    #[error("Local part cannot start or end with a dot, or contain consecutive dots")]
    DotPlacement,

    #[error("Email address is not well formed")]
    Malformed,
}

/// A syntactically valid address, split at the last `@`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address<'a> {
    pub local_part: &'a str,
    pub domain: &'a str,
}

/// Parses a trimmed address.
///
/// # Errors
///
/// Returns the first [`SyntaxError`] the address violates.
pub fn parse(email: &str) -> Result<Address<'_>, SyntaxError> {
    if email.is_empty() {
        return Err(SyntaxError::Empty);
    }

    if email.len() > MAX_ADDRESS_LENGTH {
        return Err(SyntaxError::TooLong);
    }

    let (local_part, domain) = email.rsplit_once('@').ok_or(SyntaxError::MissingAt)?;
    if local_part.is_empty() || domain.is_empty() {
        return Err(SyntaxError::Malformed);
    }

    if local_part.len() > MAX_LOCAL_PART_LENGTH {
        return Err(SyntaxError::LocalPartTooLong);
    }

    if local_part.starts_with('.') || local_part.ends_with('.') || local_part.contains("..") {
        return Err(SyntaxError::DotPlacement);
    }

    if !ADDRESS.is_match(email) {
        return Err(SyntaxError::Malformed);
    }

    Ok(Address { local_part, domain })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyntaxValidator;

impl SyntaxValidator {
    pub fn check(self, email: &str) -> ValidatorOutcome {
        match parse(email) {
            Ok(address) => ValidatorOutcome::pass(ValidatorName::Regex)
                .with_detail("local_part", address.local_part)
                .with_detail("domain", address.domain.to_ascii_lowercase()),
            Err(err) => {
                ValidatorOutcome::fail(ValidatorName::Regex, ErrorKind::SyntaxInvalid, err.to_string())
            }
        }
    }
}
