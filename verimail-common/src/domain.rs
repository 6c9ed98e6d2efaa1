//! Domain newtype
//!
//! Wraps the right-hand side of an address so that hosts, domains and whole
//! addresses cannot be confused at call sites. Domains are always stored
//! lowercased.

use std::{
    fmt::{self, Display},
    ops::Deref,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

/// A lowercased mail domain.
///
/// ```
/// use verimail_common::Domain;
///
/// let domain = Domain::from_email("User@Example.COM").unwrap();
/// assert_eq!(domain.as_str(), "example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Domain(Arc<str>);

impl Domain {
    /// Create a new `Domain`, lowercasing the input.
    #[must_use]
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(Arc::from(s.as_ref().to_ascii_lowercase()))
    }

    /// Extract the domain from the right-hand side of the last `@` in `email`.
    ///
    /// Returns `None` when there is no `@` or nothing follows it.
    #[must_use]
    pub fn from_email(email: &str) -> Option<Self> {
        let (_, domain) = email.trim().rsplit_once('@')?;
        let domain = domain.trim();

        if domain.is_empty() {
            None
        } else {
            Some(Self::new(domain))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for Domain {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for Domain {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Domain {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
