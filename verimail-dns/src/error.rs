use thiserror::Error;
use verimail_common::{Domain, ErrorKind};

/// Errors that can occur during DNS resolution.
#[derive(Debug, Error)]
pub enum DnsError {
    /// Domain does not exist (NXDOMAIN).
    #[error("Domain does not exist: {0}")]
    DomainNotFound(Domain),

    /// Every attempt failed with a resolver or network error.
    #[error("DNS lookup failed for {domain} after {attempts} attempt(s): {message}")]
    LookupFailed {
        domain: Domain,
        attempts: u32,
        message: String,
    },

    /// The final attempt exceeded its deadline.
    #[error("DNS query timed out for {domain} after {attempts} attempt(s)")]
    Timeout { domain: Domain, attempts: u32 },

    /// The system resolver could not be constructed.
    #[error("Unable to initialise resolver: {0}")]
    Resolver(#[from] hickory_resolver::ResolveError),
}

impl DnsError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::DomainNotFound(_) => ErrorKind::MxNotFound,
            Self::LookupFailed { .. } => ErrorKind::MxLookupFailed,
            Self::Timeout { .. } | Self::Resolver(_) => ErrorKind::NetworkError,
        }
    }
}
