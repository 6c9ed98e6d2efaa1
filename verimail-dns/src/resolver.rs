//! MX resolution with retries, exponential backoff and quality scoring.

use std::{future::Future, net::IpAddr, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use verimail_common::{Backoff, Domain};

use crate::{
    backend::{DnsBackend, HickoryBackend, LookupError},
    error::DnsError,
};

/// A mail exchanger and its preference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MxRecord {
    /// Lower value = more preferred.
    pub priority: u16,
    pub exchange: String,
}

impl MxRecord {
    /// Creates a record, dropping the trailing root label from `exchange`.
    #[must_use]
    pub fn new(priority: u16, exchange: impl AsRef<str>) -> Self {
        Self {
            priority,
            exchange: exchange.as_ref().trim_end_matches('.').to_string(),
        }
    }
}

/// What is known about a domain's ability to receive mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsLookupResult {
    /// Sorted by ascending priority.
    pub mx_records: Vec<MxRecord>,
    pub a_records: Vec<IpAddr>,
    pub has_mx: bool,
    pub has_a: bool,
    /// 0 to 20, see [`quality_score`].
    pub quality_score: u8,
    /// Total number of queries sent, across MX and A lookups.
    pub attempts: u32,
}

impl DnsLookupResult {
    fn new(mut mx_records: Vec<MxRecord>, a_records: Vec<IpAddr>, attempts: u32) -> Self {
        mx_records.sort_by_key(|mx| mx.priority);

        Self {
            has_mx: !mx_records.is_empty(),
            has_a: !a_records.is_empty(),
            quality_score: quality_score(&mx_records, &a_records),
            mx_records,
            a_records,
            attempts,
        }
    }

    /// Whether any host at all accepts mail for the domain.
    #[must_use]
    pub const fn accepts_mail(&self) -> bool {
        self.has_mx || self.has_a
    }

    /// The host to probe: the most preferred exchanger, or the domain itself
    /// when mail is delivered to its address records.
    #[must_use]
    pub fn preferred_host<'a>(&'a self, domain: &'a Domain) -> Option<&'a str> {
        self.mx_records
            .first()
            .map(|mx| mx.exchange.as_str())
            .or_else(|| self.has_a.then_some(domain.as_str()))
    }
}

/// Rates the robustness of a domain's mail configuration.
///
/// | records                              | score |
/// |--------------------------------------|-------|
/// | none                                 | 0     |
/// | address records only                 | 10    |
/// | one MX                               | 15    |
/// | several MX sharing one priority      | 18    |
/// | several MX with distinct priorities  | 20    |
#[must_use]
pub fn quality_score(mx_records: &[MxRecord], a_records: &[IpAddr]) -> u8 {
    match mx_records {
        [] if a_records.is_empty() => 0,
        [] => 10,
        [_] => 15,
        [first, rest @ ..] => {
            if rest.iter().any(|mx| mx.priority != first.priority) {
                20
            } else {
                18
            }
        }
    }
}

/// Per-call lookup knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupOptions {
    /// Deadline for each individual query.
    pub timeout: Duration,
    /// Additional attempts after the first one.
    pub max_retries: u32,
    /// Look up address records when the domain has no MX records.
    pub fallback_to_a: bool,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 2,
            fallback_to_a: true,
        }
    }
}

/// Resolves mail servers for a domain following RFC 5321 section 5.1.
#[derive(Debug, Clone)]
pub struct MxResolver {
    backend: Arc<dyn DnsBackend>,
    backoff: Backoff,
}

impl MxResolver {
    #[must_use]
    pub fn new(backend: Arc<dyn DnsBackend>) -> Self {
        Self {
            backend,
            backoff: Backoff::default(),
        }
    }

    /// Creates a resolver backed by the system DNS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn system(timeout: Duration) -> Result<Self, DnsError> {
        Ok(Self::new(Arc::new(HickoryBackend::new(timeout)?)))
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Resolves the mail exchangers of `domain`.
    ///
    /// 1. Look up MX records, retrying transient failures with backoff
    /// 2. If there are none and `fallback_to_a` is set, look up address records
    /// 3. Sort the MX records by priority and score the result
    ///
    /// A domain that exists but has no usable records is not an error; the
    /// result then carries a quality score of 0.
    ///
    /// # Errors
    ///
    /// Returns `DnsError` if:
    /// - The domain does not exist (never retried, no address fallback)
    /// - Every MX attempt failed and the address fallback found nothing
    /// - The final attempt timed out
    #[tracing::instrument(level = "debug", skip_all, fields(domain = %domain))]
    pub async fn resolve(
        &self,
        domain: &Domain,
        options: &LookupOptions,
    ) -> Result<DnsLookupResult, DnsError> {
        let mut attempts = 0;
        let backend = &*self.backend;

        let mx = self
            .with_retries(domain, options, &mut attempts, move || {
                backend.resolve_mx(domain)
            })
            .await;

        let mx_failure = match mx {
            Ok(records) if !records.is_empty() => {
                debug!(count = records.len(), attempts, "Resolved MX records");
                return Ok(DnsLookupResult::new(records, Vec::new(), attempts));
            }
            Ok(_) => None,
            Err(err @ DnsError::DomainNotFound(_)) => return Err(err),
            Err(err) => Some(err),
        };

        if !options.fallback_to_a {
            return match mx_failure {
                Some(err) => Err(err),
                None => {
                    debug!(attempts, "No MX records and address fallback disabled");
                    Ok(DnsLookupResult::new(Vec::new(), Vec::new(), attempts))
                }
            };
        }

        debug!("Falling back to address records");
        let a = self
            .with_retries(domain, options, &mut attempts, move || {
                backend.resolve_a(domain)
            })
            .await;

        match (a, mx_failure) {
            (Ok(addresses), _) if !addresses.is_empty() => {
                debug!(count = addresses.len(), attempts, "Resolved address records");
                Ok(DnsLookupResult::new(Vec::new(), addresses, attempts))
            }
            (Ok(_), None) => Ok(DnsLookupResult::new(Vec::new(), Vec::new(), attempts)),
            (Err(err @ DnsError::DomainNotFound(_)), _) => Err(err),
            (_, Some(mx_err)) => Err(mx_err),
            (Err(a_err), None) => Err(a_err),
        }
    }

    /// Runs `query` up to `max_retries + 1` times.
    ///
    /// `NoRecords` is reported as an empty answer, `NxDomain` is returned
    /// immediately, and everything else is retried after a backoff delay.
    async fn with_retries<T, F, Fut>(
        &self,
        domain: &Domain,
        options: &LookupOptions,
        attempts: &mut u32,
        query: F,
    ) -> Result<Vec<T>, DnsError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Vec<T>, LookupError>>,
    {
        let mut attempt = 0;

        loop {
            *attempts += 1;

            let failure = match tokio::time::timeout(options.timeout, query()).await {
                Ok(Ok(records)) => return Ok(records),
                Ok(Err(LookupError::NoRecords)) => return Ok(Vec::new()),
                Ok(Err(LookupError::NxDomain)) => {
                    return Err(DnsError::DomainNotFound(domain.clone()));
                }
                Ok(Err(LookupError::Transient(message))) => DnsError::LookupFailed {
                    domain: domain.clone(),
                    attempts: *attempts,
                    message,
                },
                Err(_) => DnsError::Timeout {
                    domain: domain.clone(),
                    attempts: *attempts,
                },
            };

            if attempt >= options.max_retries {
                warn!(attempts = *attempts, "DNS lookup failed: {failure}");
                return Err(failure);
            }

            let delay = self.backoff.delay(attempt);
            debug!(attempt, ?delay, "DNS lookup failed, retrying: {failure}");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
