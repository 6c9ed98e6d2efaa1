//! The seam between the resolver's retry policy and the actual DNS client.

use std::{fmt::Debug, net::IpAddr, time::Duration};

use async_trait::async_trait;
use hickory_resolver::{
    ResolveError, TokioResolver, config::ResolverOpts, name_server::TokioConnectionProvider,
};
use thiserror::Error;
use verimail_common::Domain;

use crate::{error::DnsError, resolver::MxRecord};

/// Outcome of a single failed query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// The domain does not exist. Never retried.
    #[error("domain does not exist")]
    NxDomain,

    /// The domain exists but has no records of the requested type.
    #[error("no records found")]
    NoRecords,

    /// Anything else: network trouble, SERVFAIL, refused queries.
    #[error("{0}")]
    Transient(String),
}

impl From<ResolveError> for LookupError {
    fn from(err: ResolveError) -> Self {
        // NXDOMAIN is reported as a no-records error carrying the response code,
        // so it has to be checked first.
        if err.is_nx_domain() {
            Self::NxDomain
        } else if err.is_no_records_found() {
            Self::NoRecords
        } else {
            Self::Transient(err.to_string())
        }
    }
}

/// A single-shot DNS client. Retries and deadlines are applied by the caller.
#[async_trait]
pub trait DnsBackend: Debug + Send + Sync {
    async fn resolve_mx(&self, domain: &Domain) -> Result<Vec<MxRecord>, LookupError>;

    async fn resolve_a(&self, domain: &Domain) -> Result<Vec<IpAddr>, LookupError>;
}

/// Backend using the system resolver configuration.
#[derive(Debug)]
pub struct HickoryBackend {
    resolver: TokioResolver,
}

impl HickoryBackend {
    /// Creates a backend whose individual queries give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn new(timeout: Duration) -> Result<Self, DnsError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self { resolver })
    }
}

#[async_trait]
impl DnsBackend for HickoryBackend {
    async fn resolve_mx(&self, domain: &Domain) -> Result<Vec<MxRecord>, LookupError> {
        let lookup = self.resolver.mx_lookup(domain.as_str()).await?;

        Ok(lookup
            .iter()
            .map(|mx| MxRecord::new(mx.preference(), mx.exchange().to_utf8()))
            .collect())
    }

    async fn resolve_a(&self, domain: &Domain) -> Result<Vec<IpAddr>, LookupError> {
        let lookup = self.resolver.lookup_ip(domain.as_str()).await?;

        Ok(lookup.iter().collect())
    }
}
