//! In-memory DNS backend for tests and offline runs.

use std::{
    net::IpAddr,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use verimail_common::Domain;

use crate::{
    backend::{DnsBackend, LookupError},
    resolver::MxRecord,
};

#[derive(Debug, Clone)]
struct Zone {
    mx: Result<Vec<MxRecord>, LookupError>,
    a: Result<Vec<IpAddr>, LookupError>,
    /// Queries that fail with a transient error before the real answer is served.
    failures: u32,
    /// Applied to every query, including failing ones.
    delay: Option<Duration>,
}

impl Default for Zone {
    fn default() -> Self {
        Self {
            mx: Err(LookupError::NoRecords),
            a: Err(LookupError::NoRecords),
            failures: 0,
            delay: None,
        }
    }
}

/// A scripted DNS backend.
///
/// Domains that were never configured answer with NXDOMAIN.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    zones: Mutex<AHashMap<Domain, Zone>>,
    queries: AtomicUsize,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn zone(self, domain: &str, f: impl FnOnce(&mut Zone)) -> Self {
        f(self.zones.lock().entry(Domain::new(domain)).or_default());
        self
    }

    /// Serve `records` for MX queries against `domain`.
    #[must_use]
    pub fn with_mx(self, domain: &str, records: impl IntoIterator<Item = MxRecord>) -> Self {
        let records = records.into_iter().collect();
        self.zone(domain, |zone| zone.mx = Ok(records))
    }

    /// Serve `addresses` for address queries against `domain`.
    #[must_use]
    pub fn with_a(self, domain: &str, addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        let addresses = addresses.into_iter().collect();
        self.zone(domain, |zone| zone.a = Ok(addresses))
    }

    /// Answer every query against `domain` with `error`.
    #[must_use]
    pub fn with_error(self, domain: &str, error: LookupError) -> Self {
        self.zone(domain, |zone| {
            zone.mx = Err(error.clone());
            zone.a = Err(error);
        })
    }

    /// Fail the next `count` queries against `domain` transiently.
    #[must_use]
    pub fn with_failures(self, domain: &str, count: u32) -> Self {
        self.zone(domain, |zone| zone.failures = count)
    }

    /// Delay every answer for `domain`.
    #[must_use]
    pub fn with_delay(self, domain: &str, delay: Duration) -> Self {
        self.zone(domain, |zone| zone.delay = Some(delay))
    }

    /// Number of queries answered so far.
    #[must_use]
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    async fn answer<T: Clone>(
        &self,
        domain: &Domain,
        select: impl FnOnce(&Zone) -> Result<Vec<T>, LookupError>,
    ) -> Result<Vec<T>, LookupError> {
        self.queries.fetch_add(1, Ordering::Relaxed);

        let (answer, delay) = {
            let mut zones = self.zones.lock();
            match zones.get_mut(domain) {
                None => (Err(LookupError::NxDomain), None),
                Some(zone) if zone.failures > 0 => {
                    zone.failures -= 1;
                    (
                        Err(LookupError::Transient("SERVFAIL".to_string())),
                        zone.delay,
                    )
                }
                Some(zone) => (select(zone), zone.delay),
            }
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        answer
    }
}

#[async_trait]
impl DnsBackend for MemoryBackend {
    async fn resolve_mx(&self, domain: &Domain) -> Result<Vec<MxRecord>, LookupError> {
        self.answer(domain, |zone| zone.mx.clone()).await
    }

    async fn resolve_a(&self, domain: &Domain) -> Result<Vec<IpAddr>, LookupError> {
        self.answer(domain, |zone| zone.a.clone()).await
    }
}
