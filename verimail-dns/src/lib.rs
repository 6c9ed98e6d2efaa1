//! DNS resolution for address validation.
//!
//! Looks up the mail exchangers of a domain, falling back to address records
//! per RFC 5321 section 5.1, and rates how robust the domain's mail setup is.

pub mod backend;
pub mod error;
pub mod memory;
pub mod resolver;

pub use backend::{DnsBackend, HickoryBackend, LookupError};
pub use error::DnsError;
pub use memory::MemoryBackend;
pub use resolver::{DnsLookupResult, LookupOptions, MxRecord, MxResolver, quality_score};
