pub mod domain;
pub mod error;
pub mod logging;
pub mod outcome;
pub mod result;
pub mod retry;

pub use domain::Domain;
pub use error::{ErrorKind, Severity};
pub use outcome::{ValidatorName, ValidatorOutcome};
pub use result::{AggregatedResult, FailureReason};
pub use retry::Backoff;
pub use tracing;
