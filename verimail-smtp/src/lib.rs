//! Mailbox verification over SMTP.
//!
//! The [`SmtpProber`] speaks just enough SMTP to learn whether a mail exchanger
//! would accept a recipient, without ever sending `DATA`.

pub mod client;
pub mod error;
pub mod prober;

pub use client::{Response, SmtpClient};
pub use error::{ClientError, ProbeError, Step};
pub use prober::{ProbeConfig, ProbeResult, SmtpProber, SmtpTimeouts, TlsPolicy};
