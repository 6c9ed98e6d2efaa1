use std::{
    fmt::{self, Display},
    io,
    time::Duration,
};

use thiserror::Error;
use verimail_common::ErrorKind;

/// Errors raised by the SMTP client itself.
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error occurred during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Failed to parse an SMTP response from the server.
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// TLS/SSL error occurred.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

/// Specialized `Result` type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// One step of a probe conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Connect,
    Greeting,
    Ehlo,
    Helo,
    StartTls,
    MailFrom,
    RcptTo,
    Quit,
}

impl Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Greeting => "greeting",
            Self::Ehlo => "EHLO",
            Self::Helo => "HELO",
            Self::StartTls => "STARTTLS",
            Self::MailFrom => "MAIL FROM",
            Self::RcptTo => "RCPT TO",
            Self::Quit => "QUIT",
        })
    }
}

/// Reasons a probe attempt ended without a verdict on the mailbox.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("{step} timed out after {timeout:?}")]
    Timeout { step: Step, timeout: Duration },

    /// The server answered a step with a code the probe cannot continue from.
    #[error("{step} rejected: {code} {message}")]
    Rejected {
        step: Step,
        code: u16,
        message: String,
    },

    #[error("TLS is required but the server does not advertise STARTTLS")]
    TlsUnavailable,

    #[error("TLS negotiation failed: {0}")]
    Tls(String),

    #[error("{step} failed: {source}")]
    Client {
        step: Step,
        #[source]
        source: ClientError,
    },
}

impl ProbeError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::SmtpTimeout,
            _ => ErrorKind::SmtpConnectionFailed,
        }
    }

    /// Returns `true` if another attempt might get further.
    ///
    /// A 5xx reply at any step is the server's final word.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        match self {
            Self::TlsUnavailable => false,
            Self::Rejected { code, .. } => !matches!(code, 500..=599),
            _ => true,
        }
    }

    /// The step that failed, if the failure is tied to one.
    #[must_use]
    pub const fn step(&self) -> Option<Step> {
        match self {
            Self::Connect { .. } => Some(Step::Connect),
            Self::Timeout { step, .. } | Self::Rejected { step, .. } | Self::Client { step, .. } => {
                Some(*step)
            }
            Self::Tls(_) | Self::TlsUnavailable => Some(Step::StartTls),
        }
    }
}
