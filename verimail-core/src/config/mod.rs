//! Validation configuration.
//!
//! Users write a [`RawConfig`] (usually as RON); the core only ever sees the
//! normalized [`Config`] and [`ValidationConfig`] produced from it.

mod preset;
mod raw;

use std::{path::Path, time::Duration};

use thiserror::Error;
use verimail_common::{Backoff, ErrorKind, ValidatorName};
use verimail_dns::LookupOptions;
use verimail_smtp::{ProbeConfig, SmtpTimeouts, TlsPolicy};

pub use preset::Preset;
pub use raw::{RawBasic, RawConfig, RawMx, RawSmtp, Toggle};

use crate::rate_limiter::RateLimitConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown preset '{0}', expected one of: fast, balanced, thorough")]
    UnknownPreset(String),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Unable to parse configuration: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("Unable to read configuration file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::ConfigInvalid
    }

    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxSettings {
    pub enabled: bool,
    /// Additional attempts after the first lookup.
    pub retries: u32,
    pub fallback_to_a: bool,
}

impl Default for MxSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            retries: 2,
            fallback_to_a: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub enabled: bool,
    pub port: u16,
    pub sender: String,
    pub helo_name: String,
    pub tls: TlsPolicy,
    pub verify_mailbox: bool,
    pub accept_invalid_certs: bool,
    /// Additional probe attempts, shared between greylisting and transient
    /// failures.
    pub retries: u32,
    /// Wait after a greylisted attempt.
    pub greylist_delay: Duration,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 25,
            sender: "verify-probe@example.com".to_string(),
            helo_name: std::env::var("HOSTNAME")
                .ok()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| "localhost".to_string()),
            tls: TlsPolicy::Opportunistic,
            verify_mailbox: true,
            accept_invalid_certs: true,
            retries: 1,
            greylist_delay: Duration::from_secs(2),
        }
    }
}

/// Everything a single pipeline run needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationConfig {
    /// Stop after the first failure that is not a warning.
    pub early_exit: bool,
    /// Deadline for each network operation.
    pub timeout: Duration,
    pub regex: bool,
    pub typo: bool,
    pub disposable: bool,
    pub mx: MxSettings,
    pub smtp: SmtpSettings,
    /// Delay policy between attempts of both network validators.
    pub backoff: Backoff,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            early_exit: true,
            timeout: Duration::from_secs(10),
            regex: true,
            typo: true,
            disposable: true,
            mx: MxSettings::default(),
            smtp: SmtpSettings::default(),
            backoff: Backoff::default(),
        }
    }
}

impl ValidationConfig {
    /// The configuration of a named preset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownPreset`] for an unrecognised name.
    pub fn preset(name: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        name.parse::<Preset>()?.apply(&mut config);
        Ok(config)
    }

    #[must_use]
    pub const fn is_enabled(&self, name: ValidatorName) -> bool {
        match name {
            ValidatorName::Regex => self.regex,
            ValidatorName::Typo => self.typo,
            ValidatorName::Disposable => self.disposable,
            ValidatorName::Mx => self.mx.enabled,
            ValidatorName::Smtp => self.smtp.enabled,
        }
    }

    #[must_use]
    pub const fn lookup_options(&self) -> LookupOptions {
        LookupOptions {
            timeout: self.timeout,
            max_retries: self.mx.retries,
            fallback_to_a: self.mx.fallback_to_a,
        }
    }

    #[must_use]
    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            port: self.smtp.port,
            sender: self.smtp.sender.clone(),
            helo_name: self.smtp.helo_name.clone(),
            tls: self.smtp.tls,
            verify_mailbox: self.smtp.verify_mailbox,
            accept_invalid_certs: self.smtp.accept_invalid_certs,
            timeouts: SmtpTimeouts::uniform(self.timeout),
        }
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("timeout_ms", "must be greater than 0"));
        }

        if self.backoff.base_delay_ms > self.backoff.max_delay_ms {
            return Err(ConfigError::invalid(
                "backoff",
                "base_delay_ms must not exceed max_delay_ms",
            ));
        }

        if self.smtp.enabled {
            if self.smtp.port == 0 {
                return Err(ConfigError::invalid("smtp.port", "must not be 0"));
            }

            if !self.smtp.sender.contains('@') {
                return Err(ConfigError::invalid(
                    "smtp.sender",
                    format!("'{}' is not an address", self.smtp.sender),
                ));
            }

            if self.smtp.helo_name.trim().is_empty() {
                return Err(ConfigError::invalid("smtp.helo_name", "must not be empty"));
            }
        }

        Ok(())
    }
}

/// A validation configuration plus the knobs of bulk runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub validation: ValidationConfig,
    pub rate_limit: Option<RateLimitConfig>,
    pub concurrency: usize,
    pub continue_on_error: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            validation: ValidationConfig::default(),
            rate_limit: None,
            concurrency: 10,
            continue_on_error: true,
        }
    }
}

impl Config {
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the document does not parse or does not
    /// validate.
    pub fn from_ron_str(s: &str) -> Result<Self, ConfigError> {
        RawConfig::from_ron_str(s)?.resolve()
    }

    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, does not parse or
    /// does not validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_ron_str(&content)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validation.validate()?;

        if self.concurrency == 0 {
            return Err(ConfigError::invalid("concurrency", "must be at least 1"));
        }

        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.validate()?;
        }

        Ok(())
    }
}
