//! The configuration as written by users.
//!
//! Every field is optional so a file only needs to mention what it changes.
//! [`RawConfig::resolve`] folds a raw configuration over its preset and the
//! defaults, producing the canonical [`Config`] the rest of the crate uses.

use std::time::Duration;

use serde::Deserialize;
use verimail_common::Backoff;
use verimail_smtp::TlsPolicy;

use super::{Config, ConfigError, MxSettings, Preset, SmtpSettings, ValidationConfig};
use crate::rate_limiter::RateLimitConfig;

/// A validator entry: either `true`/`false`, or a settings table.
///
/// A settings table enables the validator unless it says `enabled: false`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Toggle<T> {
    Enabled(bool),
    Settings(T),
}

impl<T> Toggle<T> {
    /// Applies a bare boolean to `enabled`, handing back a settings table for
    /// the caller to overlay.
    fn split(self, enabled: &mut bool) -> Option<T> {
        match self {
            Self::Enabled(on) => {
                *enabled = on;
                None
            }
            Self::Settings(settings) => Some(settings),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawBasic {
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawMx {
    pub enabled: Option<bool>,
    pub retries: Option<u32>,
    pub fallback_to_a: Option<bool>,
}

impl RawMx {
    fn overlay(self, mx: &mut MxSettings) {
        mx.enabled = self.enabled.unwrap_or(true);
        if let Some(retries) = self.retries {
            mx.retries = retries;
        }
        if let Some(fallback) = self.fallback_to_a {
            mx.fallback_to_a = fallback;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSmtp {
    pub enabled: Option<bool>,
    pub port: Option<u16>,
    pub sender: Option<String>,
    pub helo_name: Option<String>,
    /// Takes precedence over `tls_required` and `opportunistic_tls`.
    pub tls: Option<TlsPolicy>,
    pub tls_required: Option<bool>,
    pub opportunistic_tls: Option<bool>,
    pub verify_mailbox: Option<bool>,
    pub accept_invalid_certs: Option<bool>,
    pub retries: Option<u32>,
    pub greylist_delay_ms: Option<u64>,
}

impl RawSmtp {
    fn overlay(self, smtp: &mut SmtpSettings) {
        smtp.enabled = self.enabled.unwrap_or(true);

        if let Some(port) = self.port {
            smtp.port = port;
        }
        if let Some(sender) = self.sender {
            smtp.sender = sender;
        }
        if let Some(helo_name) = self.helo_name {
            smtp.helo_name = helo_name;
        }

        if let Some(tls) = self.tls {
            smtp.tls = tls;
        } else if self.tls_required == Some(true) {
            smtp.tls = TlsPolicy::Required;
        } else if self.opportunistic_tls == Some(false) {
            smtp.tls = TlsPolicy::Disabled;
        }

        if let Some(verify) = self.verify_mailbox {
            smtp.verify_mailbox = verify;
        }
        if let Some(accept) = self.accept_invalid_certs {
            smtp.accept_invalid_certs = accept;
        }
        if let Some(retries) = self.retries {
            smtp.retries = retries;
        }
        if let Some(delay) = self.greylist_delay_ms {
            smtp.greylist_delay = Duration::from_millis(delay);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawConfig {
    /// One of `fast`, `balanced` or `thorough`.
    pub preset: Option<String>,
    pub early_exit: Option<bool>,
    /// Deadline for each network operation (in milliseconds).
    pub timeout_ms: Option<u64>,
    pub regex: Option<Toggle<RawBasic>>,
    pub typo: Option<Toggle<RawBasic>>,
    pub disposable: Option<Toggle<RawBasic>>,
    pub mx: Option<Toggle<RawMx>>,
    pub smtp: Option<Toggle<RawSmtp>>,
    pub backoff: Option<Backoff>,
    pub rate_limit: Option<RateLimitConfig>,
    pub concurrency: Option<usize>,
    pub continue_on_error: Option<bool>,
}

impl RawConfig {
    /// Parses a RON document. `Some(..)` may be omitted around optional values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is malformed.
    pub fn from_ron_str(s: &str) -> Result<Self, ConfigError> {
        Ok(ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(s)?)
    }

    /// Normalizes this configuration: the preset first, then every explicit
    /// field on top, then validation of the result.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for an unknown preset or any value that fails
    /// validation.
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let mut config = Config::default();
        let validation = &mut config.validation;

        if let Some(name) = &self.preset {
            name.parse::<Preset>()?.apply(validation);
        }

        if let Some(early_exit) = self.early_exit {
            validation.early_exit = early_exit;
        }
        if let Some(timeout) = self.timeout_ms {
            validation.timeout = Duration::from_millis(timeout);
        }
        if let Some(backoff) = self.backoff {
            validation.backoff = backoff;
        }

        overlay_basic(self.regex, &mut validation.regex);
        overlay_basic(self.typo, &mut validation.typo);
        overlay_basic(self.disposable, &mut validation.disposable);

        if let Some(mx) = self.mx.and_then(|mx| mx.split(&mut validation.mx.enabled)) {
            mx.overlay(&mut validation.mx);
        }
        if let Some(smtp) = self
            .smtp
            .and_then(|smtp| smtp.split(&mut validation.smtp.enabled))
        {
            smtp.overlay(&mut validation.smtp);
        }

        config.rate_limit = self.rate_limit;
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(continue_on_error) = self.continue_on_error {
            config.continue_on_error = continue_on_error;
        }

        config.validate()?;
        Ok(config)
    }
}

fn overlay_basic(toggle: Option<Toggle<RawBasic>>, enabled: &mut bool) {
    if let Some(basic) = toggle.and_then(|toggle| toggle.split(enabled)) {
        *enabled = basic.enabled.unwrap_or(true);
    }
}

impl TryFrom<RawConfig> for ValidationConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        raw.resolve().map(|config| config.validation)
    }
}
