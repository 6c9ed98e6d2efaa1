//! The five built-in validators.
//!
//! A pipeline holds a fixed, ordered list of [`Validator`]s and runs each one
//! against a shared [`Context`] for the address being checked.

pub mod disposable;
pub mod mx;
pub mod smtp;
pub mod syntax;
pub mod typo;

use thiserror::Error;
use verimail_common::{Domain, ErrorKind, Severity, ValidatorName, ValidatorOutcome};
use verimail_dns::{DnsError, DnsLookupResult, MxResolver};

pub use disposable::DisposableValidator;
pub use mx::MxValidator;
pub use smtp::SmtpValidator;
pub use syntax::SyntaxValidator;
pub use typo::TypoValidator;

use crate::config::ValidationConfig;

/// A failure a validator could not classify.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Unable to record outcome details: {0}")]
    Details(#[from] serde_json::Error),
}

/// State carried from one stage to the next while checking one address.
#[derive(Debug)]
pub struct Context {
    /// The trimmed address.
    pub email: String,
    /// Everything after the last `@`, lowercased.
    pub domain: Option<Domain>,
    /// The MX stage's lookup, consumed by the SMTP stage.
    pub dns: Option<Result<DnsLookupResult, DnsError>>,
}

impl Context {
    #[must_use]
    pub fn new(email: &str) -> Self {
        let email = email.trim();

        Self {
            email: email.to_string(),
            domain: Domain::from_email(email),
            dns: None,
        }
    }

    /// The outcome of a stage that needs a domain when the address has none.
    #[must_use]
    pub fn missing_domain(&self, name: ValidatorName) -> ValidatorOutcome {
        let outcome = ValidatorOutcome::fail(
            name,
            ErrorKind::SyntaxInvalid,
            format!("'{}' has no domain part", self.email),
        );

        if name == ValidatorName::Typo {
            outcome.with_severity(Severity::Warning)
        } else {
            outcome
        }
    }
}

#[derive(Debug, Clone)]
pub enum Validator {
    Syntax(SyntaxValidator),
    Typo(TypoValidator),
    Disposable(DisposableValidator),
    Mx(MxValidator),
    Smtp(Box<SmtpValidator>),
}

impl Validator {
    /// Builds the validator for `name` from `config`.
    ///
    /// Returns `None` for the network validators when there is no resolver.
    #[must_use]
    pub fn new(
        name: ValidatorName,
        config: &ValidationConfig,
        resolver: Option<&MxResolver>,
    ) -> Option<Self> {
        let validator = match name {
            ValidatorName::Regex => Self::Syntax(SyntaxValidator),
            ValidatorName::Typo => Self::Typo(TypoValidator),
            ValidatorName::Disposable => Self::Disposable(DisposableValidator),
            ValidatorName::Mx => Self::Mx(MxValidator::new(
                resolver?.clone(),
                config.lookup_options(),
            )),
            ValidatorName::Smtp => Self::Smtp(Box::new(SmtpValidator::new(
                config.probe_config(),
                resolver?.clone(),
                config.lookup_options(),
                config.smtp.retries,
                config.smtp.greylist_delay,
                config.backoff,
            ))),
        };

        Some(validator)
    }

    #[must_use]
    pub const fn name(&self) -> ValidatorName {
        match self {
            Self::Syntax(_) => ValidatorName::Regex,
            Self::Typo(_) => ValidatorName::Typo,
            Self::Disposable(_) => ValidatorName::Disposable,
            Self::Mx(_) => ValidatorName::Mx,
            Self::Smtp(_) => ValidatorName::Smtp,
        }
    }

    /// Runs this validator against the address in `ctx`.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] only for failures the validator could not turn
    /// into an outcome of its own.
    pub async fn check(&self, ctx: &mut Context) -> Result<ValidatorOutcome, StageError> {
        let outcome = match self {
            Self::Syntax(syntax) => syntax.check(&ctx.email),
            Self::Typo(typo) => match &ctx.domain {
                Some(domain) => typo.check(domain),
                None => ctx.missing_domain(ValidatorName::Typo),
            },
            Self::Disposable(disposable) => match &ctx.domain {
                Some(domain) => disposable.check(domain),
                None => ctx.missing_domain(ValidatorName::Disposable),
            },
            Self::Mx(mx) => mx.check(ctx).await?,
            Self::Smtp(smtp) => smtp.check(ctx).await?,
        };

        Ok(outcome)
    }
}
