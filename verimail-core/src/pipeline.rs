//! Runs the validators against one address and folds their outcomes into a
//! verdict.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Instant};

use futures_util::FutureExt;
use thiserror::Error;
use verimail_common::{
    AggregatedResult, ErrorKind, ValidatorName, ValidatorOutcome, internal, tracing,
};
use verimail_dns::{DnsBackend, DnsError, HickoryBackend, MxResolver};

use crate::{
    config::{ConfigError, ValidationConfig},
    validators::{Context, Validator},
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dns(#[from] DnsError),
}

/// The configured validators, in execution order.
#[derive(Debug, Clone)]
pub struct Pipeline {
    validators: Vec<Validator>,
    early_exit: bool,
}

impl Pipeline {
    /// Creates a pipeline resolving through the system DNS configuration.
    ///
    /// The resolver is only set up when the MX or SMTP validator is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the system
    /// resolver cannot be initialised.
    pub fn new(config: &ValidationConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let backend: Option<Arc<dyn DnsBackend>> = if config.mx.enabled || config.smtp.enabled {
            Some(Arc::new(HickoryBackend::new(config.timeout)?))
        } else {
            None
        };

        Ok(Self::build(config, backend))
    }

    /// Creates a pipeline resolving through `backend`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_backend(
        config: &ValidationConfig,
        backend: Arc<dyn DnsBackend>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self::build(config, Some(backend)))
    }

    fn build(config: &ValidationConfig, backend: Option<Arc<dyn DnsBackend>>) -> Self {
        let resolver = backend.map(|backend| MxResolver::new(backend).with_backoff(config.backoff));

        let validators = ValidatorName::ALL
            .into_iter()
            .filter(|name| config.is_enabled(*name))
            .filter_map(|name| Validator::new(name, config, resolver.as_ref()))
            .collect();

        Self {
            validators,
            early_exit: config.early_exit,
        }
    }

    /// The names of the validators this pipeline runs, in order.
    pub fn stages(&self) -> impl Iterator<Item = ValidatorName> + '_ {
        self.validators.iter().map(Validator::name)
    }

    /// Validates one address.
    ///
    /// Never fails: a stage that errors or panics is recorded as a failing
    /// outcome of kind [`ErrorKind::Custom`] and the run continues. With early
    /// exit, the first blocking failure ends the run and later stages are
    /// absent from the result.
    #[tracing::instrument(level = "debug", skip_all, fields(email = %email))]
    pub async fn validate(&self, email: &str) -> AggregatedResult {
        let start = Instant::now();
        let mut ctx = Context::new(email);
        let mut outcomes = Vec::with_capacity(self.validators.len());

        for validator in &self.validators {
            let name = validator.name();

            let outcome = match AssertUnwindSafe(validator.check(&mut ctx))
                .catch_unwind()
                .await
            {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => {
                    tracing::error!(validator = %name, "Validator failed: {err}");
                    ValidatorOutcome::fail(name, ErrorKind::Custom, err.to_string())
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(validator = %name, "Validator panicked: {message}");
                    ValidatorOutcome::fail(
                        name,
                        ErrorKind::Custom,
                        format!("Validator panicked: {message}"),
                    )
                }
            };

            internal!(
                level = DEBUG,
                validator = %name,
                passed = outcome.passed,
                "Validator finished"
            );

            let stop = self.early_exit && outcome.is_blocking();
            outcomes.push(outcome);

            if stop {
                tracing::debug!(validator = %name, "Stopping early");
                break;
            }
        }

        AggregatedResult::from_outcomes(ctx.email, outcomes, start.elapsed())
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
