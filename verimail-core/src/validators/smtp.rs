use std::time::Duration;

use verimail_common::{Backoff, ErrorKind, ValidatorName, ValidatorOutcome, tracing};
use verimail_dns::{LookupOptions, MxResolver};
use verimail_smtp::{ProbeConfig, ProbeResult, SmtpProber};

use super::{Context, StageError};

/// Probes the preferred mail exchanger for the mailbox.
#[derive(Debug, Clone)]
pub struct SmtpValidator {
    prober: SmtpProber,
    resolver: MxResolver,
    options: LookupOptions,
    /// Additional probe attempts, shared between greylisting and transient
    /// failures.
    retries: u32,
    greylist_delay: Duration,
    backoff: Backoff,
}

impl SmtpValidator {
    #[must_use]
    pub const fn new(
        probe: ProbeConfig,
        resolver: MxResolver,
        options: LookupOptions,
        retries: u32,
        greylist_delay: Duration,
        backoff: Backoff,
    ) -> Self {
        Self {
            prober: SmtpProber::new(probe),
            resolver,
            options,
            retries,
            greylist_delay,
            backoff,
        }
    }

    /// Reuses the MX stage's lookup when there is one, otherwise resolves the
    /// domain itself.
    pub async fn check(&self, ctx: &mut Context) -> Result<ValidatorOutcome, StageError> {
        let Some(domain) = ctx.domain.clone() else {
            return Ok(ctx.missing_domain(ValidatorName::Smtp));
        };

        let lookup = match ctx.dns.take() {
            Some(lookup) => lookup,
            None => self.resolver.resolve(&domain, &self.options).await,
        };

        let lookup = match lookup {
            Ok(lookup) => lookup,
            Err(err) => {
                return Ok(ValidatorOutcome::fail(
                    ValidatorName::Smtp,
                    ErrorKind::MxNotFound,
                    format!("Unable to find a mail server: {err}"),
                ));
            }
        };

        let Some(host) = lookup.preferred_host(&domain) else {
            return Ok(ValidatorOutcome::fail(
                ValidatorName::Smtp,
                ErrorKind::MxNotFound,
                format!("{domain} has no mail servers"),
            ));
        };

        Ok(self.probe(&ctx.email, host).await)
    }

    /// Runs up to `retries + 1` probes.
    ///
    /// A greylisted attempt waits `greylist_delay`, a temporary failure waits
    /// on the backoff. Any other answer ends the loop immediately.
    async fn probe(&self, email: &str, host: &str) -> ValidatorOutcome {
        let attempts = self.retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let remaining = attempt < attempts;

            match self.prober.probe(email, host).await {
                Ok(result) if result.greylisted && remaining => {
                    tracing::debug!(
                        host,
                        attempt,
                        code = result.code,
                        "Recipient greylisted, retrying in {:?}",
                        self.greylist_delay
                    );
                    tokio::time::sleep(self.greylist_delay).await;
                }
                Ok(result) => return outcome(result, attempt),
                Err(err) if err.is_temporary() && remaining => {
                    let delay = self.backoff.delay(attempt - 1);
                    tracing::warn!(
                        host,
                        attempt,
                        "SMTP probe failed: {err}, retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    let outcome =
                        ValidatorOutcome::fail(ValidatorName::Smtp, err.kind(), err.to_string())
                            .with_detail("host", host)
                            .with_detail("port", self.prober.config().port)
                            .with_detail("attempts", attempt);

                    return match err.step() {
                        Some(step) => outcome.with_detail("step", step.to_string()),
                        None => outcome,
                    };
                }
            }
        }
    }
}

fn outcome(result: ProbeResult, attempts: u32) -> ValidatorOutcome {
    let outcome = if result.valid {
        ValidatorOutcome::pass(ValidatorName::Smtp)
    } else if result.greylisted {
        ValidatorOutcome::fail(
            ValidatorName::Smtp,
            ErrorKind::SmtpConnectionFailed,
            format!(
                "Mailbox temporarily unavailable after {attempts} attempt(s): {} {}",
                result.code, result.message
            ),
        )
    } else {
        ValidatorOutcome::fail(
            ValidatorName::Smtp,
            ErrorKind::SmtpMailboxNotFound,
            format!("Mailbox does not exist: {} {}", result.code, result.message),
        )
    };

    outcome
        .with_detail("code", result.code)
        .with_detail("message", result.message)
        .with_detail("mailbox_exists", result.mailbox_exists)
        .with_detail("greylisted", result.greylisted)
        .with_detail("tls", result.tls)
        .with_detail("host", result.host)
        .with_detail("port", result.port)
        .with_detail("attempts", attempts)
}
