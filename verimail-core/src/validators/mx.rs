use verimail_common::{ErrorKind, ValidatorName, ValidatorOutcome};
use verimail_dns::{DnsLookupResult, LookupOptions, MxResolver};

use super::{Context, StageError};

/// Checks that the domain has somewhere to deliver mail.
#[derive(Debug, Clone)]
pub struct MxValidator {
    resolver: MxResolver,
    options: LookupOptions,
}

impl MxValidator {
    #[must_use]
    pub const fn new(resolver: MxResolver, options: LookupOptions) -> Self {
        Self { resolver, options }
    }

    /// Resolves the domain and leaves the lookup in `ctx` for the SMTP stage.
    pub async fn check(&self, ctx: &mut Context) -> Result<ValidatorOutcome, StageError> {
        let Some(domain) = ctx.domain.clone() else {
            return Ok(ctx.missing_domain(ValidatorName::Mx));
        };

        let lookup = self.resolver.resolve(&domain, &self.options).await;

        let outcome = match &lookup {
            Ok(result) if result.accepts_mail() => {
                details(ValidatorOutcome::pass(ValidatorName::Mx), result)?
            }
            Ok(result) => details(
                ValidatorOutcome::fail(
                    ValidatorName::Mx,
                    ErrorKind::MxNotFound,
                    format!("{domain} has no mail servers"),
                ),
                result,
            )?,
            Err(err) => ValidatorOutcome::fail(ValidatorName::Mx, err.kind(), err.to_string()),
        };

        ctx.dns = Some(lookup);
        Ok(outcome)
    }
}

fn details(
    outcome: ValidatorOutcome,
    result: &DnsLookupResult,
) -> Result<ValidatorOutcome, StageError> {
    Ok(outcome
        .with_detail("mx_records", serde_json::to_value(&result.mx_records)?)
        .with_detail("a_records", serde_json::to_value(&result.a_records)?)
        .with_detail("quality_score", result.quality_score)
        .with_detail("attempts", result.attempts))
}
