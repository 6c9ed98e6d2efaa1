//! Mailbox probing over SMTP.
//!
//! A probe walks one connection through greeting, EHLO (or HELO), optional
//! STARTTLS, MAIL FROM and RCPT TO, then always sends QUIT and closes the
//! connection, whichever way the conversation ended.

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    client::{Response, SmtpClient},
    error::{ClientError, ProbeError, Step},
};

/// How STARTTLS is used during a probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsPolicy {
    /// Upgrade when the server advertises STARTTLS, otherwise stay in plaintext.
    /// A failed handshake reconnects once without TLS (RFC 3207 section 4.1).
    #[default]
    Opportunistic,
    /// Fail unless the conversation can be upgraded.
    Required,
    /// Never send STARTTLS.
    Disabled,
}

/// Deadlines for each step of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmtpTimeouts {
    pub connect: Duration,
    pub greeting: Duration,
    pub ehlo: Duration,
    /// Covers both the command and the handshake.
    pub starttls: Duration,
    pub mail_from: Duration,
    pub rcpt_to: Duration,
    pub quit: Duration,
}

impl SmtpTimeouts {
    /// The longest QUIT is ever waited for.
    pub const MAX_QUIT: Duration = Duration::from_secs(5);

    /// Applies `timeout` to every step, capping QUIT at [`Self::MAX_QUIT`].
    #[must_use]
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            connect: timeout,
            greeting: timeout,
            ehlo: timeout,
            starttls: timeout,
            mail_from: timeout,
            rcpt_to: timeout,
            quit: timeout.min(Self::MAX_QUIT),
        }
    }
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self::uniform(Duration::from_secs(10))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    pub port: u16,
    /// Reverse path used in `MAIL FROM`.
    pub sender: String,
    /// Name announced in `EHLO`/`HELO`.
    pub helo_name: String,
    pub tls: TlsPolicy,
    /// When `false` the probe stops after `MAIL FROM`.
    pub verify_mailbox: bool,
    pub accept_invalid_certs: bool,
    pub timeouts: SmtpTimeouts,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port: 25,
            sender: "verify-probe@example.com".to_string(),
            helo_name: "localhost".to_string(),
            tls: TlsPolicy::default(),
            verify_mailbox: true,
            accept_invalid_certs: true,
            timeouts: SmtpTimeouts::default(),
        }
    }
}

/// What the server said about the mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub valid: bool,
    pub mailbox_exists: bool,
    /// The server deferred the recipient with a 450 or 451.
    pub greylisted: bool,
    /// Code and text of the reply that decided the result.
    pub code: u16,
    pub message: String,
    /// Whether the deciding reply arrived over TLS.
    pub tls: bool,
    pub host: String,
    pub port: u16,
}

/// Probes whether a mail exchanger accepts a recipient.
#[derive(Debug, Clone, Default)]
pub struct SmtpProber {
    config: ProbeConfig,
}

impl SmtpProber {
    #[must_use]
    pub const fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Asks `mx_host` whether it would accept mail for `email`.
    ///
    /// With [`TlsPolicy::Opportunistic`], a failed TLS handshake is followed by
    /// one plaintext attempt on a fresh connection.
    ///
    /// # Errors
    ///
    /// Returns a `ProbeError` if the connection cannot be established, a step
    /// times out, or the server answers a step with an unexpected code.
    #[tracing::instrument(level = "debug", skip_all, fields(host = %mx_host, port = self.config.port))]
    pub async fn probe(&self, email: &str, mx_host: &str) -> Result<ProbeResult, ProbeError> {
        match self.attempt(email, mx_host, self.config.tls).await {
            Err(ProbeError::Tls(reason)) if self.config.tls == TlsPolicy::Opportunistic => {
                info!(
                    %reason,
                    "TLS negotiation failed, reconnecting without TLS per RFC 3207 Section 4.1"
                );
                self.attempt(email, mx_host, TlsPolicy::Disabled).await
            }
            result => result,
        }
    }

    async fn attempt(
        &self,
        email: &str,
        mx_host: &str,
        tls: TlsPolicy,
    ) -> Result<ProbeResult, ProbeError> {
        let address = format!("{mx_host}:{}", self.config.port);
        let timeouts = &self.config.timeouts;

        let mut client = tokio::time::timeout(
            timeouts.connect,
            SmtpClient::connect(&address, mx_host),
        )
        .await
        .map_err(|_| ProbeError::Timeout {
            step: Step::Connect,
            timeout: timeouts.connect,
        })?
        .map_err(|err| match err {
            ClientError::Io(source) => ProbeError::Connect {
                address: address.clone(),
                source,
            },
            source => ProbeError::Client {
                step: Step::Connect,
                source,
            },
        })?
        .accept_invalid_certs(self.config.accept_invalid_certs);

        let result = self.converse(&mut client, email, tls).await;

        // Every path past connect ends here.
        if let Err(err) = timed(Step::Quit, timeouts.quit, client.quit()).await {
            debug!("Ignoring QUIT failure: {err}");
        }
        client.close().await;

        result.map(|(response, tls)| self.classify(response, tls, mx_host))
    }

    /// Runs the conversation up to the deciding reply.
    async fn converse(
        &self,
        client: &mut SmtpClient,
        email: &str,
        tls: TlsPolicy,
    ) -> Result<(Decision, bool), ProbeError> {
        let timeouts = &self.config.timeouts;
        let helo_name = self.config.helo_name.as_str();

        let greeting = timed(Step::Greeting, timeouts.greeting, client.read_greeting()).await?;
        expect(Step::Greeting, &greeting, &[220])?;

        let ehlo = timed(Step::Ehlo, timeouts.ehlo, client.ehlo(helo_name)).await?;
        let supports_starttls = if ehlo.code == 250 {
            ehlo.has_extension("STARTTLS")
        } else {
            debug!(code = ehlo.code, "EHLO rejected, falling back to HELO");
            let helo = timed(Step::Helo, timeouts.ehlo, client.helo(helo_name)).await?;
            expect(Step::Helo, &helo, &[250])?;
            false
        };

        self.negotiate_tls(client, tls, supports_starttls).await?;

        let mail_from = timed(
            Step::MailFrom,
            timeouts.mail_from,
            client.mail_from(&self.config.sender),
        )
        .await?;
        expect(Step::MailFrom, &mail_from, &[250])?;

        if !self.config.verify_mailbox {
            return Ok((Decision::Connected(mail_from), client.is_tls()));
        }

        let rcpt = timed(Step::RcptTo, timeouts.rcpt_to, client.rcpt_to(email)).await?;
        let decision = match rcpt.code {
            250 | 251 => Decision::Exists(rcpt),
            450 | 451 => Decision::Greylisted(rcpt),
            550 | 551 | 553 => Decision::Absent(rcpt),
            code => {
                return Err(ProbeError::Rejected {
                    step: Step::RcptTo,
                    code,
                    message: rcpt.message().to_string(),
                });
            }
        };

        Ok((decision, client.is_tls()))
    }

    /// Upgrades the connection when `policy` and the server allow it.
    ///
    /// A refused `STARTTLS` under the opportunistic policy continues in
    /// plaintext on the same connection; a failed handshake surfaces as
    /// [`ProbeError::Tls`] so that [`Self::probe`] can reconnect.
    async fn negotiate_tls(
        &self,
        client: &mut SmtpClient,
        policy: TlsPolicy,
        supports_starttls: bool,
    ) -> Result<(), ProbeError> {
        let timeouts = &self.config.timeouts;

        match (policy, supports_starttls) {
            (TlsPolicy::Disabled, _) | (TlsPolicy::Opportunistic, false) => return Ok(()),
            (TlsPolicy::Required, false) => return Err(ProbeError::TlsUnavailable),
            (TlsPolicy::Required | TlsPolicy::Opportunistic, true) => {}
        }

        let response = timed(Step::StartTls, timeouts.starttls, client.starttls()).await?;
        if response.code != 220 {
            if policy == TlsPolicy::Required {
                return Err(rejected(Step::StartTls, &response));
            }
            info!(
                code = response.code,
                "Server refused STARTTLS, continuing without TLS"
            );
            return Ok(());
        }

        match tokio::time::timeout(timeouts.starttls, client.upgrade_to_tls()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(ProbeError::Tls(err.to_string())),
            Err(_) => {
                return Err(ProbeError::Tls(format!(
                    "handshake timed out after {:?}",
                    timeouts.starttls
                )));
            }
        }

        // RFC 3207: the client must discard what it knew and re-issue EHLO.
        let ehlo = timed(
            Step::Ehlo,
            timeouts.ehlo,
            client.ehlo(&self.config.helo_name),
        )
        .await?;
        expect(Step::Ehlo, &ehlo, &[250])?;

        debug!("TLS successfully negotiated via STARTTLS");
        Ok(())
    }

    fn classify(&self, decision: Decision, tls: bool, mx_host: &str) -> ProbeResult {
        let (valid, mailbox_exists, greylisted, response) = match decision {
            Decision::Exists(response) => (true, true, false, response),
            Decision::Greylisted(response) => (false, false, true, response),
            Decision::Absent(response) => (false, false, false, response),
            Decision::Connected(response) => (true, false, false, response),
        };

        if greylisted {
            warn!(code = response.code, "Recipient greylisted");
        }

        ProbeResult {
            valid,
            mailbox_exists,
            greylisted,
            code: response.code,
            message: response.message().to_string(),
            tls,
            host: mx_host.to_string(),
            port: self.config.port,
        }
    }
}

/// The reply that ended a successful conversation.
enum Decision {
    Exists(Response),
    Greylisted(Response),
    Absent(Response),
    /// Mailbox verification was turned off; `MAIL FROM` was accepted.
    Connected(Response),
}

async fn timed<F>(step: Step, timeout: Duration, fut: F) -> Result<Response, ProbeError>
where
    F: Future<Output = Result<Response, ClientError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ProbeError::Timeout { step, timeout })?
        .map_err(|source| ProbeError::Client { step, source })
}

fn expect(step: Step, response: &Response, codes: &[u16]) -> Result<(), ProbeError> {
    if codes.contains(&response.code) {
        Ok(())
    } else {
        Err(rejected(step, response))
    }
}

fn rejected(step: Step, response: &Response) -> ProbeError {
    ProbeError::Rejected {
        step,
        code: response.code,
        message: response.message().to_string(),
    }
}
