//! The mail transport: one authenticated relay session per running job.

use std::time::Duration;

use async_trait::async_trait;
use missive_common::{internal, outgoing};
use missive_smtp::client::{ClientError, MessageBuilder, Response, SmtpClient};
use missive_store::DispatchOutcome;

use crate::{
    batch::RecipientRecord,
    error::{ConnectError, SendError},
    types::{JobConfig, SmtpTimeouts},
};

/// A live session against the mail relay.
///
/// Owned exclusively by the dispatch job for the duration of one run and
/// never persisted. The contract:
///
/// - `connect` fails with a [`ConnectError`] on network/auth failure; such a
///   failure is fatal to the whole job
/// - `send` never returns an error for a per-recipient failure; it classifies
///   the failure into a `Failed` outcome and the batch continues
/// - `keep_alive` is a best-effort idle ping; failures are logged and
///   otherwise ignored
/// - `close` is idempotent and safe to call even if `connect` never succeeded
#[async_trait]
pub trait MailTransport: Send {
    /// Establish the relay session.
    ///
    /// # Errors
    /// Returns a connect-class error on network, TLS, or auth failure.
    async fn connect(&mut self) -> Result<(), ConnectError>;

    /// Attempt one record. Exactly one outbound message on success, zero on
    /// failure.
    async fn send(&mut self, record: &RecipientRecord) -> DispatchOutcome;

    /// Ping the relay so it does not time out the idle session.
    async fn keep_alive(&mut self);

    /// Tear the session down. Safe to call repeatedly.
    async fn close(&mut self);
}

/// [`MailTransport`] over a real SMTP smarthost.
///
/// Connection sequence: TCP connect, 220 greeting, EHLO, STARTTLS when TLS
/// is required (with a second EHLO after the upgrade), then AUTH when a
/// credential is configured. AUTH PLAIN is preferred; AUTH LOGIN is used when
/// the relay advertises only LOGIN.
///
/// Every wire operation is bounded by a per-operation timeout from
/// [`SmtpTimeouts`].
pub struct SmtpRelayTransport {
    relay_host: String,
    relay_port: u16,
    helo_name: String,
    require_tls: bool,
    accept_invalid_certs: bool,
    timeouts: SmtpTimeouts,
    config: JobConfig,
    client: Option<SmtpClient>,
}

impl SmtpRelayTransport {
    #[must_use]
    pub const fn new(
        relay_host: String,
        relay_port: u16,
        helo_name: String,
        require_tls: bool,
        accept_invalid_certs: bool,
        timeouts: SmtpTimeouts,
        config: JobConfig,
    ) -> Self {
        Self {
            relay_host,
            relay_port,
            helo_name,
            require_tls,
            accept_invalid_certs,
            timeouts,
            config,
            client: None,
        }
    }

    async fn ehlo(client: &mut SmtpClient, helo_name: &str, secs: u64) -> Result<Response, ConnectError> {
        let response = tokio::time::timeout(Duration::from_secs(secs), client.ehlo(helo_name))
            .await
            .map_err(|_| ConnectError::Timeout(format!("EHLO timed out after {secs}s")))?
            .map_err(|e| ConnectError::Connection(e.to_string()))?;

        if !response.is_success() {
            return Err(ConnectError::Rejected(format!(
                "Relay rejected EHLO: {}",
                response.message()
            )));
        }

        Ok(response)
    }

    /// Authenticate using the mechanism the relay advertises.
    ///
    /// The EHLO capability line looks like `AUTH PLAIN LOGIN ...`; PLAIN is
    /// preferred, LOGIN is the fallback when PLAIN is not offered.
    async fn authenticate(
        client: &mut SmtpClient,
        ehlo_response: &Response,
        username: &str,
        credential: &str,
        secs: u64,
    ) -> Result<(), ConnectError> {
        let mechanisms = ehlo_response
            .lines
            .iter()
            .find(|line| line.to_ascii_uppercase().starts_with("AUTH "))
            .map(|line| line.to_ascii_uppercase());

        let use_login = mechanisms
            .as_deref()
            .is_some_and(|m| m.contains("LOGIN") && !m.contains("PLAIN"));

        let timeout = Duration::from_secs(secs);
        let response = if use_login {
            tokio::time::timeout(timeout, client.auth_login(username, credential)).await
        } else {
            tokio::time::timeout(timeout, client.auth_plain(username, credential)).await
        }
        .map_err(|_| ConnectError::Timeout(format!("AUTH timed out after {secs}s")))?
        .map_err(|e| ConnectError::Auth(e.to_string()))?;

        if !response.is_success() {
            return Err(ConnectError::Auth(format!(
                "Relay refused credentials ({}): {}",
                response.code,
                response.message()
            )));
        }

        Ok(())
    }

    /// Run the per-record SMTP transaction.
    ///
    /// Any failure leaves the session in an unknown transaction state; the
    /// caller issues a best-effort RSET before the next record.
    async fn transact(&mut self, record: &RecipientRecord) -> Result<(), SendError> {
        let message = MessageBuilder::new()
            .from(self.config.from_header())
            .to(record.recipient_address.clone())
            .subject(record.subject.clone())
            .body(record.body.clone())
            .build()
            .map_err(|e| SendError::MessageBuild(e.to_string()))?;

        let client = self
            .client
            .as_mut()
            .ok_or_else(|| SendError::ConnectionLost("no active relay session".into()))?;

        let from = self.config.from_address.clone();
        let response = send_step(
            self.timeouts.mail_from_secs,
            "MAIL FROM",
            client.mail_from(&from, None),
        )
        .await?;
        expect_success("MAIL FROM", &response)?;

        let response = send_step(
            self.timeouts.rcpt_to_secs,
            "RCPT TO",
            client.rcpt_to(&record.recipient_address),
        )
        .await?;
        expect_success("RCPT TO", &response)?;

        let response = send_step(self.timeouts.data_secs, "DATA", client.data()).await?;
        if !response.is_intermediate() {
            return Err(SendError::Rejected {
                code: response.code,
                message: format!("DATA: {}", response.message()),
            });
        }

        let response =
            send_step(self.timeouts.data_secs, "message data", client.send_data(&message)).await?;
        expect_success("message data", &response)?;

        Ok(())
    }

    /// Best-effort RSET so a failed transaction does not poison the next one.
    async fn reset_session(&mut self) {
        if let Some(client) = self.client.as_mut() {
            let timeout = Duration::from_secs(self.timeouts.noop_secs);
            match tokio::time::timeout(timeout, client.rset()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!("RSET after failed send returned error: {e}"),
                Err(_) => tracing::warn!("RSET after failed send timed out"),
            }
        }
    }
}

#[async_trait]
impl MailTransport for SmtpRelayTransport {
    async fn connect(&mut self) -> Result<(), ConnectError> {
        let addr = format!("{}:{}", self.relay_host, self.relay_port);
        internal!(level = DEBUG, "Connecting to relay {addr}");

        let connect_timeout = Duration::from_secs(self.timeouts.connect_secs);
        let mut client = tokio::time::timeout(
            connect_timeout,
            SmtpClient::connect(&addr, self.relay_host.clone()),
        )
        .await
        .map_err(|_| {
            ConnectError::Timeout(format!(
                "Connect to {addr} timed out after {}s",
                self.timeouts.connect_secs
            ))
        })?
        .map_err(|e| ConnectError::Connection(format!("Failed to connect to {addr}: {e}")))?
        .accept_invalid_certs(self.accept_invalid_certs);

        if self.accept_invalid_certs {
            tracing::warn!(
                relay = %addr,
                "TLS certificate validation is disabled for this relay session"
            );
        }

        let greeting = tokio::time::timeout(connect_timeout, client.read_greeting())
            .await
            .map_err(|_| ConnectError::Timeout("Greeting timed out".into()))?
            .map_err(|e| ConnectError::Connection(e.to_string()))?;

        if !greeting.is_success() {
            return Err(ConnectError::Rejected(format!(
                "Relay rejected connection: {}",
                greeting.message()
            )));
        }

        let mut ehlo_response =
            Self::ehlo(&mut client, &self.helo_name, self.timeouts.ehlo_secs).await?;

        if self.require_tls {
            let starttls_timeout = Duration::from_secs(self.timeouts.starttls_secs);
            let response = tokio::time::timeout(starttls_timeout, client.starttls())
                .await
                .map_err(|_| ConnectError::Timeout("STARTTLS timed out".into()))?
                .map_err(|e| ConnectError::Tls(e.to_string()))?;

            if !response.is_success() {
                return Err(ConnectError::Tls(format!(
                    "Relay refused STARTTLS: {}",
                    response.message()
                )));
            }

            // Capabilities must be re-learned on the encrypted channel
            ehlo_response =
                Self::ehlo(&mut client, &self.helo_name, self.timeouts.ehlo_secs).await?;
        }

        if let Some(credential) = self.config.credential.clone() {
            Self::authenticate(
                &mut client,
                &ehlo_response,
                &self.config.from_address,
                &credential,
                self.timeouts.auth_secs,
            )
            .await?;
        }

        internal!(level = DEBUG, "Relay session established with {addr}");
        self.client = Some(client);

        Ok(())
    }

    async fn send(&mut self, record: &RecipientRecord) -> DispatchOutcome {
        let recipient = record.display_label().to_string();

        if !record.has_address() {
            return DispatchOutcome::Failed {
                recipient,
                reason: SendError::MissingAddress.to_string(),
            };
        }

        match self.transact(record).await {
            Ok(()) => {
                outgoing!(
                    level = INFO,
                    "Sent message to {recipient} <{}>",
                    record.recipient_address
                );
                DispatchOutcome::Success {
                    recipient,
                    address: record.recipient_address.clone(),
                }
            }
            Err(e) => {
                tracing::warn!("Send to {recipient} failed: {e}");
                self.reset_session().await;
                DispatchOutcome::Failed {
                    recipient,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn keep_alive(&mut self) {
        let Some(client) = self.client.as_mut() else {
            return;
        };

        let timeout = Duration::from_secs(self.timeouts.noop_secs);
        match tokio::time::timeout(timeout, client.noop()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("Keep-alive NOOP returned error: {e}"),
            Err(_) => tracing::warn!("Keep-alive NOOP timed out"),
        }
    }

    async fn close(&mut self) {
        if let Some(mut client) = self.client.take() {
            let timeout = Duration::from_secs(self.timeouts.quit_secs);
            match tokio::time::timeout(timeout, client.quit()).await {
                Ok(Ok(_)) => internal!(level = DEBUG, "Relay session closed"),
                Ok(Err(e)) => tracing::warn!("QUIT returned error: {e}"),
                Err(_) => tracing::warn!("QUIT timed out"),
            }
        }
    }
}

/// Bound one send-phase wire operation by its timeout.
async fn send_step<F>(secs: u64, what: &str, op: F) -> Result<Response, SendError>
where
    F: std::future::Future<Output = Result<Response, ClientError>>,
{
    tokio::time::timeout(Duration::from_secs(secs), op)
        .await
        .map_err(|_| SendError::Timeout(format!("{what} timed out after {secs}s")))?
        .map_err(|e| SendError::ConnectionLost(format!("{what}: {e}")))
}

fn expect_success(what: &str, response: &Response) -> Result<(), SendError> {
    if response.is_success() {
        Ok(())
    } else {
        Err(SendError::Rejected {
            code: response.code,
            message: format!("{what}: {}", response.message()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> SmtpRelayTransport {
        SmtpRelayTransport::new(
            "relay.example.com".into(),
            587,
            "localhost".into(),
            false,
            false,
            SmtpTimeouts::default(),
            JobConfig {
                from_address: "sender@example.com".into(),
                from_display_name: Some("Sender".into()),
                credential: None,
                inter_send_delay_secs: None,
            },
        )
    }

    #[tokio::test]
    async fn test_missing_address_fails_without_session() {
        // Validation failures never touch the wire; no connect needed.
        let mut transport = transport();

        let record = RecipientRecord {
            recipient_address: String::new(),
            display_name: "Acme".into(),
            subject: "Hi".into(),
            body: "Hello".into(),
            raw_payload: String::new(),
        };

        let outcome = transport.send(&record).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Failed {
                recipient: "Acme".into(),
                reason: "no email address found".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_send_without_connect_reports_lost_session() {
        let mut transport = transport();

        let record = RecipientRecord {
            recipient_address: "ops@acme.example".into(),
            display_name: "Acme".into(),
            subject: "Hi".into(),
            body: "Hello".into(),
            raw_payload: String::new(),
        };

        match transport.send(&record).await {
            DispatchOutcome::Failed { reason, .. } => {
                assert!(reason.contains("no active relay session"));
            }
            other => panic!("expected Failed outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent_without_session() {
        let mut transport = transport();
        transport.close().await;
        transport.close().await;
        transport.keep_alive().await;
    }
}
