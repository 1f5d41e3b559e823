//! Handing a message to a single mail exchanger.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use outpost_common::{Message, tracing};
use outpost_smtp::{Response, SmtpClient};
use tokio::time::timeout;

use crate::{TransportError, render::render};

/// Delivers one message to one host. Implementations must give up once
/// `timeout` has elapsed.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(
        &self,
        host: &str,
        message: &Message,
        timeout: Duration,
    ) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsOutcome {
    Upgraded,
    Skipped,
    /// STARTTLS was advertised but failed; RFC 3207 allows retrying in
    /// plain text on a fresh connection.
    RetryWithoutTls,
}

/// SMTP delivery over port 25 with opportunistic STARTTLS.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    helo_name: String,
    port: u16,
    accept_invalid_certs: bool,
}

impl SmtpTransport {
    #[must_use]
    pub fn new(helo_name: impl Into<String>) -> Self {
        Self {
            helo_name: helo_name.into(),
            port: 25,
            accept_invalid_certs: false,
        }
    }

    /// Port used for hosts given without one.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    fn address(&self, host: &str) -> (String, String) {
        if let Some((name, port)) = host.rsplit_once(':')
            && !name.contains(':')
            && port.parse::<u16>().is_ok()
        {
            return (host.to_string(), name.to_string());
        }
        (format!("{host}:{}", self.port), host.to_string())
    }

    async fn connect(
        &self,
        address: &str,
        server_name: &str,
    ) -> Result<SmtpClient, TransportError> {
        let mut client = SmtpClient::connect(address, server_name)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{address}: {e}")))?
            .accept_invalid_certs(self.accept_invalid_certs);

        let greeting = client.read_greeting().await?;
        expect(&greeting, "greeting")?;

        Ok(client)
    }

    async fn ehlo(&self, client: &mut SmtpClient) -> Result<Response, TransportError> {
        let response = client.ehlo(&self.helo_name).await?;
        if response.is_success() {
            return Ok(response);
        }

        // Servers without ESMTP.
        let response = client.helo(&self.helo_name).await?;
        expect(&response, "HELO")?;
        Ok(response)
    }

    async fn negotiate_tls(
        &self,
        client: &mut SmtpClient,
        server_name: &str,
    ) -> Result<TlsOutcome, TransportError> {
        let ehlo = self.ehlo(client).await?;
        if !ehlo.supports("STARTTLS") {
            return Ok(TlsOutcome::Skipped);
        }

        match client.starttls().await {
            Ok(response) if response.is_success() => {
                let ehlo = client.ehlo(&self.helo_name).await?;
                expect(&ehlo, "EHLO after STARTTLS")?;
                tracing::debug!(server = server_name, "TLS negotiated via STARTTLS");
                Ok(TlsOutcome::Upgraded)
            }
            Ok(response) => {
                tracing::info!(
                    server = server_name,
                    %response,
                    "STARTTLS refused, retrying without TLS"
                );
                Ok(TlsOutcome::RetryWithoutTls)
            }
            Err(err) => {
                tracing::info!(
                    server = server_name,
                    error = %err,
                    "STARTTLS failed, retrying without TLS"
                );
                Ok(TlsOutcome::RetryWithoutTls)
            }
        }
    }

    async fn transact(&self, host: &str, message: &Message) -> Result<(), TransportError> {
        let (address, server_name) = self.address(host);

        let mut client = self.connect(&address, &server_name).await?;
        if self.negotiate_tls(&mut client, &server_name).await? == TlsOutcome::RetryWithoutTls {
            drop(client);
            client = self.connect(&address, &server_name).await?;
            self.ehlo(&mut client).await?;
        }
        tracing::debug!(server = %address, tls = client.is_tls(), "SMTP session established");

        expect(&client.mail_from(&message.from).await?, "MAIL FROM")?;
        for recipient in message.recipients() {
            expect(&client.rcpt_to(recipient).await?, "RCPT TO")?;
        }

        let data = client.data().await?;
        if !data.is_intermediate() {
            return Err(rejected(&data));
        }
        let accepted = client.send_data(&render(message, Utc::now())).await?;
        expect(&accepted, "DATA")?;

        if let Err(err) = client.quit().await {
            tracing::debug!(
                server = %address,
                error = %err,
                "QUIT failed after successful delivery"
            );
        }

        Ok(())
    }
}

fn rejected(response: &Response) -> TransportError {
    TransportError::Rejected {
        code: response.code,
        message: response.message(),
    }
}

fn expect(response: &Response, stage: &str) -> Result<(), TransportError> {
    if response.is_success() {
        Ok(())
    } else {
        tracing::debug!(stage, %response, "Server rejected command");
        Err(rejected(response))
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn deliver(
        &self,
        host: &str,
        message: &Message,
        limit: Duration,
    ) -> Result<(), TransportError> {
        timeout(limit, self.transact(host, message))
            .await
            .map_err(|_| TransportError::Timeout(limit))?
    }
}
