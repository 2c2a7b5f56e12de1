//! SMTP submission through `lettre`
//!
//! The message is already a finished MIME document, so it is handed to
//! the server with `send_raw`. The SMTP envelope is read back out of its
//! headers, and the `Bcc` header is removed before submission.

use crate::config::AccountConfig;
use crate::error::{Error, Result};
use crate::message::parse_address_list;
use crate::transport::SubmissionTransport;
use async_trait::async_trait;
use lettre::address::{Address, Envelope};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use mailparse::MailHeaderMap;
use std::borrow::Cow;
use std::io;
use tracing::{debug, info};

/// Implicit TLS submission port; anything else negotiates STARTTLS.
const SMTPS_PORT: u16 = 465;

/// SMTP reply codes that mean the credentials were refused.
const AUTH_FAILURE_CODES: [&str; 3] = ["530", "534", "535"];

#[derive(Debug, Clone)]
pub struct SmtpSubmission {
    host: String,
    port: u16,
    accept_invalid_certs: bool,
    mechanism: Mechanism,
}

impl SmtpSubmission {
    /// XOAUTH2 submission to the account's SMTP server.
    #[must_use]
    pub fn new(config: &AccountConfig) -> Self {
        Self {
            host: config.smtp_host.clone(),
            port: config.smtp_port,
            accept_invalid_certs: config.accept_invalid_certs,
            mechanism: Mechanism::Xoauth2,
        }
    }

    /// Authenticate with `AUTH PLAIN`, the token acting as password.
    #[must_use]
    pub const fn with_password_auth(mut self) -> Self {
        self.mechanism = Mechanism::Plain;
        self
    }

    fn transport(&self, email: &str, token: &str) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let mut tls = TlsParameters::builder(self.host.clone());
        if self.accept_invalid_certs {
            tls = tls
                .dangerous_accept_invalid_certs(true)
                .dangerous_accept_invalid_hostnames(true);
        }
        let tls = tls
            .build()
            .map_err(|e| Error::Tls(format!("SMTP TLS setup failed: {e}")))?;
        let tls = if self.port == SMTPS_PORT {
            Tls::Wrapper(tls)
        } else {
            Tls::Required(tls)
        };

        Ok(
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host)
                .port(self.port)
                .tls(tls)
                .credentials(Credentials::new(email.to_string(), token.to_string()))
                .authentication(vec![self.mechanism])
                .build(),
        )
    }
}

/// Build the SMTP envelope from a raw message's address headers.
///
/// The sender falls back to `account` when the message has no `From`.
fn envelope_of(account: &str, raw: &[u8]) -> Result<Envelope> {
    let (headers, _) = mailparse::parse_headers(raw)
        .map_err(|e| Error::Smtp(format!("Unparseable message headers: {e}")))?;

    let parse = |addr: &str| {
        addr.parse::<Address>()
            .map_err(|e| Error::Smtp(format!("Invalid address {addr}: {e}")))
    };

    let from = headers
        .get_first_value("From")
        .and_then(|v| parse_address_list(&v).into_iter().next())
        .map_or_else(|| account.to_string(), |a| a.address);

    let mut recipients = Vec::new();
    for name in ["To", "Cc", "Bcc"] {
        for value in headers.get_all_values(name) {
            for addr in parse_address_list(&value) {
                recipients.push(parse(&addr.address)?);
            }
        }
    }

    Envelope::new(Some(parse(&from)?), recipients)
        .map_err(|e| Error::Smtp(format!("Invalid envelope: {e}")))
}

/// The message without its `Bcc` header, folded lines included.
/// Only the header section is touched.
fn strip_bcc(raw: &[u8]) -> Cow<'_, [u8]> {
    let mut kept = Vec::with_capacity(raw.len());
    let mut header_len = 0;
    let mut in_bcc = false;
    let mut stripped = false;

    for line in raw.split_inclusive(|b| *b == b'\n') {
        if line == b"\r\n" || line == b"\n" {
            break;
        }
        let folded = line.first().is_some_and(|b| *b == b' ' || *b == b'\t');
        if !folded {
            in_bcc = line
                .get(..4)
                .is_some_and(|name| name.eq_ignore_ascii_case(b"bcc:"));
        }
        if in_bcc {
            stripped = true;
        } else {
            kept.extend_from_slice(line);
        }
        header_len += line.len();
    }

    if !stripped {
        return Cow::Borrowed(raw);
    }
    kept.extend_from_slice(&raw[header_len..]);
    Cow::Owned(kept)
}

fn smtp_error(e: &lettre::transport::smtp::Error) -> Error {
    match e.status() {
        Some(code) if AUTH_FAILURE_CODES.contains(&code.to_string().as_str()) => {
            Error::Auth(format!("SMTP authentication failed: {e}"))
        }
        Some(_) => Error::Smtp(e.to_string()),
        None if e.is_timeout() || !e.is_client() => Error::Io(io::Error::other(e.to_string())),
        None => Error::Smtp(e.to_string()),
    }
}

#[async_trait]
impl SubmissionTransport for SmtpSubmission {
    async fn send_raw(&self, email: &str, token: &str, raw: &[u8]) -> Result<()> {
        let envelope = envelope_of(email, raw)?;
        debug!(
            "Submitting {} bytes to {} recipients via {}:{}",
            raw.len(),
            envelope.to().len(),
            self.host,
            self.port
        );

        let message = strip_bcc(raw);
        self.transport(email, token)?
            .send_raw(&envelope, &message)
            .await
            .map_err(|e| smtp_error(&e))?;
        info!("Message accepted by {}", self.host);
        Ok(())
    }
}
