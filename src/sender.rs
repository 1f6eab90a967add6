//! Outbound mail through an account's SMTP credentials
//!
//! Composition and SMTP framing belong to `lettre`; this module only
//! maps an [`SmtpAccount`] and an [`OutgoingMail`] onto it. Delivery is
//! attempted once; retries are the caller's business.

use crate::account::SmtpAccount;
use crate::config::FacadeConfig;
use crate::error::{Error, Result};
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use mailparse::{MailAddr, addrparse};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

const IMPLICIT_TLS_PORT: u16 = 465;

/// A message to send. Recipient fields take comma-separated address
/// lists; empty ones are skipped.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutgoingMail {
    pub to: String,
    pub cc: String,
    pub bcc: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct MailSender {
    timeout: Duration,
    accept_invalid_certs: bool,
}

impl MailSender {
    #[must_use]
    pub const fn new(config: &FacadeConfig) -> Self {
        Self {
            timeout: config.operation_timeout,
            accept_invalid_certs: config.accept_invalid_certs,
        }
    }

    /// Compose and transmit `mail` from `smtp`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an unusable account or bad
    /// addresses (nothing is sent), [`Error::Send`] if the server
    /// refuses or the connection fails.
    pub async fn send(&self, smtp: &SmtpAccount, mail: &OutgoingMail) -> Result<()> {
        let message = build_message(smtp, mail)?;

        let mut tls = TlsParameters::builder(smtp.host.clone());
        if self.accept_invalid_certs {
            tls = tls
                .dangerous_accept_invalid_certs(true)
                .dangerous_accept_invalid_hostnames(true);
        }
        let tls = tls.build().map_err(|e| Error::Tls(e.to_string()))?;

        let tls = if smtp.port == IMPLICIT_TLS_PORT {
            Tls::Wrapper(tls)
        } else if smtp.auth_required {
            Tls::Required(tls)
        } else {
            Tls::Opportunistic(tls)
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
            .port(smtp.port)
            .tls(tls)
            .timeout(Some(self.timeout));
        if smtp.auth_required {
            builder = builder.credentials(Credentials::new(
                smtp.username.clone(),
                smtp.password.clone(),
            ));
        }

        builder
            .build()
            .send(message)
            .await
            .map_err(|e| Error::Send(e.to_string()))?;

        info!(host = %smtp.host, "Sent message");
        Ok(())
    }
}

/// Build the RFC 5322 message without sending it.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] for an unusable account, a bad
/// address, or a message without recipients.
pub fn build_message(smtp: &SmtpAccount, mail: &OutgoingMail) -> Result<Message> {
    smtp.validate()?;

    let from_name = smtp.from_name.trim();
    let from = Mailbox::new(
        (!from_name.is_empty()).then(|| from_name.to_string()),
        smtp.from_email
            .trim()
            .parse()
            .map_err(|e| Error::InvalidArgument(format!("smtp.fromEmail: {e}")))?,
    );

    let to = parse_mailbox_list("to", &mail.to)?;
    let cc = parse_mailbox_list("cc", &mail.cc)?;
    let bcc = parse_mailbox_list("bcc", &mail.bcc)?;
    if to.is_empty() && cc.is_empty() && bcc.is_empty() {
        return Err(Error::InvalidArgument("No recipients".into()));
    }

    let mut builder = Message::builder()
        .from(from)
        .subject(mail.subject.trim());
    for addr in to {
        builder = builder.to(addr);
    }
    for addr in cc {
        builder = builder.cc(addr);
    }
    for addr in bcc {
        builder = builder.bcc(addr);
    }

    builder
        .header(ContentType::TEXT_PLAIN)
        .body(mail.body.trim().to_string())
        .map_err(|e| Error::InvalidArgument(e.to_string()))
}

fn parse_mailbox_list(field: &str, input: &str) -> Result<Vec<Mailbox>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let parsed =
        addrparse(trimmed).map_err(|e| Error::InvalidArgument(format!("{field}: {e}")))?;

    let mut out = Vec::new();
    for addr in parsed.iter() {
        let infos = match addr {
            MailAddr::Single(info) => std::slice::from_ref(info),
            MailAddr::Group(group) => group.addrs.as_slice(),
        };
        for info in infos {
            let address = info
                .addr
                .parse()
                .map_err(|e| Error::InvalidArgument(format!("{field}: {}: {e}", info.addr)))?;
            out.push(Mailbox::new(info.display_name.clone(), address));
        }
    }
    Ok(out)
}
