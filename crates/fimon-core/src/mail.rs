//! Outbound notification mail.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::{MonitorError, Result};

pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 465;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub from: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Delivers one composed mail. Failures are reported, never retried.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &Outgoing) -> Result<()>;
}

/// SMTPS relay client (implicit TLS, authenticated).
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(host: &str, port: u16, user: &str, password: Zeroizing<String>) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| MonitorError::MailTransport(format!("smtp relay {host}: {e}")))?
            .port(port)
            .credentials(Credentials::new(user.to_string(), password.to_string()))
            .build();
        info!(host, port, "smtp transport configured");
        Ok(Self { transport })
    }
}

fn build_message(mail: &Outgoing) -> Result<Message> {
    let mailbox = |addr: &str| {
        addr.parse::<Mailbox>()
            .map_err(|e| MonitorError::MailTransport(format!("bad address {addr}: {e}")))
    };
    let mut builder = Message::builder()
        .from(mailbox(&mail.from)?)
        .subject(mail.subject.clone())
        .header(ContentType::TEXT_PLAIN);
    for recipient in &mail.recipients {
        builder = builder.to(mailbox(recipient)?);
    }
    builder
        .body(mail.body.clone())
        .map_err(|e| MonitorError::MailTransport(e.to_string()))
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, mail: &Outgoing) -> Result<()> {
        let message = build_message(mail)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| MonitorError::MailTransport(e.to_string()))?;
        debug!(subject = %mail.subject, recipients = mail.recipients.len(), "mail sent");
        Ok(())
    }
}

/// Logs the mail instead of sending it (`mailing.dry_run`).
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunMailer;

#[async_trait]
impl MailTransport for DryRunMailer {
    async fn send(&self, mail: &Outgoing) -> Result<()> {
        info!(
            from = %mail.from,
            to = %mail.recipients.join(", "),
            subject = %mail.subject,
            "[dry run] mail not sent:\n{}",
            mail.body
        );
        Ok(())
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Keeps every mail it is handed; optionally fails each send.
    #[derive(Debug, Default)]
    pub struct RecordingMailer {
        sent: Mutex<Vec<Outgoing>>,
        fail: bool,
    }

    impl RecordingMailer {
        pub fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn sent(&self) -> Vec<Outgoing> {
            self.sent.lock().clone()
        }

        pub fn subjects(&self) -> Vec<String> {
            self.sent.lock().iter().map(|m| m.subject.clone()).collect()
        }
    }

    #[async_trait]
    impl MailTransport for RecordingMailer {
        async fn send(&self, mail: &Outgoing) -> Result<()> {
            self.sent.lock().push(mail.clone());
            if self.fail {
                return Err(MonitorError::MailTransport("connection refused".into()));
            }
            Ok(())
        }
    }
}
