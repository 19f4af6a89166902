//! Report email: MIME building and per-recipient SMTP delivery.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::{Attachment, Body, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, Message, SmtpTransport, Transport};

use crate::config::MailConfig;
use crate::{IoError, IoResult};

/// Who got the message and who did not.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

impl DeliveryReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Hands one formatted message to one server for one recipient.
pub trait MailRelay {
    fn send(&self, server: &str, from: &str, to: &str, message: &[u8]) -> IoResult<()>;
}

/// lettre SMTP relay: plain on `port`, STARTTLS when credentials are set.
#[derive(Clone, Debug)]
pub struct SmtpRelay {
    pub port: u16,
    pub timeout: Duration,
    pub credentials: Option<(String, String)>,
}

impl SmtpRelay {
    pub fn from_config(cfg: &MailConfig) -> IoResult<Self> {
        Ok(Self {
            port: cfg.smtp_port,
            timeout: Duration::from_secs(cfg.timeout_secs),
            credentials: cfg.smtp_credentials()?,
        })
    }

    fn transport(&self, server: &str) -> IoResult<SmtpTransport> {
        let t = match &self.credentials {
            Some((user, pass)) => SmtpTransport::starttls_relay(server)?
                .port(self.port)
                .credentials(Credentials::new(user.clone(), pass.clone()))
                .timeout(Some(self.timeout))
                .build(),
            None => SmtpTransport::builder_dangerous(server)
                .port(self.port)
                .timeout(Some(self.timeout))
                .build(),
        };
        Ok(t)
    }
}

impl MailRelay for SmtpRelay {
    fn send(&self, server: &str, from: &str, to: &str, message: &[u8]) -> IoResult<()> {
        let envelope = lettre::address::Envelope::new(Some(from.parse::<Address>()?), vec![to.parse::<Address>()?])?;
        self.transport(server)?.send_raw(&envelope, message)?;
        Ok(())
    }
}

/// A rendered report ready to be built into a message.
#[derive(Clone, Debug, Default)]
pub struct OutgoingMail {
    pub subject: String,
    pub html: String,
    pub attachments: Vec<PathBuf>,
}

fn mailbox(raw: &str) -> IoResult<Mailbox> {
    raw.trim().parse::<Mailbox>().map_err(|e| IoError::Mail(format!("bad address {raw:?}: {e}")))
}

/// Multipart message: HTML part then one base64 attachment per file.
/// Bcc recipients are left out of the headers.
pub fn build_message(cfg: &MailConfig, mail: &OutgoingMail) -> IoResult<Vec<u8>> {
    if cfg.to.is_empty() {
        return Err(IoError::NoRecipients);
    }

    let mut b = Message::builder().from(mailbox(&cfg.from)?).subject(mail.subject.clone());
    for to in &cfg.to {
        b = b.to(mailbox(to)?);
    }
    for cc in &cfg.cc {
        b = b.cc(mailbox(cc)?);
    }
    if let Some(rt) = &cfg.reply_to {
        b = b.reply_to(mailbox(rt)?);
    }

    let octet = ContentType::parse("application/octet-stream").map_err(|e| IoError::Mail(e.to_string()))?;
    let mut parts = MultiPart::mixed().singlepart(SinglePart::html(mail.html.clone()));
    for path in &mail.attachments {
        let bytes = fs::read(path).map_err(|e| IoError::Path(format!("{}: {e}", path.display())))?;
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let body = Body::new_with_encoding(bytes, ContentTransferEncoding::Base64)
            .map_err(|_| IoError::Mail(format!("cannot encode attachment {name}")))?;
        parts = parts.singlepart(Attachment::new(name).body(body, octet.clone()));
    }

    Ok(b.multipart(parts)?.formatted())
}

/// Send `message` to every To, Cc and Bcc recipient separately, trying the
/// configured servers in order until one accepts.
pub fn deliver(cfg: &MailConfig, relay: &dyn MailRelay, message: &[u8]) -> IoResult<DeliveryReport> {
    if cfg.to.is_empty() {
        return Err(IoError::NoRecipients);
    }
    if cfg.smtp_servers.is_empty() {
        return Err(IoError::Config("no smtp servers configured".into()));
    }
    let from = mailbox(&cfg.from)?.email.to_string();

    let mut report = DeliveryReport::default();
    for rcpt in cfg.all_recipients() {
        let to = match mailbox(rcpt) {
            Ok(mb) => mb.email.to_string(),
            Err(e) => {
                tracing::warn!(recipient = rcpt, error = %e, "skipping recipient");
                report.failed.push(rcpt.to_string());
                continue;
            }
        };
        let sent = cfg.smtp_servers.iter().any(|server| match relay.send(server, &from, &to, message) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(recipient = %to, server = %server, error = %e, "relay refused message");
                false
            }
        });
        if sent {
            report.delivered.push(to);
        } else {
            tracing::error!(recipient = %to, "could not deliver to any server");
            report.failed.push(to);
        }
    }

    tracing::info!(delivered = report.delivered.len(), failed = report.failed.len(), "mail delivery finished");
    Ok(report)
}

/// Build and deliver in one step.
pub fn send(cfg: &MailConfig, relay: &dyn MailRelay, mail: &OutgoingMail) -> IoResult<DeliveryReport> {
    let message = build_message(cfg, mail)?;
    deliver(cfg, relay, &message)
}
