//! SMTP mail transport and a recording stub

use async_trait::async_trait;
use articles2kindle_domain::{MailError, MailMessage, MailTransport};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

/// SMTP reply codes that mean the credentials were refused
const AUTH_FAILURE_CODES: &[&str] = &["530", "534", "535"];

/// Connection settings for an SMTP relay
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    /// Implicit TLS when true, STARTTLS otherwise
    pub secure: bool,
    pub user: String,
    pub password: SecretString,
    pub timeout: Duration,
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(settings: SmtpSettings) -> Result<Self, MailError> {
        let builder = if settings.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        }
        .map_err(|e| MailError::Build(format!("Invalid SMTP host: {}", e)))?;

        let credentials = Credentials::new(
            settings.user.clone(),
            settings.password.expose_secret().to_string(),
        );

        let transport = builder
            .port(settings.port)
            .credentials(credentials)
            .timeout(Some(settings.timeout))
            .build();

        Ok(Self { transport })
    }
}

fn mailbox(address: &str) -> Result<Mailbox, MailError> {
    address
        .parse()
        .map_err(|e| MailError::Build(format!("Invalid address {:?}: {}", address, e)))
}

/// Build a single multipart message: text body plus one attachment
fn build_message(message: &MailMessage) -> Result<Message, MailError> {
    if message.to.is_empty() {
        return Err(MailError::Build("No recipients".to_string()));
    }

    let mut builder = Message::builder()
        .from(mailbox(&message.from)?)
        .subject(message.subject.clone());
    for recipient in &message.to {
        builder = builder.to(mailbox(recipient)?);
    }

    let content_type = ContentType::parse(&message.attachment.content_type)
        .map_err(|e| MailError::Build(format!("Invalid content type: {}", e)))?;
    let attachment = Attachment::new(message.attachment.filename.clone())
        .body(message.attachment.content.clone(), content_type);

    builder
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(message.body.clone()))
                .singlepart(attachment),
        )
        .map_err(|e| MailError::Build(e.to_string()))
}

fn classify_smtp_error(e: lettre::transport::smtp::Error) -> MailError {
    if let Some(code) = e.status() {
        let code = code.to_string();
        if AUTH_FAILURE_CODES.contains(&code.as_str()) {
            return MailError::Auth(e.to_string());
        }
    }
    if e.is_permanent() {
        MailError::Rejected(e.to_string())
    } else {
        MailError::Network(e.to_string())
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        let email = build_message(message)?;

        self.transport
            .send(email)
            .await
            .map_err(classify_smtp_error)?;

        tracing::info!(
            recipients = message.to.len(),
            attachment = %message.attachment.filename,
            bytes = message.attachment.content.len(),
            "Mail sent"
        );
        Ok(())
    }
}

/// Stub transport that records messages instead of sending them
pub struct StubMailer {
    fail_with: Option<String>,
    sent: std::sync::Mutex<Vec<MailMessage>>,
}

impl Default for StubMailer {
    fn default() -> Self {
        Self::new()
    }
}

impl StubMailer {
    pub fn new() -> Self {
        Self {
            fail_with: None,
            sent: std::sync::Mutex::new(vec![]),
        }
    }

    /// A stub whose every send is rejected
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_with: Some(reason.into()),
            sent: std::sync::Mutex::new(vec![]),
        }
    }

    /// Get all messages that were sent
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for StubMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        if let Some(reason) = &self.fail_with {
            return Err(MailError::Rejected(reason.clone()));
        }

        build_message(message)?;
        self.sent.lock().unwrap().push(message.clone());
        tracing::info!(
            recipients = message.to.len(),
            attachment = %message.attachment.filename,
            "Stub mail recorded"
        );
        Ok(())
    }
}
