//! Outbound mail delivery.
//!
//! The rest of the application talks to a `Mailer` (one configured SMTP
//! relay) obtained from a `MailerFactory`. Production uses `lettre`'s async
//! SMTP transport; tests swap in `MockMailerFactory`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::smtp_account::SmtpEncryption;

/// Errors raised while building or sending a message.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum MailError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("transport configuration error: {0}")]
    Configuration(String),

    #[error("temporary delivery failure: {0}")]
    Temporary(String),

    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl MailError {
    /// Whether retrying the same message can possibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MailError::Temporary(_))
    }

    /// Errors that concern the relay itself rather than a single recipient.
    pub fn is_fatal_for_campaign(&self) -> bool {
        matches!(self, MailError::Configuration(_))
    }
}

impl From<lettre::transport::smtp::Error> for MailError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        if err.is_permanent() {
            MailError::Permanent(err.to_string())
        } else {
            MailError::Temporary(err.to_string())
        }
    }
}

/// Connection settings for one SMTP relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub encryption: SmtpEncryption,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// A single message ready to hand to a relay.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub from: String,
    pub from_name: Option<String>,
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
}

/// Returned by a relay on acceptance.
#[derive(Debug, Clone, Serialize)]
pub struct SendReceipt {
    pub message_id: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, MailError>;

    /// Connect and authenticate without sending anything.
    async fn test_connection(&self) -> Result<(), MailError>;
}

pub trait MailerFactory: Send + Sync {
    fn build(&self, settings: &SmtpSettings) -> Result<Arc<dyn Mailer>, MailError>;
}

fn parse_mailbox(name: Option<&str>, email: &str) -> Result<Mailbox, MailError> {
    let address: Address = email
        .trim()
        .parse()
        .map_err(|e| MailError::InvalidAddress(format!("{email}: {e}")))?;

    Ok(Mailbox::new(name.map(str::to_string), address))
}

/// Build the MIME message. Both bodies present produce multipart/alternative.
pub fn build_message(email: &OutgoingEmail, message_id: &str) -> Result<Message, MailError> {
    let from = parse_mailbox(email.from_name.as_deref(), &email.from)?;
    let to = parse_mailbox(email.to_name.as_deref(), &email.to)?;

    let builder = Message::builder()
        .from(from)
        .to(to)
        .subject(email.subject.clone())
        .message_id(Some(message_id.to_string()));

    let result = match (&email.html, &email.text) {
        (Some(html), Some(text)) => {
            builder.multipart(MultiPart::alternative_plain_html(text.clone(), html.clone()))
        }
        (Some(html), None) => builder.header(ContentType::TEXT_HTML).body(html.clone()),
        (None, Some(text)) => builder.header(ContentType::TEXT_PLAIN).body(text.clone()),
        (None, None) => {
            return Err(MailError::InvalidMessage(
                "message has neither an html nor a text body".to_string(),
            ));
        }
    };

    result.map_err(|e| MailError::InvalidMessage(e.to_string()))
}

fn new_message_id(from: &str) -> String {
    let domain = from.rsplit_once('@').map(|(_, d)| d).unwrap_or("mailcannon");
    format!("<{}@{}>", Uuid::new_v4(), domain.trim_end_matches('>'))
}

/// SMTP relay backed by `lettre`.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, MailError> {
        let message_id = new_message_id(&email.from);
        let message = build_message(email, &message_id)?;

        self.transport.send(message).await?;

        Ok(SendReceipt { message_id })
    }

    async fn test_connection(&self) -> Result<(), MailError> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(MailError::Temporary(
                "server did not accept the connection".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

/// Builds `SmtpMailer`s with a shared command timeout.
#[derive(Debug, Clone)]
pub struct SmtpMailerFactory {
    timeout: Duration,
}

impl SmtpMailerFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl MailerFactory for SmtpMailerFactory {
    fn build(&self, settings: &SmtpSettings) -> Result<Arc<dyn Mailer>, MailError> {
        if settings.host.trim().is_empty() {
            return Err(MailError::Configuration("SMTP host is empty".to_string()));
        }

        let builder = match settings.encryption {
            SmtpEncryption::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
            }
            SmtpEncryption::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                    .map_err(|e| MailError::Configuration(format!("STARTTLS error: {e}")))?
            }
            SmtpEncryption::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| MailError::Configuration(format!("TLS error: {e}")))?,
        };

        let mut builder = builder.port(settings.port).timeout(Some(self.timeout));

        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Arc::new(SmtpMailer {
            transport: builder.build(),
        }))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            from: "news@example.com".to_string(),
            from_name: Some("Example News".to_string()),
            to: "reader@example.org".to_string(),
            to_name: None,
            subject: "Hello".to_string(),
            html: Some("<p>Hi</p>".to_string()),
            text: Some("Hi".to_string()),
        }
    }

    #[test]
    fn test_build_multipart_message() {
        let message = build_message(&email(), "<abc@example.com>").unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("Subject: Hello"));
        assert!(raw.contains("Message-ID: <abc@example.com>"));
    }

    #[test]
    fn test_build_rejects_invalid_recipient() {
        let mut e = email();
        e.to = "not-an-address".to_string();
        let err = build_message(&e, "<x@example.com>").unwrap_err();
        assert!(matches!(err, MailError::InvalidAddress(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_build_requires_a_body() {
        let mut e = email();
        e.html = None;
        e.text = None;
        assert!(matches!(
            build_message(&e, "<x@example.com>"),
            Err(MailError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_message_id_uses_sender_domain() {
        let id = new_message_id("news@example.com");
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@example.com>"));
    }

    #[test]
    fn test_error_classification() {
        assert!(MailError::Temporary("421".into()).is_retryable());
        assert!(!MailError::Permanent("550".into()).is_retryable());
        assert!(MailError::Configuration("bad host".into()).is_fatal_for_campaign());
        assert!(!MailError::Temporary("421".into()).is_fatal_for_campaign());
    }

    #[test]
    fn test_factory_rejects_empty_host() {
        let factory = SmtpMailerFactory::new(Duration::from_secs(5));
        let settings = SmtpSettings {
            host: " ".to_string(),
            port: 587,
            encryption: SmtpEncryption::Starttls,
            username: None,
            password: None,
        };
        assert!(matches!(
            factory.build(&settings),
            Err(MailError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_mailer_scripted_failure_then_success() {
        let factory = mock::MockMailerFactory::new();
        factory.fail_next(MailError::Temporary("try later".into()));

        let mailer = factory
            .build(&SmtpSettings {
                host: "smtp.example.com".into(),
                port: 587,
                encryption: SmtpEncryption::Starttls,
                username: None,
                password: None,
            })
            .unwrap();

        assert!(mailer.send(&email()).await.is_err());
        assert!(mailer.send(&email()).await.is_ok());
        assert_eq!(factory.sent().len(), 1);
    }
}
