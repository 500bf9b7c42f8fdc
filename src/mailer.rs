use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::config::MailConfig;
use crate::error::SendError;

/// Delivers one plain-text message to one recipient.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), SendError>;
}

/// Settings that passed the presence check.
#[derive(Debug, Clone)]
struct SmtpSettings {
    host: String,
    port: u16,
    secure: bool,
    username: String,
    password: String,
    from: String,
}

impl SmtpSettings {
    fn resolve(config: &MailConfig) -> Result<Self, SendError> {
        let mut missing = Vec::new();
        if config.host.is_none() {
            missing.push("host");
        }
        if config.port.is_none() {
            missing.push("port");
        }
        if config.username.is_none() {
            missing.push("username");
        }
        if config.password.is_none() {
            missing.push("password");
        }

        match (&config.host, config.port, &config.username, &config.password) {
            (Some(host), Some(port), Some(username), Some(password)) => Ok(Self {
                host: host.clone(),
                port,
                secure: config.secure,
                username: username.clone(),
                password: password.clone(),
                from: config.from.clone().unwrap_or_else(|| username.clone()),
            }),
            _ => Err(SendError::NotConfigured(missing)),
        }
    }
}

pub struct SmtpMailer {
    config: MailConfig,
}

impl SmtpMailer {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }

    fn transport(settings: &SmtpSettings) -> Result<AsyncSmtpTransport<Tokio1Executor>, SendError> {
        let builder = if settings.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        }
        .map_err(|e| SendError::Transport(e.to_string()))?;

        Ok(builder
            .port(settings.port)
            .credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
            .build())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, SendError> {
    address.parse::<Mailbox>().map_err(|e| SendError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

pub fn build_message(from: &str, to: &str, subject: &str, body: &str) -> Result<Message, SendError> {
    Message::builder()
        .from(parse_mailbox(from)?)
        .to(parse_mailbox(to)?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| SendError::Build(e.to_string()))
}

#[async_trait]
impl Notifier for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), SendError> {
        // Checked before any network work so a missing setting never looks
        // like a delivery failure.
        let settings = SmtpSettings::resolve(&self.config)?;
        let message = build_message(&settings.from, to, subject, body)?;
        let transport = Self::transport(&settings)?;

        transport
            .send(message)
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        info!("Email sent to {}", to);
        Ok(())
    }
}
