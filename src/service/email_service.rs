//! Email Notifier
//!
//! Delivery of verification codes. The session service only sees the
//! [`Notifier`] capability; [`SmtpNotifier`] sends through an SMTP relay and
//! [`OutboxNotifier`] keeps messages in memory.

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use log::{debug, error, info};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tera::{Context, Tera};
use thiserror::Error;

use crate::config::env;

/// Subject line of verification mails
pub const VERIFICATION_SUBJECT: &str = "Verification email";

const VERIFICATION_BODY: &str = r#"Hello {{ login }},

Thank you for signing up with {{ app_name }}. To finish creating your account, enter the code below:

Verification code: {{ code }}

This code expires in {{ expires_in_minutes }} minutes. If you did not create an account, you can safely ignore this email.

The {{ app_name }} Team
"#;

/// Notification failures
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Invalid address: {0}")]
    Address(String),

    #[error("Failed to build email message: {0}")]
    Message(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Failed to send email: {0}")]
    Transport(String),
}

/// A plain-text message to one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound message delivery
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, mail: Mail) -> Result<(), NotifyError>;
}

/// SMTP settings
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// SMTP server hostname
    pub smtp_host: String,
    /// SMTP server port
    pub smtp_port: u16,
    /// SMTP username; credentials are only sent when both parts are set
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    /// Require TLS to the relay
    pub smtp_use_tls: bool,
    /// Connection and send timeout
    pub smtp_timeout: Duration,
    /// From email address
    pub from_address: String,
    /// From name (display name), also used as the application name in mails
    pub from_name: String,
}

impl EmailConfig {
    /// Read SMTP settings; `None` when `SMTP_HOST` is unset
    pub fn from_env() -> anyhow::Result<Option<Self>> {
        if !env::is_set("SMTP_HOST") {
            return Ok(None);
        }

        let from_address = std::env::var("SMTP_FROM_ADDRESS")
            .map_err(|_| anyhow::anyhow!("SMTP_FROM_ADDRESS is required when SMTP_HOST is set"))?;

        Ok(Some(Self {
            smtp_host: env::get_string("SMTP_HOST", "localhost"),
            smtp_port: env::get_u16("SMTP_PORT", 587),
            smtp_username: std::env::var("SMTP_USERNAME").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
            smtp_use_tls: env::get_bool("SMTP_USE_TLS", true),
            smtp_timeout: Duration::from_secs(env::get_u64("SMTP_TIMEOUT_SECONDS", 10)),
            from_address,
            from_name: env::get_string("SMTP_FROM_NAME", "Session Service"),
        }))
    }
}

/// Renders verification mails from embedded templates
#[derive(Debug, Clone)]
pub struct EmailTemplates {
    app_name: String,
    verification_body: String,
}

impl EmailTemplates {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            verification_body: VERIFICATION_BODY.to_string(),
        }
    }

    /// Replace the embedded verification body; must render `{{ code }}`
    pub fn with_verification_body(mut self, body: impl Into<String>) -> Self {
        self.verification_body = body.into();
        self
    }

    /// Build the mail carrying `code` to `to`
    pub fn verification(
        &self,
        to: &str,
        login: &str,
        code: &str,
        expires_in_minutes: i64,
    ) -> Result<Mail, NotifyError> {
        let mut context = Context::new();
        context.insert("login", login);
        context.insert("code", code);
        context.insert("expires_in_minutes", &expires_in_minutes);
        context.insert("app_name", &self.app_name);

        let body = Tera::one_off(&self.verification_body, &context, false)
            .map_err(|e| NotifyError::Template(e.to_string()))?;

        Ok(Mail {
            to: to.to_string(),
            subject: VERIFICATION_SUBJECT.to_string(),
            body,
        })
    }
}

impl Default for EmailTemplates {
    fn default() -> Self {
        Self::new("Session Service")
    }
}

/// Sends mail through an SMTP relay
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpNotifier {
    pub fn new(config: &EmailConfig) -> Result<Self, NotifyError> {
        let builder = if config.smtp_use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                .map_err(|e| NotifyError::Transport(format!("Failed to configure SMTP relay: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };

        let mut builder = builder
            .port(config.smtp_port)
            .timeout(Some(config.smtp_timeout));

        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: format!("{} <{}>", config.from_name, config.from_address),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, mail: Mail) -> Result<(), NotifyError> {
        let message = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| NotifyError::Address(format!("Invalid from address: {}", e)))?,
            )
            .to(mail
                .to
                .parse()
                .map_err(|e| NotifyError::Address(format!("Invalid recipient email: {}", e)))?)
            .subject(mail.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body)
            .map_err(|e| NotifyError::Message(e.to_string()))?;

        match self.transport.send(message).await {
            Ok(_) => {
                info!("Email sent successfully to: {}", mail.to);
                Ok(())
            }
            Err(e) => {
                error!("Failed to send email to {}: {}", mail.to, e);
                Err(NotifyError::Transport(e.to_string()))
            }
        }
    }
}

/// Keeps every sent message in memory
#[derive(Clone, Default)]
pub struct OutboxNotifier {
    messages: Arc<Mutex<Vec<Mail>>>,
}

impl OutboxNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent message sent to `to`
    pub fn last_to(&self, to: &str) -> Option<Mail> {
        self.lock().iter().rev().find(|m| m.to == to).cloned()
    }

    /// Remove and return every queued message
    pub fn drain(&self) -> Vec<Mail> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Mail>> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn send(&self, mail: Mail) -> Result<(), NotifyError> {
        debug!("Queued email for {} in outbox", mail.to);
        self.lock().push(mail);
        Ok(())
    }
}

/// Pull the verification code out of a rendered mail body
pub fn extract_verification_code(body: &str) -> Option<&str> {
    body.lines()
        .find_map(|line| line.trim().strip_prefix("Verification code: "))
        .map(str::trim)
}
