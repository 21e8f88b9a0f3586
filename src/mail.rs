use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info};

use crate::config::MailConfig;

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound mail delivery. May fail; callers decide how to recover.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &MailConfig, host: &str) -> anyhow::Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .with_context(|| format!("smtp relay {}", host))?
            .port(cfg.port)
            .timeout(Some(cfg.timeout()));
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        let from = cfg
            .from
            .parse::<Mailbox>()
            .with_context(|| format!("invalid MAIL_FROM {}", cfg.from))?;
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()> {
        let to = email
            .to
            .parse::<Mailbox>()
            .with_context(|| format!("invalid recipient {}", email.to))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body)
            .context("build message")?;
        self.transport.send(message).await.context("smtp send")?;
        debug!(to = %email.to, "mail delivered");
        Ok(())
    }
}

/// Used when no SMTP host is configured: the message only reaches the log.
/// Bodies hold live reset links, so they are logged only when `log_body` is set.
pub struct LogMailer {
    log_body: bool,
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()> {
        info!(to = %email.to, subject = %email.subject, "mail (log only)");
        if self.log_body {
            debug!(to = %email.to, body = %email.body, "mail body");
        }
        Ok(())
    }
}

pub fn from_config(cfg: &MailConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    let mailer: Arc<dyn Mailer> = match cfg.host.as_deref() {
        Some(host) => {
            info!(host, port = cfg.port, "smtp mailer configured");
            Arc::new(SmtpMailer::new(cfg, host)?)
        }
        None => {
            info!("SMTP_HOST not set; mail goes to the log only");
            Arc::new(LogMailer {
                log_body: cfg.log_body,
            })
        }
    };
    Ok(mailer)
}
