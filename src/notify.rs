//! Best-effort notifications about plot starts, completions and failures.
//!
//! Callers hand messages to a [`NotifyQueue`], which never blocks and never
//! reports delivery errors back. A single dispatcher task delivers them in
//! order through a [`Notifier`] and logs anything that goes wrong.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as MailMessage, Tokio1Executor};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::MailConfig;

const QUEUE_CAPACITY: usize = 64;

/// Port on which the relay expects TLS from the first byte.
const IMPLICIT_TLS_PORT: u16 = 465;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Failed to build mail: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(subject = %notification.subject, "{}", notification.body);
        Ok(())
    }
}

/// Mails notifications through an SMTP relay.
pub struct SmtpNotifier {
    from: Mailbox,
    to: Vec<Mailbox>,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl std::fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpNotifier")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

impl SmtpNotifier {
    /// Parses every address up front so a bad config fails at startup
    /// rather than on the first plot.
    pub fn new(config: &MailConfig) -> Result<Self, NotifyError> {
        let from: Mailbox = config.from.parse()?;
        let to = config
            .to
            .iter()
            .map(|addr| addr.parse::<Mailbox>())
            .collect::<Result<Vec<_>, _>>()?;

        let relay = if config.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        };
        let mut relay = relay.port(config.port);
        if let Some(user) = &config.user {
            relay = relay.credentials(Credentials::new(
                user.clone(),
                config.password.clone().unwrap_or_default(),
            ));
        }

        Ok(Self {
            from,
            to,
            transport: relay.build(),
        })
    }

    fn message(&self, notification: &Notification) -> Result<MailMessage, NotifyError> {
        let mut builder = MailMessage::builder()
            .from(self.from.clone())
            .subject(notification.subject.as_str())
            .header(ContentType::TEXT_PLAIN);
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        Ok(builder.body(notification.body.clone())?)
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let message = self.message(notification)?;
        self.transport.send(message).await?;
        Ok(())
    }
}

enum Message {
    Deliver(Notification),
    Flush(oneshot::Sender<()>),
}

/// Handle for posting notifications without waiting on delivery.
#[derive(Clone)]
pub struct NotifyQueue {
    tx: mpsc::Sender<Message>,
}

impl std::fmt::Debug for NotifyQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyQueue").finish_non_exhaustive()
    }
}

impl NotifyQueue {
    /// Spawn the dispatcher task. It stops once every handle is dropped.
    pub fn start(notifier: Arc<dyn Notifier>) -> Self {
        let (tx, mut rx) = mpsc::channel(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    Message::Deliver(notification) => {
                        if let Err(e) = notifier.notify(&notification).await {
                            tracing::warn!(
                                subject = %notification.subject,
                                error = %e,
                                "Failed sending notification"
                            );
                        }
                    }
                    Message::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });

        Self { tx }
    }

    /// Queue a notification. Dropped with a warning if the queue is full.
    pub fn post(&self, subject: impl Into<String>, body: impl Into<String>) {
        let notification = Notification {
            subject: subject.into(),
            body: body.into(),
        };
        if let Err(e) = self.tx.try_send(Message::Deliver(notification)) {
            let dropped = match e {
                mpsc::error::TrySendError::Full(Message::Deliver(n))
                | mpsc::error::TrySendError::Closed(Message::Deliver(n)) => n.subject,
                _ => String::new(),
            };
            tracing::warn!(subject = %dropped, "Notification queue unavailable, dropping message");
        }
    }

    /// Wait until everything posted before this call has been handled.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}
