//! Outbound mail port.
//!
//! `MailSender` is implemented in pawflow-infra (log-only and HTTP relay).
//! `BoxMailSender` erases the concrete sender so the binary can pick one at
//! runtime from configuration:
//! 1. `MailSender` uses RPITIT and is not object-safe
//! 2. `MailSenderDyn` is the object-safe twin with boxed futures
//! 3. `BoxMailSender` wraps `Box<dyn MailSenderDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// A message handed to the mail sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

/// What the sender reports back after accepting a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailReceipt {
    /// Provider-assigned message id, when the provider returns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Whether the message actually left the process.
    pub delivered: bool,
}

/// Errors from mail delivery. All of them are treated as transient.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MailError {
    #[error("mail delivery failed: {0}")]
    Delivery(String),

    #[error("mail relay rejected message with status {0}")]
    Rejected(u16),
}

/// Sends mail on behalf of `email.send` actions.
pub trait MailSender: Send + Sync {
    fn send(
        &self,
        message: &MailMessage,
    ) -> impl Future<Output = Result<MailReceipt, MailError>> + Send;
}

/// Object-safe version of [`MailSender`] with boxed futures.
pub trait MailSenderDyn: Send + Sync {
    fn send_boxed<'a>(
        &'a self,
        message: &'a MailMessage,
    ) -> Pin<Box<dyn Future<Output = Result<MailReceipt, MailError>> + Send + 'a>>;
}

impl<T: MailSender> MailSenderDyn for T {
    fn send_boxed<'a>(
        &'a self,
        message: &'a MailMessage,
    ) -> Pin<Box<dyn Future<Output = Result<MailReceipt, MailError>> + Send + 'a>> {
        Box::pin(self.send(message))
    }
}

/// Type-erased mail sender.
pub struct BoxMailSender {
    inner: Box<dyn MailSenderDyn + Send + Sync>,
}

impl BoxMailSender {
    pub fn new<T: MailSender + 'static>(sender: T) -> Self {
        Self {
            inner: Box::new(sender),
        }
    }

    pub async fn send(&self, message: &MailMessage) -> Result<MailReceipt, MailError> {
        self.inner.send_boxed(message).await
    }
}
