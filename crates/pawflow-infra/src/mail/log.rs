//! Log-only mail sender.

use pawflow_core::flow::mail::{MailError, MailMessage, MailReceipt, MailSender};

/// Writes each message to the log instead of sending it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMailSender;

impl MailSender for TracingMailSender {
    async fn send(&self, message: &MailMessage) -> Result<MailReceipt, MailError> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            has_text = message.text.is_some(),
            has_html = message.html.is_some(),
            "mail not sent (no relay configured)"
        );
        Ok(MailReceipt {
            message_id: None,
            delivered: false,
        })
    }
}
