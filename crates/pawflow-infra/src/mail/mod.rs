//! Mail senders for `email.send` actions.
//!
//! - `TracingMailSender`: logs the message and reports it undelivered
//! - `HttpMailSender`: posts the message as JSON to a relay endpoint

pub mod log;
pub mod relay;

use pawflow_core::flow::mail::{BoxMailSender, MailError};
use pawflow_types::config::MailConfig;

pub use log::TracingMailSender;
pub use relay::HttpMailSender;

/// Pick the sender configured in `[mail]`.
pub fn build_mail_sender(config: &MailConfig) -> Result<BoxMailSender, MailError> {
    match config.relay_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => {
            tracing::info!(relay_url = %url, "mail relay configured");
            Ok(BoxMailSender::new(HttpMailSender::new(url, config.from.clone())?))
        }
        _ => {
            tracing::info!("no mail relay configured; mail will only be logged");
            Ok(BoxMailSender::new(TracingMailSender))
        }
    }
}
