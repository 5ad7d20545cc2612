//! Built-in action handlers.

use std::sync::Arc;

use serde_json::{Value, json};

use super::dispatcher::{ActionHandler, ActionOutcome, ActionRequest};
use super::error::EngineError;
use super::expression::lookup_path;
use super::mail::{BoxMailSender, MailMessage};

// ---------------------------------------------------------------------------
// record.update
// ---------------------------------------------------------------------------

/// Merges `config.patch` into the run context.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordUpdateHandler;

impl ActionHandler for RecordUpdateHandler {
    fn action_type(&self) -> &'static str {
        "record.update"
    }

    async fn execute(&self, request: &ActionRequest<'_>) -> Result<ActionOutcome, EngineError> {
        let patch = request
            .config()
            .get("patch")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                EngineError::Configuration(format!(
                    "record.update step '{}' needs an object 'patch'",
                    request.step.id
                ))
            })?
            .clone();

        let mut keys: Vec<&String> = patch.keys().collect();
        keys.sort();
        let output = json!({ "updated": keys });
        Ok(ActionOutcome::output(output).with_patch(patch))
    }
}

// ---------------------------------------------------------------------------
// note.append
// ---------------------------------------------------------------------------

/// Records a free-text note in the run's action log.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoteAppendHandler;

impl ActionHandler for NoteAppendHandler {
    fn action_type(&self) -> &'static str {
        "note.append"
    }

    async fn execute(&self, request: &ActionRequest<'_>) -> Result<ActionOutcome, EngineError> {
        let note = request
            .config()
            .get("note")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EngineError::Configuration(format!(
                    "note.append step '{}' needs a string 'note'",
                    request.step.id
                ))
            })?;
        Ok(ActionOutcome::output(json!({ "note": note })))
    }
}

// ---------------------------------------------------------------------------
// email.send
// ---------------------------------------------------------------------------

/// Sends an email through the configured [`MailSender`](super::mail::MailSender).
///
/// The recipient is `config.to`, else `payload.email`, else a top-level
/// `email` context field.
pub struct EmailSendHandler {
    sender: Arc<BoxMailSender>,
}

impl EmailSendHandler {
    pub fn new(sender: Arc<BoxMailSender>) -> Self {
        Self { sender }
    }
}

fn non_empty_str<'a>(value: Option<&'a Value>) -> Option<&'a str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

impl ActionHandler for EmailSendHandler {
    fn action_type(&self) -> &'static str {
        "email.send"
    }

    async fn execute(&self, request: &ActionRequest<'_>) -> Result<ActionOutcome, EngineError> {
        let config = request.config();
        let to = non_empty_str(config.get("to"))
            .or_else(|| non_empty_str(lookup_path(&request.context.payload, "email")))
            .or_else(|| non_empty_str(request.context.extra.get("email")))
            .ok_or_else(|| {
                EngineError::Configuration(format!(
                    "email.send step '{}' has no recipient",
                    request.step.id
                ))
            })?
            .to_string();

        let message = MailMessage {
            to,
            subject: config
                .get("subject")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            text: config.get("text").and_then(Value::as_str).map(str::to_string),
            html: config.get("html").and_then(Value::as_str).map(str::to_string),
        };

        let receipt = self.sender.send(&message).await?;
        tracing::info!(
            run_id = %request.run_id,
            step_id = %request.step.id,
            delivered = receipt.delivered,
            "email sent"
        );

        Ok(ActionOutcome::output(json!({
            "to": message.to,
            "subject": message.subject,
            "messageId": receipt.message_id,
            "delivered": receipt.delivered,
        })))
    }
}

// ---------------------------------------------------------------------------
// Stubs
// ---------------------------------------------------------------------------

/// Placeholder for integrations that are not wired up (`task.create`,
/// `webhook.call`, `sms.send`). Succeeds without side effects.
#[derive(Debug, Clone, Copy)]
pub struct SkippedActionHandler {
    action_type: &'static str,
    reason: &'static str,
}

impl SkippedActionHandler {
    pub fn new(action_type: &'static str, reason: &'static str) -> Self {
        Self {
            action_type,
            reason,
        }
    }
}

impl ActionHandler for SkippedActionHandler {
    fn action_type(&self) -> &'static str {
        self.action_type
    }

    async fn execute(&self, request: &ActionRequest<'_>) -> Result<ActionOutcome, EngineError> {
        tracing::debug!(
            run_id = %request.run_id,
            step_id = %request.step.id,
            action_type = self.action_type,
            "action skipped"
        );
        Ok(ActionOutcome::output(json!({
            "status": "skipped",
            "reason": self.reason,
        })))
    }
}
