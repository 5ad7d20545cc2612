//! HTTP mail relay sender.
//!
//! POSTs `{from, to, subject, text, html}` as JSON. Any 2xx is accepted; the
//! relay may answer with `{"id": ...}` or `{"messageId": ...}`.

use std::time::Duration;

use pawflow_core::flow::mail::{MailError, MailMessage, MailReceipt, MailSender};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<&'a str>,
    to: &'a str,
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
}

/// Sends mail through an HTTP relay.
pub struct HttpMailSender {
    client: reqwest::Client,
    relay_url: String,
    from: Option<String>,
}

impl HttpMailSender {
    pub fn new(relay_url: impl Into<String>, from: Option<String>) -> Result<Self, MailError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MailError::Delivery(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            relay_url: relay_url.into(),
            from,
        })
    }

    fn request<'a>(&'a self, message: &'a MailMessage) -> RelayRequest<'a> {
        RelayRequest {
            from: self.from.as_deref(),
            to: &message.to,
            subject: &message.subject,
            text: message.text.as_deref(),
            html: message.html.as_deref(),
        }
    }
}

fn message_id(body: &Value) -> Option<String> {
    ["messageId", "id"]
        .iter()
        .find_map(|key| body.get(*key))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

impl MailSender for HttpMailSender {
    async fn send(&self, message: &MailMessage) -> Result<MailReceipt, MailError> {
        let response = self
            .client
            .post(&self.relay_url)
            .json(&self.request(message))
            .send()
            .await
            .map_err(|e| MailError::Delivery(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %body, "mail relay rejected message");
            return Err(MailError::Rejected(status.as_u16()));
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        let receipt = MailReceipt {
            message_id: message_id(&body),
            delivered: true,
        };
        tracing::debug!(to = %message.to, message_id = ?receipt.message_id, "mail relayed");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body_shape() {
        let sender = HttpMailSender::new("http://relay.local/send", Some("care@example.com".into())).unwrap();
        let message = MailMessage {
            to: "ann@example.com".to_string(),
            subject: "Checkout tomorrow".to_string(),
            text: Some("Bella goes home at 10am".to_string()),
            html: None,
        };
        let body = serde_json::to_value(sender.request(&message)).unwrap();
        assert_eq!(
            body,
            json!({
                "from": "care@example.com",
                "to": "ann@example.com",
                "subject": "Checkout tomorrow",
                "text": "Bella goes home at 10am"
            })
        );
    }

    #[test]
    fn test_message_id_extraction() {
        assert_eq!(message_id(&json!({ "messageId": "m-1" })).as_deref(), Some("m-1"));
        assert_eq!(message_id(&json!({ "id": 42 })).as_deref(), Some("42"));
        assert_eq!(message_id(&Value::Null), None);
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_delivery_error() {
        let sender = HttpMailSender::new("http://127.0.0.1:9/send", None).unwrap();
        let err = sender
            .send(&MailMessage {
                to: "a@b.c".to_string(),
                subject: String::new(),
                text: None,
                html: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::Delivery(_)));
    }
}
