//! Schedule-trigger enrollment rules.
//!
//! When a schedule fires, each candidate subject passes two gates before a
//! run is created: the flow's re-enrollment policy, then the trigger
//! criteria evaluated over `{subject, payload, triggerType}`.

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use pawflow_types::error::RepositoryError;
use pawflow_types::flow::{FlowDefinition, ReenrollmentPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::repository::flow::SubjectHistory;

// ---------------------------------------------------------------------------
// Subjects
// ---------------------------------------------------------------------------

/// A subject a scheduled flow may enroll (an owner, a pet, a booking, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentSubject {
    pub id: String,
    /// Subject fields visible to trigger criteria.
    #[serde(default)]
    pub attributes: Value,
}

impl EnrollmentSubject {
    pub fn new(id: impl Into<String>, attributes: Value) -> Self {
        Self {
            id: id.into(),
            attributes,
        }
    }

    /// `attributes` with the id folded in, as criteria see it.
    pub fn to_value(&self) -> Value {
        let mut value = match &self.attributes {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        value.insert("id".to_string(), json!(self.id));
        Value::Object(value)
    }
}

/// Supplies candidate subjects when a scheduled flow fires.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait SubjectSource: Send + Sync {
    /// Subjects of the flow's tenant matching its trigger audience.
    fn candidates(
        &self,
        flow: &FlowDefinition,
    ) -> impl Future<Output = Result<Vec<EnrollmentSubject>, RepositoryError>> + Send;
}

// ---------------------------------------------------------------------------
// Re-enrollment
// ---------------------------------------------------------------------------

/// Whether a subject with `history` may be enrolled again at `now`.
///
/// - absent / `allow`: always
/// - `disallow`: only if the subject never had a run in this flow
/// - `cooldown`: only if the latest run started at least `minutes` ago
pub fn reenrollment_allows(
    policy: Option<&ReenrollmentPolicy>,
    history: &SubjectHistory,
    now: DateTime<Utc>,
) -> bool {
    match policy {
        None | Some(ReenrollmentPolicy::Allow) => true,
        Some(ReenrollmentPolicy::Disallow) => history.prior_runs == 0,
        Some(ReenrollmentPolicy::Cooldown { minutes }) => match history.last_started_at {
            None => true,
            Some(last) => now - last >= Duration::minutes(i64::from(*minutes)),
        },
    }
}

/// The object trigger criteria are evaluated against.
pub fn criteria_context(subject: &EnrollmentSubject, payload: &Value, trigger_type: &str) -> Value {
    json!({
        "subject": subject.to_value(),
        "payload": payload,
        "triggerType": trigger_type,
    })
}

/// Payload of a schedule-created run.
pub fn schedule_payload(subject: &EnrollmentSubject, fired_at: DateTime<Utc>) -> Value {
    json!({
        "subjectId": subject.id,
        "subject": subject.attributes,
        "firedAt": fired_at.to_rfc3339(),
    })
}
