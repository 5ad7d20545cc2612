//! Idempotency ledger records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique key of an executed action step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub tenant_id: Uuid,
    pub run_id: Uuid,
    pub step_id: String,
    /// Hex SHA-256 over run id, step id and the canonical step config.
    pub fingerprint: String,
}

/// A stored action result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub result: Value,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a ledger lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyCheck {
    pub executed: bool,
    pub result: Option<Value>,
}

impl IdempotencyCheck {
    pub fn miss() -> Self {
        Self {
            executed: false,
            result: None,
        }
    }

    pub fn hit(result: Value) -> Self {
        Self {
            executed: true,
            result: Some(result),
        }
    }
}
