//! Idempotency ledger for action steps.
//!
//! Jobs are delivered at least once, so an action step may be reached again
//! after a crash or retry. Before running a side effect the executor looks up
//! the step's fingerprint; a hit replays the stored result instead.

use std::sync::Arc;

use pawflow_types::error::RepositoryError;
use pawflow_types::ledger::{IdempotencyCheck, IdempotencyKey};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::repository::engine::EngineRepository;

/// Hex SHA-256 over run id, step id and the canonical JSON of the step config.
///
/// Object keys are sorted before hashing, so two configs that differ only in
/// key order share a fingerprint.
pub fn fingerprint(run_id: &Uuid, step_id: &str, config: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(config, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(step_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Build the ledger key of an action step.
pub fn ledger_key(tenant_id: Uuid, run_id: Uuid, step_id: &str, config: &Value) -> IdempotencyKey {
    IdempotencyKey {
        tenant_id,
        run_id,
        step_id: step_id.to_string(),
        fingerprint: fingerprint(&run_id, step_id, config),
    }
}

/// Ledger facade over the engine repository.
pub struct IdempotencyLedger<R: EngineRepository> {
    repo: Arc<R>,
}

impl<R: EngineRepository> IdempotencyLedger<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub async fn check(&self, key: &IdempotencyKey) -> Result<IdempotencyCheck, RepositoryError> {
        self.repo.check_idempotency(key).await
    }

    /// Store a result. Returns the canonical stored result, which is the
    /// earlier one if a concurrent attempt recorded first.
    pub async fn record(&self, key: &IdempotencyKey, result: &Value) -> Result<Value, RepositoryError> {
        let stored = self.repo.record_execution(key, result).await?;
        if &stored != result {
            tracing::debug!(
                run_id = %key.run_id,
                step_id = %key.step_id,
                "idempotency record already existed; keeping first result"
            );
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_fingerprint_is_stable_and_hex() {
        let run = Uuid::now_v7();
        let a = fingerprint(&run, "mail", &json!({ "action": "email.send", "to": "a@b.c" }));
        let b = fingerprint(&run, "mail", &json!({ "to": "a@b.c", "action": "email.send" }));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_varies_by_run_step_and_config() {
        let run = Uuid::now_v7();
        let config = json!({ "action": "note.append" });
        let base = fingerprint(&run, "s1", &config);
        assert_ne!(base, fingerprint(&Uuid::now_v7(), "s1", &config));
        assert_ne!(base, fingerprint(&run, "s2", &config));
        assert_ne!(base, fingerprint(&run, "s1", &json!({ "action": "note.append", "note": "x" })));
    }

    #[tokio::test]
    async fn test_ledger_first_writer_wins() {
        let store = Arc::new(MemoryStore::new());
        let ledger = IdempotencyLedger::new(store.clone());
        let key = ledger_key(
            Uuid::now_v7(),
            Uuid::now_v7(),
            "mail",
            &json!({ "action": "email.send" }),
        );

        assert_eq!(ledger.check(&key).await.unwrap(), IdempotencyCheck::miss());

        let first = ledger.record(&key, &json!({ "sent": 1 })).await.unwrap();
        let second = ledger.record(&key, &json!({ "sent": 2 })).await.unwrap();
        assert_eq!(first, json!({ "sent": 1 }));
        assert_eq!(second, json!({ "sent": 1 }));
        assert_eq!(
            ledger.check(&key).await.unwrap(),
            IdempotencyCheck::hit(json!({ "sent": 1 }))
        );
    }
}
