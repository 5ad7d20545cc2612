//! Engine configuration types.
//!
//! `EngineConfig` is the top-level `pawflow.toml`. Every field has a default so
//! an empty or missing file yields a working configuration.

use serde::{Deserialize, Serialize};

/// Default escalating retry schedule: 1m, 5m, 15m, 1h, 6h, 24h.
pub const DEFAULT_RETRY_SCHEDULE_SECS: [u64; 6] = [60, 300, 900, 3_600, 21_600, 86_400];

/// Top-level configuration for a worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Identity prefix written into job claims.
    #[serde(default = "default_worker_id")]
    pub worker_id: String,

    /// Number of independent worker loops.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Sleep between claim attempts when the queue is idle.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Steps slower than this are logged as warnings (never aborted).
    #[serde(default = "default_step_soft_timeout_ms")]
    pub step_soft_timeout_ms: u64,

    /// Hard cap on steps executed in one chain invocation.
    #[serde(default = "default_max_steps_per_chain")]
    pub max_steps_per_chain: u32,

    /// Attempt budget given to newly enqueued jobs.
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,

    /// A claim older than this may be taken over by another worker.
    #[serde(default = "default_claim_ttl_secs")]
    pub claim_ttl_secs: u64,

    /// How often the trigger scheduler reloads schedules from storage.
    #[serde(default = "default_reload_interval_secs")]
    pub reload_interval_secs: u64,

    /// Backoff delays by attempt, clamped at the last entry.
    #[serde(default = "default_retry_schedule_secs")]
    pub retry_schedule_secs: Vec<u64>,

    /// Relative jitter applied to each backoff delay (0.1 = ±10%).
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,

    /// SQLite URL. Defaults to `{data_dir}/pawflow.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// Outbound mail settings.
    #[serde(default)]
    pub mail: MailConfig,
}

fn default_worker_id() -> String {
    "pawflow-worker".to_string()
}

fn default_worker_count() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_step_soft_timeout_ms() -> u64 {
    10_000
}

fn default_max_steps_per_chain() -> u32 {
    200
}

fn default_max_attempts() -> u32 {
    5
}

fn default_claim_ttl_secs() -> u64 {
    900
}

fn default_reload_interval_secs() -> u64 {
    3_600
}

fn default_retry_schedule_secs() -> Vec<u64> {
    DEFAULT_RETRY_SCHEDULE_SECS.to_vec()
}

fn default_retry_jitter() -> f64 {
    0.1
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            worker_count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            step_soft_timeout_ms: default_step_soft_timeout_ms(),
            max_steps_per_chain: default_max_steps_per_chain(),
            default_max_attempts: default_max_attempts(),
            claim_ttl_secs: default_claim_ttl_secs(),
            reload_interval_secs: default_reload_interval_secs(),
            retry_schedule_secs: default_retry_schedule_secs(),
            retry_jitter: default_retry_jitter(),
            database_url: None,
            mail: MailConfig::default(),
        }
    }
}

/// Outbound mail configuration.
///
/// Without a `relay_url` mail is only logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.poll_interval_ms, 1_000);
        assert_eq!(config.max_steps_per_chain, 200);
        assert_eq!(config.retry_schedule_secs, DEFAULT_RETRY_SCHEDULE_SECS.to_vec());
        assert!(config.mail.relay_url.is_none());
    }

    #[test]
    fn test_engine_config_deserialize_empty() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.worker_id, "pawflow-worker");
        assert_eq!(config.claim_ttl_secs, 900);
        assert!((config.retry_jitter - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
worker_id = "kennel-a"
worker_count = 8
poll_interval_ms = 250
retry_schedule_secs = [30, 60]

[mail]
relay_url = "http://localhost:8025/send"
from = "noreply@example.com"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.worker_id, "kennel-a");
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.retry_schedule_secs, vec![30, 60]);
        assert_eq!(config.mail.from.as_deref(), Some("noreply@example.com"));
        // Untouched fields keep defaults
        assert_eq!(config.max_steps_per_chain, 200);
    }
}
