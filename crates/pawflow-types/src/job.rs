//! Queue job types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A claimable unit of deferred work: "resume this run at this step at this time".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub run_id: Uuid,
    /// Step to resume at. `None` means the run's current step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub due_at: DateTime<Utc>,
    /// Failed attempts so far.
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Whether this failure used up the attempt budget.
    pub fn is_last_attempt(&self) -> bool {
        self.attempts + 1 >= self.max_attempts
    }
}

/// Parameters for enqueuing a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub tenant_id: Uuid,
    pub run_id: Uuid,
    pub step_id: Option<String>,
    pub due_at: DateTime<Utc>,
    pub max_attempts: u32,
    pub payload: Option<Value>,
}

impl NewJob {
    /// Materialize the job with a fresh id and zero attempts.
    pub fn into_job(self) -> Job {
        Job {
            id: Uuid::now_v7(),
            tenant_id: self.tenant_id,
            run_id: self.run_id,
            step_id: self.step_id,
            due_at: self.due_at,
            attempts: 0,
            max_attempts: self.max_attempts,
            claimed_by: None,
            claimed_at: None,
            payload: self.payload,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job(max_attempts: u32) -> Job {
        NewJob {
            tenant_id: Uuid::now_v7(),
            run_id: Uuid::now_v7(),
            step_id: Some("start".to_string()),
            due_at: Utc::now(),
            max_attempts,
            payload: None,
        }
        .into_job()
    }

    #[test]
    fn test_into_job_starts_unclaimed() {
        let job = new_job(3);
        assert_eq!(job.attempts, 0);
        assert!(job.claimed_by.is_none());
        assert_eq!(job.step_id.as_deref(), Some("start"));
    }

    #[test]
    fn test_is_last_attempt() {
        let mut job = new_job(3);
        assert!(!job.is_last_attempt());
        job.attempts = 1;
        assert!(!job.is_last_attempt());
        job.attempts = 2;
        assert!(job.is_last_attempt());

        let single = new_job(1);
        assert!(single.is_last_attempt());
    }
}
