//! Retry/backoff controller.
//!
//! Decides what happens to a job whose execution failed: reschedule it with
//! escalating, jittered backoff, or fail the run for good.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pawflow_types::config::DEFAULT_RETRY_SCHEDULE_SECS;
use pawflow_types::error::RepositoryError;
use pawflow_types::job::Job;
use pawflow_types::run::{LogLevel, RunLogEntry, RunPatch, RunStatus};
use rand::Rng;
use serde_json::json;

use super::error::EngineError;
use crate::repository::engine::EngineRepository;

// ---------------------------------------------------------------------------
// Backoff policy
// ---------------------------------------------------------------------------

/// Escalating backoff schedule with relative jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay per attempt; attempts past the end reuse the last entry.
    pub schedule: Vec<Duration>,
    /// Relative jitter, e.g. `0.1` for ±10%.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_secs(&DEFAULT_RETRY_SCHEDULE_SECS, 0.1)
    }
}

impl BackoffPolicy {
    pub fn from_secs(schedule_secs: &[u64], jitter: f64) -> Self {
        let schedule = if schedule_secs.is_empty() {
            DEFAULT_RETRY_SCHEDULE_SECS.to_vec()
        } else {
            schedule_secs.to_vec()
        };
        Self {
            schedule: schedule.into_iter().map(Duration::from_secs).collect(),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Un-jittered delay for a job that has failed `attempts` times before.
    pub fn base_delay(&self, attempts: u32) -> Duration {
        let last = self.schedule.len().saturating_sub(1);
        let idx = (attempts as usize).min(last);
        self.schedule.get(idx).copied().unwrap_or_default()
    }

    /// Delay in milliseconds with uniform jitter in `[-jitter, +jitter]`.
    pub fn delay_ms(&self, attempts: u32) -> u64 {
        let base = self.base_delay(attempts).as_millis() as f64;
        if self.jitter <= 0.0 {
            return base as u64;
        }
        let factor = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        (base * (1.0 + factor)).max(0.0).round() as u64
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// What the controller did with a failed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// The job was pushed back by `delay_ms`.
    Rescheduled { delay_ms: u64, attempt: u32 },
    /// The run was failed and the job deleted.
    Failed,
}

/// Whether a failure ends the run rather than being retried.
pub fn is_terminal(error: &EngineError, job: &Job) -> bool {
    !error.is_retryable() || job.is_last_attempt()
}

// ---------------------------------------------------------------------------
// BackoffController
// ---------------------------------------------------------------------------

/// Applies the retry policy to failed jobs.
pub struct BackoffController<R: EngineRepository> {
    repo: Arc<R>,
    policy: BackoffPolicy,
}

impl<R: EngineRepository> BackoffController<R> {
    pub fn new(repo: Arc<R>, policy: BackoffPolicy) -> Self {
        Self { repo, policy }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Handle a failed execution of `job`.
    pub async fn handle_failure(
        &self,
        job: &Job,
        error: &EngineError,
    ) -> Result<RetryDecision, RepositoryError> {
        if is_terminal(error, job) {
            self.fail_run(job, error).await?;
            return Ok(RetryDecision::Failed);
        }

        let delay_ms = self.policy.delay_ms(job.attempts);
        let attempt = job.attempts + 1;

        tracing::warn!(
            job_id = %job.id,
            run_id = %job.run_id,
            attempt,
            max_attempts = job.max_attempts,
            delay_ms,
            error = %error,
            "step failed; retry scheduled"
        );

        let entry = RunLogEntry::new(
            job.tenant_id,
            job.run_id,
            job.step_id.as_deref(),
            LogLevel::Warn,
            "retry scheduled",
        )
        .with_error(error.to_string())
        .with_output(json!({
            "attempt": attempt,
            "maxAttempts": job.max_attempts,
            "delayMs": delay_ms,
        }));
        self.repo.append_run_log(&entry).await?;
        self.repo.reschedule_job(&job.id, delay_ms).await?;

        Ok(RetryDecision::Rescheduled { delay_ms, attempt })
    }

    async fn fail_run(&self, job: &Job, error: &EngineError) -> Result<(), RepositoryError> {
        let message = match error {
            EngineError::PlanLimit { .. } => "action blocked by plan limit",
            _ if error.is_retryable() => "retries exhausted; run failed",
            _ => "run failed",
        };

        tracing::error!(
            job_id = %job.id,
            run_id = %job.run_id,
            attempts = job.attempts + 1,
            kind = error.kind(),
            error = %error,
            "{message}"
        );

        let entry = RunLogEntry::new(
            job.tenant_id,
            job.run_id,
            job.step_id.as_deref(),
            LogLevel::Error,
            message,
        )
        .with_error(error.to_string())
        .with_output(json!({ "kind": error.kind(), "attempts": job.attempts + 1 }));
        self.repo.append_run_log(&entry).await?;

        let patch = RunPatch::status(RunStatus::Failed)
            .finished(Utc::now())
            .with_error(error.to_string());
        self.repo.update_run(&job.tenant_id, &job.run_id, &patch).await?;
        self.repo.delete_job(&job.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use pawflow_types::plan::PlanTier;

    #[test]
    fn test_base_delay_escalates_and_clamps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay(0), Duration::from_secs(60));
        assert_eq!(policy.base_delay(1), Duration::from_secs(300));
        assert_eq!(policy.base_delay(5), Duration::from_secs(86_400));
        assert_eq!(policy.base_delay(40), Duration::from_secs(86_400));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = BackoffPolicy::default();
        for _ in 0..200 {
            let delay = policy.delay_ms(0);
            assert!((54_000..=66_000).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let policy = BackoffPolicy::from_secs(&[1, 2], 0.0);
        assert_eq!(policy.delay_ms(0), 1_000);
        assert_eq!(policy.delay_ms(7), 2_000);
    }

    #[test]
    fn test_empty_schedule_falls_back_to_default() {
        let policy = BackoffPolicy::from_secs(&[], 0.1);
        assert_eq!(policy.schedule.len(), DEFAULT_RETRY_SCHEDULE_SECS.len());
    }

    #[tokio::test]
    async fn test_transient_failure_reschedules() {
        let fx = Fixture::new(PlanTier::Pro).await;
        let controller = BackoffController::new(fx.store.clone(), BackoffPolicy::from_secs(&[60], 0.0));
        let job = fx.claim().await;

        let decision = controller
            .handle_failure(&job, &EngineError::Transient("smtp timeout".into()))
            .await
            .unwrap();
        assert_eq!(decision, RetryDecision::Rescheduled { delay_ms: 60_000, attempt: 1 });

        let stored = fx.store.job(&job.id).unwrap();
        assert_eq!(stored.attempts, 1);
        assert!(stored.claimed_by.is_none());
        assert!(stored.due_at > Utc::now() + chrono::Duration::seconds(50));

        let logs = fx.store.logs_for(&job.run_id);
        assert_eq!(logs.last().unwrap().message, "retry scheduled");
        assert_eq!(logs.last().unwrap().level, LogLevel::Warn);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_fails_run() {
        let fx = Fixture::new(PlanTier::Free).await;
        let controller = BackoffController::new(fx.store.clone(), BackoffPolicy::default());
        let job = fx.claim().await;

        let error = EngineError::PlanLimit {
            action: "email.send".into(),
            plan: PlanTier::Free,
        };
        let decision = controller.handle_failure(&job, &error).await.unwrap();
        assert_eq!(decision, RetryDecision::Failed);

        assert!(fx.store.job(&job.id).is_none());
        let run = fx.store.run(&job.run_id).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.finished_at.is_some());
        assert!(run.error.unwrap().contains("free plan"));

        let logs = fx.store.logs_for(&job.run_id);
        let last = logs.last().unwrap();
        assert_eq!(last.level, LogLevel::Error);
        assert_eq!(last.message, "action blocked by plan limit");
    }

    #[tokio::test]
    async fn test_last_attempt_fails_run() {
        let fx = Fixture::new(PlanTier::Pro).await;
        let controller = BackoffController::new(fx.store.clone(), BackoffPolicy::default());
        let mut job = fx.claim().await;
        job.attempts = job.max_attempts - 1;

        let decision = controller
            .handle_failure(&job, &EngineError::Transient("still down".into()))
            .await
            .unwrap();
        assert_eq!(decision, RetryDecision::Failed);
        let logs = fx.store.logs_for(&job.run_id);
        assert_eq!(logs.last().unwrap().message, "retries exhausted; run failed");
    }
}
