//! Worker pool: independent loops that claim due jobs and run them.
//!
//! Each loop claims one job at a time, hands it to the step-chain executor and
//! routes failures to the backoff controller. Loops share nothing but the
//! repository; the atomic claim keeps two loops off the same job.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use pawflow_types::config::EngineConfig;
use pawflow_types::job::Job;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::error::EngineError;
use super::executor::StepChainExecutor;
use super::retry::{BackoffController, RetryDecision};
use crate::repository::engine::EngineRepository;

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Prefix of each loop's claim identity (`{worker_id}-{n}`).
    pub worker_id: String,
    pub worker_count: usize,
    /// Idle sleep between claim attempts.
    pub poll_interval: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            worker_id: config.worker_id.clone(),
            worker_count: config.worker_count.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }
}

/// Result of one claim-and-execute attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was due.
    Idle,
    /// A job ran to completion, suspension or discard.
    Executed,
    /// A job failed and the controller decided its fate.
    Failed(RetryDecision),
}

/// A fixed set of claim loops over one repository.
pub struct WorkerPool<R: EngineRepository> {
    repo: Arc<R>,
    executor: Arc<StepChainExecutor<R>>,
    backoff: Arc<BackoffController<R>>,
    settings: WorkerSettings,
}

impl<R: EngineRepository + 'static> WorkerPool<R> {
    pub fn new(
        repo: Arc<R>,
        executor: Arc<StepChainExecutor<R>>,
        backoff: Arc<BackoffController<R>>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            repo,
            executor,
            backoff,
            settings,
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Run every loop until `shutdown` is cancelled.
    ///
    /// A loop finishes the job it holds before observing cancellation.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut set = JoinSet::new();
        for n in 0..self.settings.worker_count {
            let pool = self.clone();
            let token = shutdown.clone();
            let worker_id = format!("{}-{n}", self.settings.worker_id);
            set.spawn(async move { pool.worker_loop(worker_id, token).await });
        }
        tracing::info!(
            workers = self.settings.worker_count,
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            "worker pool started"
        );

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "worker loop panicked");
            }
        }
        tracing::info!("worker pool stopped");
    }

    async fn worker_loop(&self, worker_id: String, shutdown: CancellationToken) {
        tracing::debug!(%worker_id, "worker loop started");
        while !shutdown.is_cancelled() {
            match self.tick(&worker_id).await {
                TickOutcome::Idle => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.poll_interval) => {}
                    }
                }
                TickOutcome::Executed | TickOutcome::Failed(_) => {}
            }
        }
        tracing::debug!(%worker_id, "worker loop stopped");
    }

    /// Claim and process at most one job.
    pub async fn tick(&self, worker_id: &str) -> TickOutcome {
        let job = match self.repo.claim_next_job(worker_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return TickOutcome::Idle,
            Err(e) => {
                tracing::error!(%worker_id, error = %e, "job claim failed");
                return TickOutcome::Idle;
            }
        };
        self.process(worker_id, &job).await
    }

    async fn process(&self, worker_id: &str, job: &Job) -> TickOutcome {
        tracing::debug!(%worker_id, job_id = %job.id, run_id = %job.run_id, "job claimed");
        // A panicking step is a failed attempt; the loop keeps running.
        let executed = AssertUnwindSafe(self.executor.execute(job)).catch_unwind().await;
        let error = match executed {
            Ok(Ok(outcome)) => {
                tracing::debug!(job_id = %job.id, ?outcome, "job processed");
                return TickOutcome::Executed;
            }
            Ok(Err(e)) => e,
            Err(_) => {
                tracing::error!(job_id = %job.id, "job execution panicked");
                EngineError::Transient("job execution panicked".to_string())
            }
        };

        match self.backoff.handle_failure(job, &error).await {
            Ok(decision) => TickOutcome::Failed(decision),
            Err(e) => {
                // The claim expires and another worker retries the job.
                tracing::error!(job_id = %job.id, error = %e, "failed to record job failure");
                TickOutcome::Failed(RetryDecision::Failed)
            }
        }
    }
}
