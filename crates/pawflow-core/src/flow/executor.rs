//! Step-chain executor.
//!
//! Drives one claimed job: loads the run and its flow, then walks the step
//! graph from the resume point until the chain finishes, suspends behind a
//! delay, or fails. Progress (`current_step_id` and context) is persisted
//! after every step so a crashed or retried job resumes where it left off.
//!
//! Step semantics:
//! - **condition / branch**: evaluate the config; `next_id` on true,
//!   `alt_next_id` on false. A false result with no `alt_next_id` ends the run.
//! - **action**: dispatch through the registry, guarded by the idempotency
//!   ledger.
//! - **delay**: enqueue a job for `next_id` and release the worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use pawflow_types::config::EngineConfig;
use pawflow_types::flow::{FlowDefinition, StepDefinition, StepKind};
use pawflow_types::job::{Job, NewJob};
use pawflow_types::plan::PlanTier;
use pawflow_types::run::{
    ActionLogEntry, FlowRun, LogLevel, RunContext, RunLogEntry, RunPatch, RunStatus,
};
use serde_json::{Value, json};
use tracing::Instrument;

use super::dispatcher::{ActionOutcome, ActionRegistry, ActionRequest, action_type_of, plan_allows};
use super::duration::parse_duration;
use super::error::EngineError;
use super::expression::ExpressionEvaluator;
use super::idempotency::{IdempotencyLedger, ledger_key};
use crate::repository::engine::{EngineRepository, RunSuspension};

/// Config keys a delay step may carry its duration under.
const DELAY_KEYS: &[&str] = &["duration", "iso", "delay"];

// ---------------------------------------------------------------------------
// Settings and outcome
// ---------------------------------------------------------------------------

/// Executor tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Hard cap on steps executed per invocation.
    pub max_steps_per_chain: u32,
    /// Steps slower than this are logged as warnings.
    pub step_soft_timeout: Duration,
    /// Attempt budget for jobs created by delay steps.
    pub default_max_attempts: u32,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl ExecutorSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_steps_per_chain: config.max_steps_per_chain.max(1),
            step_soft_timeout: Duration::from_millis(config.step_soft_timeout_ms),
            default_max_attempts: config.default_max_attempts.max(1),
        }
    }
}

/// How a chain invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    /// The run reached the end of its graph.
    Completed { steps: u32 },
    /// The run is parked behind a delay job.
    Suspended {
        steps: u32,
        resume_step_id: String,
        due_at: DateTime<Utc>,
    },
    /// The job had nothing to do (run missing or already finished) and was dropped.
    Discarded,
}

/// Where a single step sends the chain next.
enum StepTransition {
    Next(Option<String>),
    Suspend {
        resume_step_id: String,
        due_at: DateTime<Utc>,
    },
}

// ---------------------------------------------------------------------------
// StepChainExecutor
// ---------------------------------------------------------------------------

/// Executes step chains for claimed jobs.
///
/// Generic over `R: EngineRepository` for storage flexibility.
pub struct StepChainExecutor<R: EngineRepository> {
    repo: Arc<R>,
    registry: Arc<ActionRegistry>,
    ledger: IdempotencyLedger<R>,
    evaluator: ExpressionEvaluator,
    settings: ExecutorSettings,
}

impl<R: EngineRepository> StepChainExecutor<R> {
    pub fn new(repo: Arc<R>, registry: Arc<ActionRegistry>, settings: ExecutorSettings) -> Self {
        Self {
            ledger: IdempotencyLedger::new(repo.clone()),
            repo,
            registry,
            evaluator: ExpressionEvaluator::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Run the chain for a claimed job.
    ///
    /// On error the run is left `running` at the failing step; the caller
    /// hands the error to the retry controller.
    pub async fn execute(&self, job: &Job) -> Result<ChainOutcome, EngineError> {
        let span = tracing::info_span!(
            "flow.run_chain",
            job_id = %job.id,
            run_id = %job.run_id,
            tenant_id = %job.tenant_id,
        );
        self.execute_inner(job).instrument(span).await
    }

    async fn execute_inner(&self, job: &Job) -> Result<ChainOutcome, EngineError> {
        let Some(loaded) = self
            .repo
            .get_run_with_flow(&job.tenant_id, &job.run_id)
            .await?
        else {
            tracing::warn!("run for job no longer exists; dropping job");
            self.repo.delete_job(&job.id).await?;
            return Ok(ChainOutcome::Discarded);
        };
        let (run, flow) = (loaded.run, loaded.flow);

        if run.status.is_terminal() {
            tracing::info!(status = run.status.as_str(), "run already finished; dropping job");
            self.repo.delete_job(&job.id).await?;
            return Ok(ChainOutcome::Discarded);
        }

        // A running run resumes at its last persisted step. The job's own
        // step only seeds runs that are queued.
        let entry = match (run.status, &run.current_step_id) {
            (RunStatus::Running, Some(step_id)) => step_id.clone(),
            (RunStatus::Running, None) => {
                tracing::info!("run passed its last step before the job finished; completing");
                self.complete_run(job, &run, run.context.clone()).await?;
                return Ok(ChainOutcome::Completed { steps: 0 });
            }
            _ => job
                .step_id
                .clone()
                .or_else(|| run.current_step_id.clone())
                .or_else(|| flow.entry_step_id().map(str::to_string))
                .ok_or_else(|| {
                    EngineError::Configuration(format!("flow '{}' has no entry step", flow.id))
                })?,
        };

        let plan = self.repo.get_tenant_plan(&job.tenant_id).await?.plan;

        self.repo
            .update_run(
                &run.tenant_id,
                &run.id,
                &RunPatch::status(RunStatus::Running).with_step(Some(entry.clone())),
            )
            .await?;

        let mut context = run.context.clone();
        let mut current = Some(entry);
        let mut steps: u32 = 0;

        while let Some(step_id) = current {
            steps += 1;
            if steps > self.settings.max_steps_per_chain {
                return Err(EngineError::Configuration(format!(
                    "run exceeded {} steps in one chain",
                    self.settings.max_steps_per_chain
                )));
            }

            let step = flow.step(&step_id).ok_or_else(|| {
                EngineError::Configuration(format!(
                    "step '{step_id}' not found in flow '{}'",
                    flow.id
                ))
            })?;

            let started = Instant::now();
            let transition = self
                .execute_step(job, &run, &flow, step, plan, &mut context)
                .await?;
            self.check_soft_timeout(&run, step, started.elapsed()).await?;

            match transition {
                StepTransition::Next(next) => {
                    self.repo
                        .update_run(
                            &run.tenant_id,
                            &run.id,
                            &RunPatch::progress(next.clone(), context.clone()),
                        )
                        .await?;
                    current = next;
                }
                StepTransition::Suspend {
                    resume_step_id,
                    due_at,
                } => {
                    return Ok(ChainOutcome::Suspended {
                        steps,
                        resume_step_id,
                        due_at,
                    });
                }
            }
        }

        self.complete_run(job, &run, context).await?;
        Ok(ChainOutcome::Completed { steps })
    }

    async fn execute_step(
        &self,
        job: &Job,
        run: &FlowRun,
        flow: &FlowDefinition,
        step: &StepDefinition,
        plan: PlanTier,
        context: &mut RunContext,
    ) -> Result<StepTransition, EngineError> {
        tracing::debug!(step_id = %step.id, kind = %step.kind, flow_id = %flow.id, "executing step");
        match step.kind {
            StepKind::Condition | StepKind::Branch => {
                let result = self
                    .evaluator
                    .evaluate(&step.config, &context.to_expression_context())?;
                self.log(
                    RunLogEntry::new(
                        run.tenant_id,
                        run.id,
                        Some(&step.id),
                        LogLevel::Info,
                        format!("{} evaluated", step.kind),
                    )
                    .with_input(step.config.clone())
                    .with_output(json!({ "result": result })),
                )
                .await?;
                let next = if result {
                    step.next_id.clone()
                } else {
                    step.alt_next_id.clone()
                };
                Ok(StepTransition::Next(next))
            }
            StepKind::Action => {
                self.execute_action(run, step, plan, context).await?;
                Ok(StepTransition::Next(step.next_id.clone()))
            }
            StepKind::Delay => self.execute_delay(job, run, step, plan, context).await,
            StepKind::Unknown => Err(EngineError::UnknownStep {
                step_id: step.id.clone(),
                kind: step.kind.to_string(),
            }),
        }
    }

    async fn execute_action(
        &self,
        run: &FlowRun,
        step: &StepDefinition,
        plan: PlanTier,
        context: &mut RunContext,
    ) -> Result<(), EngineError> {
        let key = ledger_key(run.tenant_id, run.id, &step.id, &step.config);
        let check = self.ledger.check(&key).await?;

        let (outcome, replayed) = match check.result {
            Some(record) if check.executed => (ActionOutcome::from_record(&record), true),
            _ => {
                let request = ActionRequest {
                    tenant_id: run.tenant_id,
                    run_id: run.id,
                    step,
                    context: &*context,
                };
                let outcome = self.registry.execute(plan, &request).await?;
                let stored = self.ledger.record(&key, &outcome.to_record()).await?;
                (ActionOutcome::from_record(&stored), false)
            }
        };

        let action_type = action_type_of(&step.config).unwrap_or_default().to_string();

        // A replay after a crash may find the action already applied to the
        // persisted context.
        let already_applied = replayed && context.actions.iter().any(|a| a.step_id == step.id);
        if !already_applied {
            if let Some(patch) = &outcome.context_patch {
                context.merge(patch);
            }
            context.record_action(ActionLogEntry {
                step_id: step.id.clone(),
                action_type: action_type.clone(),
                output: outcome.output.clone(),
                replayed,
                at: Utc::now(),
            });
        }

        let message = if replayed {
            "action replayed from ledger"
        } else {
            "action executed"
        };
        tracing::info!(step_id = %step.id, action_type = %action_type, replayed, "{message}");
        self.log(
            RunLogEntry::new(run.tenant_id, run.id, Some(&step.id), LogLevel::Info, message)
                .with_input(step.config.clone())
                .with_output(outcome.output),
        )
        .await
    }

    async fn execute_delay(
        &self,
        job: &Job,
        run: &FlowRun,
        step: &StepDefinition,
        plan: PlanTier,
        context: &RunContext,
    ) -> Result<StepTransition, EngineError> {
        if !plan_allows(plan, "delay") {
            return Err(EngineError::PlanLimit {
                action: "delay".to_string(),
                plan,
            });
        }

        let raw = DELAY_KEYS
            .iter()
            .find_map(|k| step.config.get(*k).and_then(Value::as_str))
            .ok_or_else(|| {
                EngineError::Configuration(format!("delay step '{}' has no duration", step.id))
            })?;
        let delay_ms = parse_duration(raw)?;

        let Some(resume_step_id) = step.next_id.clone() else {
            // Nothing to wait for.
            return Ok(StepTransition::Next(None));
        };

        let due_at = i64::try_from(delay_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .ok_or_else(|| {
                EngineError::Configuration(format!("delay step '{}' is out of range", step.id))
            })?;

        // Resume job, queued run, log entry and claimed job removal land
        // together or not at all.
        let suspension = RunSuspension {
            job_id: job.id,
            resume: NewJob {
                tenant_id: run.tenant_id,
                run_id: run.id,
                step_id: Some(resume_step_id.clone()),
                due_at,
                max_attempts: self.settings.default_max_attempts,
                payload: None,
            },
            context: context.clone(),
            log: RunLogEntry::new(run.tenant_id, run.id, Some(&step.id), LogLevel::Info, "delay scheduled")
                .with_output(json!({
                    "delayMs": delay_ms,
                    "dueAt": due_at,
                    "resumeStepId": resume_step_id,
                })),
        };
        self.repo.suspend_run(&suspension).await?;

        tracing::info!(step_id = %step.id, delay_ms, resume_step_id = %resume_step_id, "run suspended");
        Ok(StepTransition::Suspend {
            resume_step_id,
            due_at,
        })
    }

    async fn complete_run(&self, job: &Job, run: &FlowRun, context: RunContext) -> Result<(), EngineError> {
        self.repo
            .update_run(
                &run.tenant_id,
                &run.id,
                &RunPatch::progress(None, context)
                    .with_status(RunStatus::Succeeded)
                    .finished(Utc::now()),
            )
            .await?;
        self.log(RunLogEntry::new(run.tenant_id, run.id, None, LogLevel::Info, "run completed"))
            .await?;
        self.repo.delete_job(&job.id).await?;
        tracing::info!("run completed");
        Ok(())
    }

    async fn check_soft_timeout(
        &self,
        run: &FlowRun,
        step: &StepDefinition,
        elapsed: Duration,
    ) -> Result<(), EngineError> {
        if elapsed <= self.settings.step_soft_timeout {
            return Ok(());
        }
        let elapsed_ms = elapsed.as_millis() as u64;
        tracing::warn!(step_id = %step.id, elapsed_ms, "step exceeded soft timeout");
        self.log(
            RunLogEntry::new(run.tenant_id, run.id, Some(&step.id), LogLevel::Warn, "step exceeded soft timeout")
                .with_output(json!({
                    "elapsedMs": elapsed_ms,
                    "softTimeoutMs": self.settings.step_soft_timeout.as_millis() as u64,
                })),
        )
        .await
    }

    async fn log(&self, entry: RunLogEntry) -> Result<(), EngineError> {
        self.repo.append_run_log(&entry).await?;
        Ok(())
    }
}
