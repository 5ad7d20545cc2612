//! In-memory doubles shared by the engine's unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use pawflow_types::error::RepositoryError;
use pawflow_types::flow::{FlowDefinition, ScheduleSpec, StepDefinition, StepKind, TriggerDescriptor};
use pawflow_types::job::{Job, NewJob};
use pawflow_types::ledger::{IdempotencyCheck, IdempotencyKey};
use pawflow_types::plan::{PlanTier, TenantPlan};
use pawflow_types::run::{FlowRun, RunContext, RunLogEntry, RunPatch, RunStatus};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::flow::mail::{MailError, MailMessage, MailReceipt, MailSender};
use crate::flow::trigger::{EnrollmentSubject, SubjectSource};
use crate::repository::engine::{EngineRepository, RunSuspension, RunWithFlow};
use crate::repository::flow::{FlowRepository, SubjectHistory};

const CLAIM_TTL_SECS: i64 = 900;
const TEST_WORKER: &str = "test-worker";

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct State {
    flows: HashMap<Uuid, FlowDefinition>,
    runs: HashMap<Uuid, FlowRun>,
    snapshots: HashMap<Uuid, FlowDefinition>,
    jobs: HashMap<Uuid, Job>,
    logs: Vec<RunLogEntry>,
    ledger: HashMap<IdempotencyKey, Value>,
    plans: HashMap<Uuid, PlanTier>,
    fail_next_suspend: bool,
}

/// Both repository traits over plain maps.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn insert_flow(&self, flow: FlowDefinition) {
        self.with(|s| s.flows.insert(flow.id, flow));
    }

    pub fn job(&self, id: &Uuid) -> Option<Job> {
        self.with(|s| s.jobs.get(id).cloned())
    }

    pub fn run(&self, id: &Uuid) -> Option<FlowRun> {
        self.with(|s| s.runs.get(id).cloned())
    }

    pub fn run_count(&self) -> usize {
        self.with(|s| s.runs.len())
    }

    pub fn runs_for_flow(&self, flow_id: &Uuid) -> Vec<FlowRun> {
        self.with(|s| s.runs.values().filter(|r| r.flow_id == *flow_id).cloned().collect())
    }

    pub fn jobs_for(&self, run_id: &Uuid) -> Vec<Job> {
        self.with(|s| {
            let mut jobs: Vec<Job> = s.jobs.values().filter(|j| j.run_id == *run_id).cloned().collect();
            jobs.sort_by_key(|j| j.due_at);
            jobs
        })
    }

    pub fn logs_for(&self, run_id: &Uuid) -> Vec<RunLogEntry> {
        self.with(|s| s.logs.iter().filter(|l| l.run_id == *run_id).cloned().collect())
    }

    /// Make the next `suspend_run` fail without writing anything.
    pub fn fail_next_suspend(&self) {
        self.with(|s| s.fail_next_suspend = true);
    }

    pub fn ledger_len(&self) -> usize {
        self.with(|s| s.ledger.len())
    }

    pub fn set_run_status(&self, id: &Uuid, status: RunStatus) {
        self.with(|s| {
            if let Some(run) = s.runs.get_mut(id) {
                run.status = status;
            }
        });
    }

    /// Put a run back to its just-enrolled state, keeping the ledger.
    pub fn reset_run(&self, id: &Uuid) {
        self.with(|s| {
            if let Some(run) = s.runs.get_mut(id) {
                run.status = RunStatus::Queued;
                run.current_step_id = None;
                run.finished_at = None;
                run.error = None;
                run.context.actions.clear();
            }
        });
    }

    /// Make every job of a run due now.
    pub fn make_due(&self, run_id: &Uuid) {
        let now = Utc::now();
        self.with(|s| {
            for job in s.jobs.values_mut().filter(|j| j.run_id == *run_id) {
                job.due_at = now;
            }
        });
    }

    /// Insert a finished run for `subject_id` started at `started_at`.
    pub fn seed_run(&self, flow: &FlowDefinition, subject_id: &str, started_at: DateTime<Utc>) {
        let run = FlowRun {
            id: Uuid::now_v7(),
            tenant_id: flow.tenant_id,
            flow_id: flow.id,
            trigger_type: "schedule".to_string(),
            subject_id: Some(subject_id.to_string()),
            status: RunStatus::Succeeded,
            current_step_id: None,
            context: RunContext::new("schedule", json!({ "subjectId": subject_id })),
            started_at,
            finished_at: Some(started_at),
            error: None,
        };
        self.with(|s| s.runs.insert(run.id, run));
    }
}

impl EngineRepository for MemoryStore {
    async fn claim_next_job(&self, worker_id: &str) -> Result<Option<Job>, RepositoryError> {
        let now = Utc::now();
        let expired = now - TimeDelta::seconds(CLAIM_TTL_SECS);
        Ok(self.with(|s| {
            let id = s
                .jobs
                .values()
                .filter(|j| j.due_at <= now)
                .filter(|j| j.claimed_at.is_none_or(|at| at < expired))
                .min_by_key(|j| (j.due_at, j.id))
                .map(|j| j.id)?;
            let job = s.jobs.get_mut(&id)?;
            job.claimed_by = Some(worker_id.to_string());
            job.claimed_at = Some(now);
            Some(job.clone())
        }))
    }

    async fn create_job(&self, job: &NewJob) -> Result<Job, RepositoryError> {
        let job = job.clone().into_job();
        self.with(|s| s.jobs.insert(job.id, job.clone()));
        Ok(job)
    }

    async fn delete_job(&self, job_id: &Uuid) -> Result<(), RepositoryError> {
        self.with(|s| s.jobs.remove(job_id));
        Ok(())
    }

    async fn reschedule_job(&self, job_id: &Uuid, delay_ms: u64) -> Result<(), RepositoryError> {
        self.with(|s| {
            let job = s.jobs.get_mut(job_id).ok_or(RepositoryError::NotFound)?;
            job.attempts += 1;
            job.due_at = i64::try_from(delay_ms)
                .ok()
                .and_then(TimeDelta::try_milliseconds)
                .and_then(|delay| Utc::now().checked_add_signed(delay))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            job.claimed_by = None;
            job.claimed_at = None;
            Ok(())
        })
    }

    async fn suspend_run(&self, suspension: &RunSuspension) -> Result<Job, RepositoryError> {
        let resume = suspension.resume.clone().into_job();
        self.with(|s| {
            if std::mem::take(&mut s.fail_next_suspend) {
                return Err(RepositoryError::Query("injected suspend failure".to_string()));
            }
            let run = s
                .runs
                .get_mut(&resume.run_id)
                .filter(|r| r.tenant_id == resume.tenant_id)
                .ok_or(RepositoryError::NotFound)?;
            run.status = RunStatus::Queued;
            run.current_step_id = resume.step_id.clone();
            run.context = suspension.context.clone();
            s.logs.push(suspension.log.clone());
            s.jobs.remove(&suspension.job_id);
            s.jobs.insert(resume.id, resume.clone());
            Ok(resume)
        })
    }

    async fn get_run_with_flow(
        &self,
        tenant_id: &Uuid,
        run_id: &Uuid,
    ) -> Result<Option<RunWithFlow>, RepositoryError> {
        Ok(self.with(|s| {
            let run = s.runs.get(run_id).filter(|r| r.tenant_id == *tenant_id)?;
            let flow = s.snapshots.get(run_id)?;
            Some(RunWithFlow {
                run: run.clone(),
                flow: flow.clone(),
            })
        }))
    }

    async fn update_run(
        &self,
        tenant_id: &Uuid,
        run_id: &Uuid,
        patch: &RunPatch,
    ) -> Result<(), RepositoryError> {
        self.with(|s| {
            let run = s
                .runs
                .get_mut(run_id)
                .filter(|r| r.tenant_id == *tenant_id)
                .ok_or(RepositoryError::NotFound)?;
            if let Some(status) = patch.status {
                run.status = status;
            }
            if let Some(step) = &patch.current_step_id {
                run.current_step_id = step.clone();
            }
            if let Some(context) = &patch.context {
                run.context = context.clone();
            }
            if let Some(at) = patch.finished_at {
                run.finished_at = Some(at);
            }
            if let Some(error) = &patch.error {
                run.error = Some(error.clone());
            }
            Ok(())
        })
    }

    async fn append_run_log(&self, entry: &RunLogEntry) -> Result<(), RepositoryError> {
        self.with(|s| s.logs.push(entry.clone()));
        Ok(())
    }

    async fn get_tenant_plan(&self, tenant_id: &Uuid) -> Result<TenantPlan, RepositoryError> {
        Ok(self.with(|s| match s.plans.get(tenant_id) {
            Some(plan) => TenantPlan {
                tenant_id: *tenant_id,
                plan: *plan,
            },
            None => TenantPlan::free(*tenant_id),
        }))
    }

    async fn check_idempotency(&self, key: &IdempotencyKey) -> Result<IdempotencyCheck, RepositoryError> {
        Ok(self.with(|s| match s.ledger.get(key) {
            Some(result) => IdempotencyCheck::hit(result.clone()),
            None => IdempotencyCheck::miss(),
        }))
    }

    async fn record_execution(&self, key: &IdempotencyKey, result: &Value) -> Result<Value, RepositoryError> {
        Ok(self.with(|s| s.ledger.entry(key.clone()).or_insert_with(|| result.clone()).clone()))
    }
}

impl FlowRepository for MemoryStore {
    async fn save_flow(&self, flow: &FlowDefinition) -> Result<(), RepositoryError> {
        self.insert_flow(flow.clone());
        Ok(())
    }

    async fn get_flow(&self, tenant_id: &Uuid, flow_id: &Uuid) -> Result<Option<FlowDefinition>, RepositoryError> {
        Ok(self.with(|s| s.flows.get(flow_id).filter(|f| f.tenant_id == *tenant_id).cloned()))
    }

    async fn list_scheduled_flows(&self) -> Result<Vec<FlowDefinition>, RepositoryError> {
        Ok(self.with(|s| {
            s.flows
                .values()
                .filter(|f| f.enabled && f.schedule().is_some())
                .cloned()
                .collect()
        }))
    }

    async fn set_tenant_plan(&self, plan: &TenantPlan) -> Result<(), RepositoryError> {
        self.with(|s| s.plans.insert(plan.tenant_id, plan.plan));
        Ok(())
    }

    async fn create_run_with_job(
        &self,
        flow: &FlowDefinition,
        run: &FlowRun,
        job: &NewJob,
    ) -> Result<Job, RepositoryError> {
        let job = job.clone().into_job();
        self.with(|s| {
            s.runs.insert(run.id, run.clone());
            s.snapshots.insert(run.id, flow.clone());
            s.jobs.insert(job.id, job.clone());
        });
        Ok(job)
    }

    async fn subject_history(
        &self,
        tenant_id: &Uuid,
        flow_id: &Uuid,
        subject_id: &str,
    ) -> Result<SubjectHistory, RepositoryError> {
        Ok(self.with(|s| {
            let runs: Vec<&FlowRun> = s
                .runs
                .values()
                .filter(|r| r.tenant_id == *tenant_id && r.flow_id == *flow_id)
                .filter(|r| r.subject_id.as_deref() == Some(subject_id))
                .collect();
            SubjectHistory {
                prior_runs: runs.len() as u64,
                last_started_at: runs.iter().map(|r| r.started_at).max(),
            }
        }))
    }

    async fn get_run(&self, tenant_id: &Uuid, run_id: &Uuid) -> Result<Option<FlowRun>, RepositoryError> {
        Ok(self.with(|s| s.runs.get(run_id).filter(|r| r.tenant_id == *tenant_id).cloned()))
    }

    async fn list_jobs_for_run(&self, _tenant_id: &Uuid, run_id: &Uuid) -> Result<Vec<Job>, RepositoryError> {
        Ok(self.jobs_for(run_id))
    }

    async fn list_run_logs(&self, _tenant_id: &Uuid, run_id: &Uuid) -> Result<Vec<RunLogEntry>, RepositoryError> {
        Ok(self.logs_for(run_id))
    }
}

// ---------------------------------------------------------------------------
// Mail
// ---------------------------------------------------------------------------

/// Records messages instead of sending them.
#[derive(Clone, Default)]
pub struct RecordingMailSender {
    sent: Arc<Mutex<Vec<MailMessage>>>,
    attempts: Arc<AtomicUsize>,
    failures: usize,
}

impl RecordingMailSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sender whose every delivery fails.
    pub fn failing() -> Self {
        Self::failing_first(usize::MAX)
    }

    /// A sender that fails its first `failures` deliveries.
    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Delivery attempts, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl MailSender for RecordingMailSender {
    async fn send(&self, message: &MailMessage) -> Result<MailReceipt, MailError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            return Err(MailError::Delivery("relay unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(MailReceipt {
            message_id: Some(format!("msg-{n}")),
            delivered: true,
        })
    }
}

// ---------------------------------------------------------------------------
// Subjects
// ---------------------------------------------------------------------------

/// Returns the same subjects for every flow.
pub struct StaticSubjects {
    subjects: Vec<EnrollmentSubject>,
}

impl StaticSubjects {
    pub fn new(subjects: Vec<EnrollmentSubject>) -> Self {
        Self { subjects }
    }
}

impl SubjectSource for StaticSubjects {
    async fn candidates(&self, _flow: &FlowDefinition) -> Result<Vec<EnrollmentSubject>, RepositoryError> {
        Ok(self.subjects.clone())
    }
}

// ---------------------------------------------------------------------------
// Flows and fixtures
// ---------------------------------------------------------------------------

fn note_step() -> StepDefinition {
    StepDefinition {
        id: "note".to_string(),
        kind: StepKind::Action,
        config: json!({ "action": "note.append", "note": "hello" }),
        next_id: None,
        alt_next_id: None,
    }
}

/// A manually triggered one-step flow.
pub fn sample_flow(tenant_id: Uuid) -> FlowDefinition {
    FlowDefinition {
        id: Uuid::now_v7(),
        tenant_id,
        name: "sample".to_string(),
        enabled: true,
        entry_step_id: None,
        steps: vec![note_step()],
        trigger: TriggerDescriptor::Manual {},
        reenrollment: None,
        updated_at: Utc::now(),
    }
}

/// A one-step flow fired by `schedule`.
pub fn scheduled_flow(tenant_id: Uuid, schedule: ScheduleSpec) -> FlowDefinition {
    FlowDefinition {
        trigger: TriggerDescriptor::Schedule {
            schedule,
            criteria: None,
            audience: None,
        },
        name: "scheduled".to_string(),
        ..sample_flow(tenant_id)
    }
}

/// A store holding one tenant, one flow and one freshly enrolled run.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub tenant_id: Uuid,
    pub flow: FlowDefinition,
    pub run_id: Uuid,
}

impl Fixture {
    pub async fn new(plan: PlanTier) -> Self {
        Self::with_flow(plan, vec![note_step()], json!({})).await
    }

    /// `seed` is merged into the run context before the first step.
    pub async fn with_flow(plan: PlanTier, steps: Vec<StepDefinition>, seed: Value) -> Self {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = Uuid::now_v7();
        store
            .set_tenant_plan(&TenantPlan { tenant_id, plan })
            .await
            .unwrap();

        let flow = FlowDefinition {
            steps,
            ..sample_flow(tenant_id)
        };
        store.insert_flow(flow.clone());

        let mut context = RunContext::new("manual", json!({}));
        if let Value::Object(seed) = &seed {
            context.merge(seed);
        }
        let run = FlowRun {
            id: Uuid::now_v7(),
            tenant_id,
            flow_id: flow.id,
            trigger_type: "manual".to_string(),
            subject_id: None,
            status: RunStatus::Queued,
            current_step_id: None,
            context,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        };
        store
            .create_run_with_job(&flow, &run, &Self::new_job(tenant_id, run.id, None))
            .await
            .unwrap();

        Self {
            store,
            tenant_id,
            flow,
            run_id: run.id,
        }
    }

    fn new_job(tenant_id: Uuid, run_id: Uuid, step_id: Option<&str>) -> NewJob {
        NewJob {
            tenant_id,
            run_id,
            step_id: step_id.map(str::to_string),
            due_at: Utc::now(),
            max_attempts: 5,
            payload: None,
        }
    }

    /// Claim the next due job; panics when none is due.
    pub async fn claim(&self) -> Job {
        self.store
            .claim_next_job(TEST_WORKER)
            .await
            .unwrap()
            .expect("a due job")
    }

    /// Claim the run's next job even if its backoff has not elapsed.
    pub async fn claim_ignoring_due(&self) -> Job {
        self.store.make_due(&self.run_id);
        self.claim().await
    }

    /// Enqueue and claim a job for the fixture run.
    pub async fn enqueue(&self, step_id: Option<&str>) -> Job {
        self.store
            .create_job(&Self::new_job(self.tenant_id, self.run_id, step_id))
            .await
            .unwrap();
        self.claim().await
    }
}
