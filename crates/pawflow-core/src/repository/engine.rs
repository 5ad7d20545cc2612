//! Engine repository trait definition.
//!
//! The storage interface the worker pool and step-chain executor run against:
//! the job queue, run state, the run log, tenant plans and the idempotency
//! ledger. The infrastructure layer (pawflow-infra) implements this trait with
//! SQLite persistence.

use pawflow_types::error::RepositoryError;
use pawflow_types::flow::FlowDefinition;
use pawflow_types::job::{Job, NewJob};
use pawflow_types::ledger::{IdempotencyCheck, IdempotencyKey};
use pawflow_types::plan::TenantPlan;
use pawflow_types::run::{FlowRun, RunContext, RunLogEntry, RunPatch};
use serde_json::Value;
use uuid::Uuid;

/// A run together with the flow it executes.
///
/// `flow` is the definition captured when the run was enrolled; later edits
/// to the flow only reach new runs.
#[derive(Debug, Clone)]
pub struct RunWithFlow {
    pub run: FlowRun,
    pub flow: FlowDefinition,
}

/// The writes that park a run behind a delay, applied as one unit.
#[derive(Debug, Clone)]
pub struct RunSuspension {
    /// The claimed job that ran the delay step; removed.
    pub job_id: Uuid,
    /// The job that resumes the run at `resume.step_id` once due.
    pub resume: NewJob,
    /// Context as of the delay step.
    pub context: RunContext,
    pub log: RunLogEntry,
}

/// Repository trait for the execution engine.
///
/// Covers four entity families:
/// - **Jobs:** atomic claim, enqueue, delete, reschedule, suspend.
/// - **Runs:** load with flow, partial update.
/// - **Run log:** append-only trace.
/// - **Ledger / plans:** idempotency records and tenant plan lookup.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait EngineRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    /// Atomically claim the earliest due job that is unclaimed (or whose
    /// claim expired) for `worker_id`.
    ///
    /// Two concurrent callers never receive the same job.
    fn claim_next_job(
        &self,
        worker_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Job>, RepositoryError>> + Send;

    /// Enqueue a new job.
    fn create_job(
        &self,
        job: &NewJob,
    ) -> impl std::future::Future<Output = Result<Job, RepositoryError>> + Send;

    /// Delete a job. Deleting a job that no longer exists is not an error.
    fn delete_job(
        &self,
        job_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Push a job `delay_ms` into the future, bump its attempt count and
    /// release the claim.
    fn reschedule_job(
        &self,
        job_id: &Uuid,
        delay_ms: u64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Park a run: enqueue the resume job, set the run `queued` at the resume
    /// step with `context`, append the log entry and delete the claimed job.
    ///
    /// Either every write lands or none does, so a failed suspension leaves
    /// the claimed job as the run's only job.
    fn suspend_run(
        &self,
        suspension: &RunSuspension,
    ) -> impl std::future::Future<Output = Result<Job, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Load a run and the flow snapshot it executes.
    fn get_run_with_flow(
        &self,
        tenant_id: &Uuid,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<RunWithFlow>, RepositoryError>> + Send;

    /// Apply a partial update to a run.
    fn update_run(
        &self,
        tenant_id: &Uuid,
        run_id: &Uuid,
        patch: &RunPatch,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Append an entry to a run's execution trace.
    fn append_run_log(
        &self,
        entry: &RunLogEntry,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Plans and ledger
    // -----------------------------------------------------------------------

    /// The tenant's plan. Tenants without a stored plan are on the free tier.
    fn get_tenant_plan(
        &self,
        tenant_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<TenantPlan, RepositoryError>> + Send;

    /// Look up a prior execution of an action step.
    fn check_idempotency(
        &self,
        key: &IdempotencyKey,
    ) -> impl std::future::Future<Output = Result<IdempotencyCheck, RepositoryError>> + Send;

    /// Record an action result under `key`.
    ///
    /// The key is unique: if another attempt recorded first, the stored
    /// result is kept and returned instead of `result`.
    fn record_execution(
        &self,
        key: &IdempotencyKey,
        result: &Value,
    ) -> impl std::future::Future<Output = Result<Value, RepositoryError>> + Send;
}
