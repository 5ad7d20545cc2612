//! Flow repository trait definition.
//!
//! Storage interface used by the trigger scheduler and the enrollment service:
//! flow definitions, run creation, enrollment history, and read access to
//! runs, jobs and logs for inspection.

use chrono::{DateTime, Utc};
use pawflow_types::error::RepositoryError;
use pawflow_types::flow::FlowDefinition;
use pawflow_types::job::{Job, NewJob};
use pawflow_types::plan::TenantPlan;
use pawflow_types::run::{FlowRun, RunLogEntry};
use uuid::Uuid;

/// Enrollment history of one subject in one flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubjectHistory {
    /// Number of runs ever created for the subject.
    pub prior_runs: u64,
    /// Start of the most recent run.
    pub last_started_at: Option<DateTime<Utc>>,
}

/// Repository trait for flow definitions and enrollment.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait FlowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Upsert a flow definition (insert or replace by ID).
    fn save_flow(
        &self,
        flow: &FlowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a flow by tenant and id.
    fn get_flow(
        &self,
        tenant_id: &Uuid,
        flow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<FlowDefinition>, RepositoryError>> + Send;

    /// All enabled flows with a schedule trigger, across tenants.
    fn list_scheduled_flows(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<FlowDefinition>, RepositoryError>> + Send;

    /// Upsert a tenant's plan.
    fn set_tenant_plan(
        &self,
        plan: &TenantPlan,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Enrollment
    // -----------------------------------------------------------------------

    /// Create a run and its initial job in one transaction.
    ///
    /// `flow` is stored with the run as the definition it executes.
    fn create_run_with_job(
        &self,
        flow: &FlowDefinition,
        run: &FlowRun,
        job: &NewJob,
    ) -> impl std::future::Future<Output = Result<Job, RepositoryError>> + Send;

    /// Prior runs of `subject_id` in a flow.
    fn subject_history(
        &self,
        tenant_id: &Uuid,
        flow_id: &Uuid,
        subject_id: &str,
    ) -> impl std::future::Future<Output = Result<SubjectHistory, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Get a run by tenant and id.
    fn get_run(
        &self,
        tenant_id: &Uuid,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<FlowRun>, RepositoryError>> + Send;

    /// Jobs still queued for a run, ordered by due time.
    fn list_jobs_for_run(
        &self,
        tenant_id: &Uuid,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Job>, RepositoryError>> + Send;

    /// A run's trace, oldest first.
    fn list_run_logs(
        &self,
        tenant_id: &Uuid,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<RunLogEntry>, RepositoryError>> + Send;
}
