//! Enrollment service: the single place runs are created.
//!
//! Used by the trigger scheduler and by external event ingesters. A run and
//! its first job are written together, so a run is never left without work.

use std::sync::Arc;

use chrono::Utc;
use pawflow_types::flow::FlowDefinition;
use pawflow_types::job::{Job, NewJob};
use pawflow_types::run::{FlowRun, RunContext, RunStatus};
use serde_json::Value;
use uuid::Uuid;

use super::error::EngineError;
use crate::repository::flow::FlowRepository;

/// A request to start a flow for one subject.
#[derive(Debug, Clone)]
pub struct EnrollmentRequest {
    /// The subject the run is about (owner id, pet id, ...).
    pub subject_id: Option<String>,
    /// `schedule`, `event`, `manual`, ...
    pub trigger_type: String,
    /// Trigger payload, becomes `context.payload`.
    pub payload: Value,
}

impl EnrollmentRequest {
    pub fn new(trigger_type: impl Into<String>, payload: Value) -> Self {
        Self {
            subject_id: None,
            trigger_type: trigger_type.into(),
            payload,
        }
    }

    pub fn for_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }
}

/// A freshly created run and its first job.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub run: FlowRun,
    pub job: Job,
}

/// Creates runs and their initial jobs.
pub struct EnrollmentService<F: FlowRepository> {
    repo: Arc<F>,
    max_attempts: u32,
}

impl<F: FlowRepository> EnrollmentService<F> {
    pub fn new(repo: Arc<F>, max_attempts: u32) -> Self {
        Self {
            repo,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn repository(&self) -> &Arc<F> {
        &self.repo
    }

    /// Enroll a subject into `flow`. Disabled flows are refused.
    pub async fn enroll(
        &self,
        flow: &FlowDefinition,
        request: EnrollmentRequest,
    ) -> Result<Enrollment, EngineError> {
        if !flow.enabled {
            return Err(EngineError::Configuration(format!(
                "flow '{}' is disabled",
                flow.id
            )));
        }
        if flow.entry_step_id().is_none() {
            return Err(EngineError::Configuration(format!(
                "flow '{}' has no steps",
                flow.id
            )));
        }

        let now = Utc::now();
        let run = FlowRun {
            id: Uuid::now_v7(),
            tenant_id: flow.tenant_id,
            flow_id: flow.id,
            trigger_type: request.trigger_type.clone(),
            subject_id: request.subject_id,
            status: RunStatus::Queued,
            current_step_id: None,
            context: RunContext::new(request.trigger_type, request.payload),
            started_at: now,
            finished_at: None,
            error: None,
        };
        let new_job = NewJob {
            tenant_id: flow.tenant_id,
            run_id: run.id,
            step_id: None,
            due_at: now,
            max_attempts: self.max_attempts,
            payload: None,
        };

        let job = self.repo.create_run_with_job(flow, &run, &new_job).await?;
        tracing::info!(
            flow_id = %flow.id,
            run_id = %run.id,
            subject_id = run.subject_id.as_deref().unwrap_or(""),
            trigger_type = %run.trigger_type,
            "run enrolled"
        );
        Ok(Enrollment { run, job })
    }
}
