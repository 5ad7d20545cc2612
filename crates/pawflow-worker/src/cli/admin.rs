//! One-shot operator commands: config dump, flow import, plans, manual
//! enrollment and run inspection. Output is JSON on stdout.

use std::path::Path;

use anyhow::Context;
use chrono::Utc;
use pawflow_core::flow::enrollment::EnrollmentRequest;
use pawflow_core::flow::schedule::TimerSpec;
use pawflow_core::repository::flow::FlowRepository;
use pawflow_types::config::EngineConfig;
use pawflow_types::flow::FlowDefinition;
use pawflow_types::plan::{PlanTier, TenantPlan};
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::state::AppState;

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn show_config(config: &EngineConfig) -> anyhow::Result<()> {
    print_json(config)
}

/// Parse a flow definition document. A missing `updated_at` is stamped with
/// the current time; schedules are checked before anything is stored.
pub fn parse_flow(raw: &str) -> anyhow::Result<FlowDefinition> {
    let mut doc: Value = serde_json::from_str(raw).context("flow file is not valid JSON")?;
    let obj = doc
        .as_object_mut()
        .context("flow file must contain a JSON object")?;
    if !obj.contains_key("updated_at") {
        obj.insert("updated_at".to_string(), json!(Utc::now()));
    }

    let flow: FlowDefinition = serde_json::from_value(doc).context("invalid flow definition")?;
    if let Some(schedule) = flow.schedule() {
        TimerSpec::from_schedule(schedule)
            .with_context(|| format!("flow '{}' has an invalid schedule", flow.id))?;
    }
    if flow.entry_step_id().is_none() {
        tracing::warn!(flow_id = %flow.id, "imported flow has no steps; enrollments will be refused");
    }
    Ok(flow)
}

pub async fn import_flow(state: &AppState, path: &Path) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let flow = parse_flow(&raw)?;
    state.flow_repo.save_flow(&flow).await?;

    tracing::info!(flow_id = %flow.id, tenant_id = %flow.tenant_id, "flow stored");
    print_json(&json!({
        "id": flow.id,
        "tenant_id": flow.tenant_id,
        "name": flow.name,
        "enabled": flow.enabled,
        "trigger": flow.trigger.label(),
        "steps": flow.steps.len(),
    }))
}

pub async fn set_plan(state: &AppState, tenant_id: Uuid, plan: PlanTier) -> anyhow::Result<()> {
    let plan = TenantPlan { tenant_id, plan };
    state.flow_repo.set_tenant_plan(&plan).await?;
    print_json(&plan)
}

pub async fn enroll(
    state: &AppState,
    tenant_id: Uuid,
    flow_id: Uuid,
    subject: Option<String>,
    payload: &str,
) -> anyhow::Result<()> {
    let payload: Value = serde_json::from_str(payload).context("--payload is not valid JSON")?;
    if !payload.is_object() {
        anyhow::bail!("--payload must be a JSON object");
    }

    let flow = state
        .flow_repo
        .get_flow(&tenant_id, &flow_id)
        .await?
        .with_context(|| format!("flow '{flow_id}' not found for tenant '{tenant_id}'"))?;

    let mut request = EnrollmentRequest::new("manual", payload);
    if let Some(subject) = subject {
        request = request.for_subject(subject);
    }
    let enrollment = state.enrollment().enroll(&flow, request).await?;

    print_json(&json!({
        "run_id": enrollment.run.id,
        "job_id": enrollment.job.id,
        "due_at": enrollment.job.due_at,
    }))
}

pub async fn inspect(state: &AppState, tenant_id: Uuid, run_id: Uuid) -> anyhow::Result<()> {
    let run = state
        .flow_repo
        .get_run(&tenant_id, &run_id)
        .await?
        .with_context(|| format!("run '{run_id}' not found for tenant '{tenant_id}'"))?;
    let jobs = state.flow_repo.list_jobs_for_run(&tenant_id, &run_id).await?;
    let logs = state.flow_repo.list_run_logs(&tenant_id, &run_id).await?;

    print_json(&json!({
        "run": run,
        "jobs": jobs,
        "logs": logs,
    }))
}
