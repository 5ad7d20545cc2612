//! Row types and column conversions shared by the SQLite repositories.

use chrono::{DateTime, SecondsFormat, Utc};
use pawflow_types::error::RepositoryError;
use pawflow_types::flow::FlowDefinition;
use pawflow_types::job::Job;
use pawflow_types::run::{FlowRun, LogLevel, RunContext, RunLogEntry, RunStatus};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width UTC form, so stored timestamps order as strings.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T, what: &str) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|e| RepositoryError::Query(format!("serialize {what}: {e}")))
}

pub(crate) fn from_json<T: DeserializeOwned>(s: &str, what: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {what} JSON: {e}")))
}

fn opt_json<T: DeserializeOwned>(s: Option<&str>, what: &str) -> Result<Option<T>, RepositoryError> {
    s.map(|s| from_json(s, what)).transpose()
}

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

pub(crate) fn flow_from_row(row: &SqliteRow) -> Result<FlowDefinition, RepositoryError> {
    let definition: String = row.try_get("definition").map_err(query_err)?;
    from_json(&definition, "flow definition")
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

pub(crate) struct RunRow {
    id: String,
    tenant_id: String,
    flow_id: String,
    trigger_type: String,
    subject_id: Option<String>,
    status: String,
    current_step_id: Option<String>,
    context: String,
    started_at: String,
    finished_at: Option<String>,
    error: Option<String>,
}

impl RunRow {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            flow_id: row.try_get("flow_id")?,
            trigger_type: row.try_get("trigger_type")?,
            subject_id: row.try_get("subject_id")?,
            status: row.try_get("status")?,
            current_step_id: row.try_get("current_step_id")?,
            context: row.try_get("context")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            error: row.try_get("error")?,
        })
    }

    pub(crate) fn into_run(self) -> Result<FlowRun, RepositoryError> {
        let status: RunStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let context: RunContext = from_json(&self.context, "run context")?;
        Ok(FlowRun {
            id: parse_uuid(&self.id)?,
            tenant_id: parse_uuid(&self.tenant_id)?,
            flow_id: parse_uuid(&self.flow_id)?,
            trigger_type: self.trigger_type,
            subject_id: self.subject_id,
            status,
            current_step_id: self.current_step_id,
            context,
            started_at: parse_datetime(&self.started_at)?,
            finished_at: self.finished_at.as_deref().map(parse_datetime).transpose()?,
            error: self.error,
        })
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

pub(crate) struct JobRow {
    id: String,
    tenant_id: String,
    run_id: String,
    step_id: Option<String>,
    due_at: String,
    attempts: i64,
    max_attempts: i64,
    claimed_by: Option<String>,
    claimed_at: Option<String>,
    payload: Option<String>,
    created_at: String,
}

impl JobRow {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            run_id: row.try_get("run_id")?,
            step_id: row.try_get("step_id")?,
            due_at: row.try_get("due_at")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            claimed_by: row.try_get("claimed_by")?,
            claimed_at: row.try_get("claimed_at")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub(crate) fn into_job(self) -> Result<Job, RepositoryError> {
        Ok(Job {
            id: parse_uuid(&self.id)?,
            tenant_id: parse_uuid(&self.tenant_id)?,
            run_id: parse_uuid(&self.run_id)?,
            step_id: self.step_id,
            due_at: parse_datetime(&self.due_at)?,
            attempts: self.attempts as u32,
            max_attempts: self.max_attempts as u32,
            claimed_by: self.claimed_by,
            claimed_at: self.claimed_at.as_deref().map(parse_datetime).transpose()?,
            payload: opt_json(self.payload.as_deref(), "job payload")?,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

pub(crate) fn job_from_row(row: &SqliteRow) -> Result<Job, RepositoryError> {
    JobRow::from_row(row).map_err(query_err)?.into_job()
}

// ---------------------------------------------------------------------------
// Run log
// ---------------------------------------------------------------------------

pub(crate) struct LogRow {
    id: String,
    tenant_id: String,
    run_id: String,
    step_id: Option<String>,
    level: String,
    message: String,
    input: Option<String>,
    output: Option<String>,
    error: Option<String>,
    created_at: String,
}

impl LogRow {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            run_id: row.try_get("run_id")?,
            step_id: row.try_get("step_id")?,
            level: row.try_get("level")?,
            message: row.try_get("message")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub(crate) fn into_entry(self) -> Result<RunLogEntry, RepositoryError> {
        let level: LogLevel = self.level.parse().map_err(RepositoryError::Query)?;
        Ok(RunLogEntry {
            id: parse_uuid(&self.id)?,
            tenant_id: parse_uuid(&self.tenant_id)?,
            run_id: parse_uuid(&self.run_id)?,
            step_id: self.step_id,
            level,
            message: self.message,
            input: opt_json(self.input.as_deref(), "log input")?,
            output: opt_json(self.output.as_deref(), "log output")?,
            error: self.error,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}
