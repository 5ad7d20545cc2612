//! SQLite flow repository implementation.
//!
//! Implements `FlowRepository` from `pawflow-core`. Flow definitions are
//! stored as JSON blobs next to the columns the scheduler filters on. Each
//! run keeps its own copy of the definition it was enrolled against.

use chrono::Utc;
use pawflow_core::repository::flow::{FlowRepository, SubjectHistory};
use pawflow_types::error::RepositoryError;
use pawflow_types::flow::FlowDefinition;
use pawflow_types::job::{Job, NewJob};
use pawflow_types::plan::TenantPlan;
use pawflow_types::run::{FlowRun, RunLogEntry};
use sqlx::{Row, Sqlite};
use uuid::Uuid;

use super::engine::insert_job;
use super::pool::DatabasePool;
use super::rows::{
    LogRow, RunRow, flow_from_row, format_datetime, job_from_row, parse_datetime, query_err,
    to_json,
};

/// SQLite-backed implementation of `FlowRepository`.
pub struct SqliteFlowRepository {
    pool: DatabasePool,
}

impl SqliteFlowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

async fn insert_run<'e, E>(executor: E, flow: &FlowDefinition, run: &FlowRun) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"INSERT INTO runs
           (id, tenant_id, flow_id, trigger_type, subject_id, status, current_step_id,
            context, flow_definition, started_at, finished_at, error)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(run.id.to_string())
    .bind(run.tenant_id.to_string())
    .bind(run.flow_id.to_string())
    .bind(&run.trigger_type)
    .bind(&run.subject_id)
    .bind(run.status.as_str())
    .bind(&run.current_step_id)
    .bind(to_json(&run.context, "run context")?)
    .bind(to_json(flow, "flow snapshot")?)
    .bind(format_datetime(&run.started_at))
    .bind(run.finished_at.as_ref().map(format_datetime))
    .bind(&run.error)
    .execute(executor)
    .await
    .map_err(query_err)?;

    Ok(())
}

impl FlowRepository for SqliteFlowRepository {
    async fn save_flow(&self, flow: &FlowDefinition) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO flows (id, tenant_id, name, enabled, trigger_type, definition, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 enabled = excluded.enabled,
                 trigger_type = excluded.trigger_type,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at
               WHERE flows.tenant_id = excluded.tenant_id"#,
        )
        .bind(flow.id.to_string())
        .bind(flow.tenant_id.to_string())
        .bind(&flow.name)
        .bind(flow.enabled)
        .bind(flow.trigger.label())
        .bind(to_json(flow, "flow definition")?)
        .bind(format_datetime(&flow.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn get_flow(&self, tenant_id: &Uuid, flow_id: &Uuid) -> Result<Option<FlowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM flows WHERE id = ? AND tenant_id = ?")
            .bind(flow_id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.as_ref().map(flow_from_row).transpose()
    }

    async fn list_scheduled_flows(&self) -> Result<Vec<FlowDefinition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT definition FROM flows WHERE trigger_type = 'schedule' AND enabled = 1 ORDER BY id",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(flow_from_row).collect()
    }

    async fn set_tenant_plan(&self, plan: &TenantPlan) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO tenant_plans (tenant_id, plan, updated_at) VALUES (?, ?, ?)
               ON CONFLICT(tenant_id) DO UPDATE SET plan = excluded.plan, updated_at = excluded.updated_at"#,
        )
        .bind(plan.tenant_id.to_string())
        .bind(plan.plan.as_str())
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn create_run_with_job(
        &self,
        flow: &FlowDefinition,
        run: &FlowRun,
        job: &NewJob,
    ) -> Result<Job, RepositoryError> {
        let job = job.clone().into_job();

        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        insert_run(&mut *tx, flow, run).await?;
        insert_job(&mut *tx, &job).await?;
        tx.commit().await.map_err(query_err)?;

        Ok(job)
    }

    async fn subject_history(
        &self,
        tenant_id: &Uuid,
        flow_id: &Uuid,
        subject_id: &str,
    ) -> Result<SubjectHistory, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT COUNT(*) AS prior_runs, MAX(started_at) AS last_started_at
               FROM runs WHERE tenant_id = ? AND flow_id = ? AND subject_id = ?"#,
        )
        .bind(tenant_id.to_string())
        .bind(flow_id.to_string())
        .bind(subject_id)
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let prior_runs: i64 = row.try_get("prior_runs").map_err(query_err)?;
        let last: Option<String> = row.try_get("last_started_at").map_err(query_err)?;
        Ok(SubjectHistory {
            prior_runs: prior_runs.max(0) as u64,
            last_started_at: last.as_deref().map(parse_datetime).transpose()?,
        })
    }

    async fn get_run(&self, tenant_id: &Uuid, run_id: &Uuid) -> Result<Option<FlowRun>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ? AND tenant_id = ?")
            .bind(run_id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => Ok(Some(RunRow::from_row(&row).map_err(query_err)?.into_run()?)),
            None => Ok(None),
        }
    }

    async fn list_jobs_for_run(&self, tenant_id: &Uuid, run_id: &Uuid) -> Result<Vec<Job>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE run_id = ? AND tenant_id = ? ORDER BY due_at ASC, id ASC",
        )
        .bind(run_id.to_string())
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(job_from_row).collect()
    }

    async fn list_run_logs(&self, tenant_id: &Uuid, run_id: &Uuid) -> Result<Vec<RunLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM run_logs WHERE run_id = ? AND tenant_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(run_id.to_string())
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(LogRow::from_row(row).map_err(query_err)?.into_entry()?);
        }
        Ok(entries)
    }
}
