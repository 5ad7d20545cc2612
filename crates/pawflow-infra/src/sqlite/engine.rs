//! SQLite engine repository implementation.
//!
//! Implements `EngineRepository` from `pawflow-core`: the job queue, run
//! state, the run log, tenant plans and the idempotency ledger. All mutations
//! go through the single-connection writer pool.

use chrono::{DateTime, TimeDelta, Utc};
use pawflow_core::repository::engine::{EngineRepository, RunSuspension, RunWithFlow};
use pawflow_types::error::RepositoryError;
use pawflow_types::job::{Job, NewJob};
use pawflow_types::ledger::{IdempotencyCheck, IdempotencyKey};
use pawflow_types::plan::{PlanTier, TenantPlan};
use pawflow_types::run::{RunLogEntry, RunPatch, RunStatus};
use serde_json::Value;
use sqlx::{Row, Sqlite};
use uuid::Uuid;

use super::pool::DatabasePool;
use super::rows::{RunRow, format_datetime, from_json, job_from_row, query_err, to_json};

/// Default claim lifetime before another worker may take a job over.
pub const DEFAULT_CLAIM_TTL_SECS: u64 = 900;

/// SQLite-backed implementation of `EngineRepository`.
pub struct SqliteEngineRepository {
    pool: DatabasePool,
    claim_ttl: TimeDelta,
}

impl SqliteEngineRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self::with_claim_ttl(pool, DEFAULT_CLAIM_TTL_SECS)
    }

    pub fn with_claim_ttl(pool: DatabasePool, claim_ttl_secs: u64) -> Self {
        Self {
            pool,
            claim_ttl: i64::try_from(claim_ttl_secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .unwrap_or(TimeDelta::MAX),
        }
    }
}

/// 9999-12-31T23:59:59Z. Stored timestamps compare as text, which only
/// holds for four-digit years.
const LATEST_STORED_SECS: i64 = 253_402_300_799;

fn latest_stored() -> DateTime<Utc> {
    DateTime::from_timestamp(LATEST_STORED_SECS, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `now + delay_ms`, saturating at the latest storable instant.
fn due_after(delay_ms: u64) -> DateTime<Utc> {
    let latest = latest_stored();
    i64::try_from(delay_ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .and_then(|delay| Utc::now().checked_add_signed(delay))
        .map_or(latest, |due| due.min(latest))
}

/// Insert a job row using any executor (pool or open transaction).
pub(crate) async fn insert_job<'e, E>(executor: E, job: &Job) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let payload = job
        .payload
        .as_ref()
        .map(|p| to_json(p, "job payload"))
        .transpose()?;

    sqlx::query(
        r#"INSERT INTO jobs
           (id, tenant_id, run_id, step_id, due_at, attempts, max_attempts,
            claimed_by, claimed_at, payload, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(job.id.to_string())
    .bind(job.tenant_id.to_string())
    .bind(job.run_id.to_string())
    .bind(&job.step_id)
    .bind(format_datetime(&job.due_at))
    .bind(job.attempts as i64)
    .bind(job.max_attempts as i64)
    .bind(&job.claimed_by)
    .bind(job.claimed_at.as_ref().map(format_datetime))
    .bind(&payload)
    .bind(format_datetime(&job.created_at))
    .execute(executor)
    .await
    .map_err(query_err)?;

    Ok(())
}

/// Apply the set fields of `patch` to a run.
async fn apply_run_patch<'e, E>(
    executor: E,
    tenant_id: &Uuid,
    run_id: &Uuid,
    patch: &RunPatch,
) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let context = patch
        .context
        .as_ref()
        .map(|c| to_json(c, "run context"))
        .transpose()?;
    let (set_step, step) = match &patch.current_step_id {
        Some(step) => (true, step.clone()),
        None => (false, None),
    };

    let result = sqlx::query(
        r#"UPDATE runs SET
             status = COALESCE(?, status),
             current_step_id = CASE WHEN ? THEN ? ELSE current_step_id END,
             context = COALESCE(?, context),
             finished_at = COALESCE(?, finished_at),
             error = COALESCE(?, error)
           WHERE id = ? AND tenant_id = ?"#,
    )
    .bind(patch.status.map(|s| s.as_str()))
    .bind(set_step)
    .bind(step)
    .bind(context)
    .bind(patch.finished_at.as_ref().map(format_datetime))
    .bind(&patch.error)
    .bind(run_id.to_string())
    .bind(tenant_id.to_string())
    .execute(executor)
    .await
    .map_err(query_err)?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound);
    }
    Ok(())
}

async fn insert_run_log<'e, E>(executor: E, entry: &RunLogEntry) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let input = entry.input.as_ref().map(|v| to_json(v, "log input")).transpose()?;
    let output = entry.output.as_ref().map(|v| to_json(v, "log output")).transpose()?;

    sqlx::query(
        r#"INSERT INTO run_logs
           (id, tenant_id, run_id, step_id, level, message, input, output, error, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(entry.id.to_string())
    .bind(entry.tenant_id.to_string())
    .bind(entry.run_id.to_string())
    .bind(&entry.step_id)
    .bind(entry.level.as_str())
    .bind(&entry.message)
    .bind(&input)
    .bind(&output)
    .bind(&entry.error)
    .bind(format_datetime(&entry.created_at))
    .execute(executor)
    .await
    .map_err(query_err)?;

    Ok(())
}

impl EngineRepository for SqliteEngineRepository {
    async fn claim_next_job(&self, worker_id: &str) -> Result<Option<Job>, RepositoryError> {
        let now = Utc::now();
        let expired_before = now
            .checked_sub_signed(self.claim_ttl)
            .map_or(DateTime::UNIX_EPOCH, |at| at.max(DateTime::UNIX_EPOCH));

        // Single statement on the single writer connection: read-and-mark is atomic.
        let row = sqlx::query(
            r#"UPDATE jobs SET claimed_by = ?, claimed_at = ?
               WHERE id = (
                   SELECT id FROM jobs
                   WHERE due_at <= ? AND (claimed_at IS NULL OR claimed_at < ?)
                   ORDER BY due_at ASC, id ASC
                   LIMIT 1
               )
               RETURNING *"#,
        )
        .bind(worker_id)
        .bind(format_datetime(&now))
        .bind(format_datetime(&now))
        .bind(format_datetime(&expired_before))
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(query_err)?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn create_job(&self, job: &NewJob) -> Result<Job, RepositoryError> {
        let job = job.clone().into_job();
        insert_job(&self.pool.writer, &job).await?;
        Ok(job)
    }

    async fn delete_job(&self, job_id: &Uuid) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(job_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn reschedule_job(&self, job_id: &Uuid, delay_ms: u64) -> Result<(), RepositoryError> {
        let due_at = due_after(delay_ms);

        let result = sqlx::query(
            r#"UPDATE jobs
               SET attempts = attempts + 1, due_at = ?, claimed_by = NULL, claimed_at = NULL
               WHERE id = ?"#,
        )
        .bind(format_datetime(&due_at))
        .bind(job_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn suspend_run(&self, suspension: &RunSuspension) -> Result<Job, RepositoryError> {
        let resume = suspension.resume.clone().into_job();
        let patch = RunPatch::progress(resume.step_id.clone(), suspension.context.clone())
            .with_status(RunStatus::Queued);

        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        insert_job(&mut *tx, &resume).await?;
        apply_run_patch(&mut *tx, &resume.tenant_id, &resume.run_id, &patch).await?;
        insert_run_log(&mut *tx, &suspension.log).await?;
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(suspension.job_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        tx.commit().await.map_err(query_err)?;

        Ok(resume)
    }

    async fn get_run_with_flow(
        &self,
        tenant_id: &Uuid,
        run_id: &Uuid,
    ) -> Result<Option<RunWithFlow>, RepositoryError> {
        let Some(row) = sqlx::query("SELECT * FROM runs WHERE id = ? AND tenant_id = ?")
            .bind(run_id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(query_err)?
        else {
            return Ok(None);
        };
        let snapshot: String = row.try_get("flow_definition").map_err(query_err)?;
        Ok(Some(RunWithFlow {
            run: RunRow::from_row(&row).map_err(query_err)?.into_run()?,
            flow: from_json(&snapshot, "flow snapshot")?,
        }))
    }

    async fn update_run(
        &self,
        tenant_id: &Uuid,
        run_id: &Uuid,
        patch: &RunPatch,
    ) -> Result<(), RepositoryError> {
        apply_run_patch(&self.pool.writer, tenant_id, run_id, patch).await
    }

    async fn append_run_log(&self, entry: &RunLogEntry) -> Result<(), RepositoryError> {
        insert_run_log(&self.pool.writer, entry).await
    }

    async fn get_tenant_plan(&self, tenant_id: &Uuid) -> Result<TenantPlan, RepositoryError> {
        let row = sqlx::query("SELECT plan FROM tenant_plans WHERE tenant_id = ?")
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let plan = match row {
            Some(row) => {
                let name: String = row.try_get("plan").map_err(query_err)?;
                PlanTier::from_name(&name)
            }
            None => PlanTier::Free,
        };
        Ok(TenantPlan {
            tenant_id: *tenant_id,
            plan,
        })
    }

    async fn check_idempotency(&self, key: &IdempotencyKey) -> Result<IdempotencyCheck, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT result FROM idempotency_records
               WHERE tenant_id = ? AND run_id = ? AND step_id = ? AND fingerprint = ?"#,
        )
        .bind(key.tenant_id.to_string())
        .bind(key.run_id.to_string())
        .bind(&key.step_id)
        .bind(&key.fingerprint)
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(query_err)?;

        match row {
            Some(row) => {
                let result: String = row.try_get("result").map_err(query_err)?;
                Ok(IdempotencyCheck::hit(from_json(&result, "ledger result")?))
            }
            None => Ok(IdempotencyCheck::miss()),
        }
    }

    async fn record_execution(&self, key: &IdempotencyKey, result: &Value) -> Result<Value, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query(
            r#"INSERT INTO idempotency_records
               (tenant_id, run_id, step_id, fingerprint, result, created_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (tenant_id, run_id, step_id, fingerprint) DO NOTHING"#,
        )
        .bind(key.tenant_id.to_string())
        .bind(key.run_id.to_string())
        .bind(&key.step_id)
        .bind(&key.fingerprint)
        .bind(to_json(result, "ledger result")?)
        .bind(format_datetime(&Utc::now()))
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        let stored: String = sqlx::query(
            r#"SELECT result FROM idempotency_records
               WHERE tenant_id = ? AND run_id = ? AND step_id = ? AND fingerprint = ?"#,
        )
        .bind(key.tenant_id.to_string())
        .bind(key.run_id.to_string())
        .bind(&key.step_id)
        .bind(&key.fingerprint)
        .fetch_one(&mut *tx)
        .await
        .map_err(query_err)?
        .try_get("result")
        .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        from_json(&stored, "ledger result")
    }
}
