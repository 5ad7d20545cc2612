//! Process state wiring the engine together.
//!
//! `AppState` pins the generic engine components to the SQLite repositories
//! and holds the effective configuration. Both the long-running `run`
//! command and the one-shot admin commands start from it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pawflow_core::flow::dispatcher::ActionRegistry;
use pawflow_core::flow::enrollment::EnrollmentService;
use pawflow_core::flow::executor::{ExecutorSettings, StepChainExecutor};
use pawflow_core::flow::retry::{BackoffController, BackoffPolicy};
use pawflow_core::flow::scheduler::TriggerScheduler;
use pawflow_core::flow::worker::{WorkerPool, WorkerSettings};
use pawflow_infra::config::{load_engine_config, load_engine_config_from, resolve_data_dir};
use pawflow_infra::mail::build_mail_sender;
use pawflow_infra::sqlite::engine::SqliteEngineRepository;
use pawflow_infra::sqlite::flow::SqliteFlowRepository;
use pawflow_infra::sqlite::pool::{DatabasePool, default_database_url};
use pawflow_infra::sqlite::subject::SqliteSubjectSource;
use pawflow_types::config::EngineConfig;

use crate::cli::Cli;

pub type ConcreteWorkerPool = WorkerPool<SqliteEngineRepository>;
pub type ConcreteScheduler = TriggerScheduler<SqliteFlowRepository, SqliteSubjectSource>;
pub type ConcreteEnrollmentService = EnrollmentService<SqliteFlowRepository>;

/// Shared state for every command.
#[derive(Clone)]
pub struct AppState {
    pub config: EngineConfig,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
    pub engine_repo: Arc<SqliteEngineRepository>,
    pub flow_repo: Arc<SqliteFlowRepository>,
    pub subjects: Arc<SqliteSubjectSource>,
}

/// Resolve the data directory and the effective configuration.
///
/// An explicit `--config` must load cleanly; the data-directory file falls
/// back to defaults.
pub async fn resolve_config(cli: &Cli) -> anyhow::Result<(PathBuf, EngineConfig)> {
    let data_dir = cli.data_dir.clone().unwrap_or_else(resolve_data_dir);
    let mut config = match &cli.config {
        Some(path) => load_engine_config_from(path).await?,
        None => load_engine_config(&data_dir).await,
    };
    cli.apply_overrides(&mut config);
    Ok((data_dir, config))
}

impl AppState {
    /// Open the database and build the repositories.
    pub async fn init(cli: &Cli) -> anyhow::Result<Self> {
        let (data_dir, config) = resolve_config(cli).await?;

        let db_url = match &config.database_url {
            Some(url) => url.clone(),
            None => {
                tokio::fs::create_dir_all(&data_dir).await?;
                default_database_url(&data_dir)
            }
        };
        let db_pool = DatabasePool::new(&db_url).await?;

        let engine_repo = Arc::new(SqliteEngineRepository::with_claim_ttl(
            db_pool.clone(),
            config.claim_ttl_secs,
        ));
        let flow_repo = Arc::new(SqliteFlowRepository::new(db_pool.clone()));
        let subjects = Arc::new(SqliteSubjectSource::new(db_pool.clone()));

        tracing::debug!(data_dir = %data_dir.display(), "state initialized");

        Ok(Self {
            config,
            data_dir,
            db_pool,
            engine_repo,
            flow_repo,
            subjects,
        })
    }

    /// Worker pool over the engine repository, with the configured mail sender.
    pub fn worker_pool(&self) -> anyhow::Result<Arc<ConcreteWorkerPool>> {
        let mail = build_mail_sender(&self.config.mail)?;
        let registry = Arc::new(ActionRegistry::with_builtin_handlers(Arc::new(mail)));
        tracing::debug!(actions = ?registry.action_types(), "action registry ready");

        let executor = Arc::new(StepChainExecutor::new(
            self.engine_repo.clone(),
            registry,
            ExecutorSettings::from_config(&self.config),
        ));
        let backoff = Arc::new(BackoffController::new(
            self.engine_repo.clone(),
            BackoffPolicy::from_secs(&self.config.retry_schedule_secs, self.config.retry_jitter),
        ));

        Ok(Arc::new(WorkerPool::new(
            self.engine_repo.clone(),
            executor,
            backoff,
            WorkerSettings::from_config(&self.config),
        )))
    }

    pub fn scheduler(&self) -> Arc<ConcreteScheduler> {
        Arc::new(TriggerScheduler::new(
            self.flow_repo.clone(),
            self.subjects.clone(),
            self.config.default_max_attempts,
            Duration::from_secs(self.config.reload_interval_secs.max(1)),
        ))
    }

    pub fn enrollment(&self) -> ConcreteEnrollmentService {
        EnrollmentService::new(self.flow_repo.clone(), self.config.default_max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_resolve_config_prefers_flags_over_file() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("pawflow.toml"),
            "worker_count = 2\nworker_id = \"from-file\"\n",
        )
        .await
        .unwrap();

        let dir = tmp.path().to_str().unwrap();
        let cli = Cli::try_parse_from(["pawflow", "--data-dir", dir, "--workers", "6", "config"]).unwrap();
        let (data_dir, config) = resolve_config(&cli).await.unwrap();

        assert_eq!(data_dir, tmp.path());
        assert_eq!(config.worker_count, 6);
        assert_eq!(config.worker_id, "from-file");
    }

    #[tokio::test]
    async fn test_explicit_config_must_exist() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("missing.toml");
        let cli = Cli::try_parse_from(["pawflow", "--config", missing.to_str().unwrap(), "config"]).unwrap();
        assert!(resolve_config(&cli).await.is_err());
    }

    #[tokio::test]
    async fn test_init_creates_database_in_data_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("nested");
        let cli = Cli::try_parse_from(["pawflow", "--data-dir", dir.to_str().unwrap(), "config"]).unwrap();

        let state = AppState::init(&cli).await.unwrap();
        assert!(dir.join("pawflow.db").exists());
        assert!(state.worker_pool().is_ok());
        assert!(state.scheduler().registry().is_empty().await);
    }
}
