//! CLI command definitions for the `pawflow` binary.
//!
//! Global flags override `pawflow.toml`; each also reads a `PAWFLOW_*`
//! environment variable.

pub mod admin;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pawflow_types::config::EngineConfig;
use pawflow_types::plan::PlanTier;
use uuid::Uuid;

/// Workflow automation worker for Pawflow.
#[derive(Parser)]
#[command(name = "pawflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Data directory (database and default config location).
    #[arg(long, global = true, env = "PAWFLOW_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Explicit config file. Errors in it are fatal.
    #[arg(long, global = true, env = "PAWFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite URL, e.g. `sqlite:///var/lib/pawflow/pawflow.db?mode=rwc`.
    #[arg(long, global = true, env = "PAWFLOW_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Claim identity prefix for this process.
    #[arg(long, global = true, env = "PAWFLOW_WORKER_ID")]
    pub worker_id: Option<String>,

    /// Number of worker loops.
    #[arg(long, global = true, env = "PAWFLOW_WORKERS")]
    pub workers: Option<usize>,

    /// Idle sleep between claim attempts, in milliseconds.
    #[arg(long, global = true, env = "PAWFLOW_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    /// Per-step duration after which a warning is logged, in milliseconds.
    #[arg(long, global = true, env = "PAWFLOW_STEP_SOFT_TIMEOUT_MS")]
    pub step_soft_timeout_ms: Option<u64>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "PAWFLOW_JSON_LOGS")]
    pub json_logs: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "PAWFLOW_OTEL")]
    pub otel: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default log filter for the verbosity level; `RUST_LOG` still wins.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "info,pawflow_core=debug,pawflow_infra=debug,pawflow_worker=debug",
            _ => "trace",
        }
    }

    /// Apply flag overrides on top of the loaded config.
    pub fn apply_overrides(&self, config: &mut EngineConfig) {
        if let Some(url) = &self.database_url {
            config.database_url = Some(url.clone());
        }
        if let Some(id) = &self.worker_id {
            config.worker_id = id.clone();
        }
        if let Some(n) = self.workers {
            config.worker_count = n;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if let Some(ms) = self.step_soft_timeout_ms {
            config.step_soft_timeout_ms = ms;
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the worker pool and the trigger scheduler until interrupted.
    Run {
        /// Only process jobs; do not fire schedule triggers.
        #[arg(long)]
        no_scheduler: bool,
    },

    /// Print the effective configuration as JSON.
    Config,

    /// Store (insert or replace) a flow definition from a JSON file.
    ImportFlow {
        /// Path to the flow definition JSON.
        path: PathBuf,
    },

    /// Set a tenant's plan tier.
    SetPlan {
        tenant_id: Uuid,
        /// free, pro or enterprise.
        #[arg(value_parser = parse_plan)]
        plan: PlanTier,
    },

    /// Enroll a subject into a flow by hand.
    Enroll {
        tenant_id: Uuid,
        flow_id: Uuid,
        /// Subject the run is about.
        #[arg(long)]
        subject: Option<String>,
        /// Trigger payload as a JSON object.
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// Show a run with its queued jobs and log.
    Inspect { tenant_id: Uuid, run_id: Uuid },
}

fn parse_plan(s: &str) -> Result<PlanTier, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "free" | "pro" | "professional" | "enterprise" => Ok(PlanTier::from_name(s)),
        other => Err(format!("unknown plan '{other}' (expected free, pro or enterprise)")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        <Cli as clap::CommandFactory>::command().debug_assert();
    }

    #[test]
    fn test_overrides_replace_config_values() {
        let cli = Cli::try_parse_from([
            "pawflow",
            "--workers",
            "8",
            "--worker-id",
            "kennel-b",
            "--poll-interval-ms",
            "250",
            "run",
        ])
        .unwrap();
        let mut config = EngineConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.worker_id, "kennel-b");
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.step_soft_timeout_ms, EngineConfig::default().step_soft_timeout_ms);
    }

    #[test]
    fn test_set_plan_rejects_unknown_tier() {
        let tenant = Uuid::now_v7().to_string();
        assert!(Cli::try_parse_from(["pawflow", "set-plan", &tenant, "platinum"]).is_err());
        let cli = Cli::try_parse_from(["pawflow", "set-plan", &tenant, "Pro"]).unwrap();
        assert!(matches!(cli.command, Commands::SetPlan { plan: PlanTier::Pro, .. }));
    }

    #[test]
    fn test_verbosity_filters() {
        let quiet = Cli::try_parse_from(["pawflow", "config"]).unwrap();
        assert_eq!(quiet.log_filter(), "info");
        let loud = Cli::try_parse_from(["pawflow", "-vv", "config"]).unwrap();
        assert_eq!(loud.log_filter(), "trace");
    }
}
