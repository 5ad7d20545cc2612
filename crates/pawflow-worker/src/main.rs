//! Pawflow worker process.
//!
//! Binary name: `pawflow`
//!
//! Parses CLI arguments, sets up tracing, opens the database, then either runs
//! the worker pool and trigger scheduler or executes a one-shot admin command.

mod cli;
mod state;

use clap::Parser;
use pawflow_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = TracingOptions {
        json: cli.json_logs,
        otel: cli.otel,
        default_filter: cli.log_filter().to_string(),
    };
    if let Err(e) = init_tracing(&options) {
        eprintln!("failed to initialize tracing: {e}");
    }

    // Config dump needs no database
    if let Commands::Config = &cli.command {
        let (_, config) = state::resolve_config(&cli).await?;
        return cli::admin::show_config(&config);
    }

    let state = AppState::init(&cli).await?;

    let result = match &cli.command {
        Commands::Run { no_scheduler } => cli::run::run(&state, *no_scheduler).await,
        Commands::ImportFlow { path } => cli::admin::import_flow(&state, path).await,
        Commands::SetPlan { tenant_id, plan } => cli::admin::set_plan(&state, *tenant_id, *plan).await,
        Commands::Enroll {
            tenant_id,
            flow_id,
            subject,
            payload,
        } => cli::admin::enroll(&state, *tenant_id, *flow_id, subject.clone(), payload).await,
        Commands::Inspect { tenant_id, run_id } => cli::admin::inspect(&state, *tenant_id, *run_id).await,
        Commands::Config => unreachable!("handled above"),
    };

    shutdown_tracing();
    result
}
