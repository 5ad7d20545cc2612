//! The long-running `run` command: worker pool plus trigger scheduler.

use tokio_util::sync::CancellationToken;

use crate::state::AppState;

pub async fn run(state: &AppState, no_scheduler: bool) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let pool = state.worker_pool()?;

    tracing::info!(
        worker_id = %state.config.worker_id,
        workers = pool.settings().worker_count,
        scheduler = !no_scheduler,
        "pawflow starting"
    );

    let scheduler_task = if no_scheduler {
        None
    } else {
        let scheduler = state.scheduler();
        let summary = scheduler.start().await?;
        tracing::info!(
            registered = summary.registered,
            invalid = summary.invalid,
            "schedule triggers loaded"
        );
        Some(tokio::spawn(scheduler.run(shutdown.clone())))
    };
    let pool_task = tokio::spawn(pool.run(shutdown.clone()));

    shutdown_signal().await;
    tracing::info!("shutdown requested; draining workers");
    shutdown.cancel();

    if let Err(e) = pool_task.await {
        tracing::error!(error = %e, "worker pool task panicked");
    }
    if let Some(task) = scheduler_task {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "scheduler task panicked");
        }
    }

    tracing::info!("pawflow stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
