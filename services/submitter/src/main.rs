//! adfarm submitter daemon.
//!
//! Runs the submission cycle against the flag queue: expire stale flags,
//! select a fair-share batch, submit it through the configured scoring
//! backend, persist the outcomes, repeat.

use std::sync::Arc;

use adfarm_submitter::{
    config::{Config, ConfigReloader},
    db::Database,
    protocols::BackendRegistry,
    submit::SubmitWorker,
};
use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to FARM_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting adfarm submitter");

    // Connect to database
    let db = match Database::connect(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    // Startup probe before any worker is spawned
    if let Err(e) = db.health_check().await {
        error!(error = %e, "Database health check failed");
        return Err(e.into());
    }

    // Run migrations in dev mode
    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Submission config is published over a watch channel; the worker
    // snapshots it each cycle, the reloader republishes on file changes.
    let (submit_tx, submit_rx) = watch::channel(config.submit.clone());

    let reloader_handle = config.submit_config_path.clone().map(|path| {
        let reloader = ConfigReloader::new(path, submit_tx);
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            reloader.run(shutdown_rx).await;
        })
    });

    let registry = Arc::new(BackendRegistry::builtin());
    info!(backend = %config.submit.backend, "Scoring backend configured");

    // Start the submit worker in background
    let worker = SubmitWorker::new(db.flag_store(), registry, submit_rx);
    let mut worker_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { worker.run(shutdown_rx).await }
    });

    // Wait for shutdown signal (Ctrl+C) or a fatal worker error
    let worker_result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            // The in-flight cycle always completes before the loop exits.
            (&mut worker_handle).await
        }
        result = &mut worker_handle => {
            let _ = shutdown_tx.send(true);
            result
        }
    };

    if let Some(handle) = reloader_handle {
        let _ = handle.await;
    }

    match worker_result {
        Ok(Ok(())) => {
            info!("Shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => {
            // Storage failures are fatal: no recovery path is defined, so
            // exit and let the operator restart once the store is healthy.
            error!(error = %e, "Submit worker failed");
            Err(e.into())
        }
        Err(e) => {
            error!(error = %e, "Submit worker task panicked");
            Err(e.into())
        }
    }
}
