//! Long-running poller daemon.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::sync::watch;

use tradewatch_core::CredentialStore;
use tradewatch_data::{PgConnector, PgStorage};
use tradewatch_exchange::{AdapterFactory, FactoryAdapterSource};
use tradewatch_poller::{PollerContext, Scheduler};

use super::ConfigArgs;

/// Arguments for the run command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Apply schema migrations before starting
    #[arg(long)]
    pub migrate: bool,
}

/// Polls every active instance until SIGINT or SIGTERM.
///
/// # Errors
/// Returns an error if configuration, the database, or the scheduler fails.
pub async fn run_scheduler(args: RunArgs) -> Result<()> {
    let config = args.config.load()?;
    tracing::info!(
        refresh_secs = config.scheduler.refresh_interval_secs,
        "Starting tradewatch poller"
    );

    let storage = PgStorage::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    if args.migrate {
        storage.migrate().await.context("failed to apply migrations")?;
        tracing::info!("Migrations applied");
    }

    let credentials: Arc<dyn CredentialStore> = Arc::new(storage);
    let adapters = Arc::new(FactoryAdapterSource::new(
        AdapterFactory::default(),
        credentials,
        config.exchange.clone(),
    ));
    let connector = Arc::new(PgConnector::new(config.database.clone()));
    let scheduler = Scheduler::new(PollerContext::new(connector, adapters, config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    tokio::select! {
        signal = shutdown_signal() => {
            signal?;
            tracing::info!("Waiting for in-flight polls to finish");
            // The scheduler may already have exited; nothing to notify then.
            let _ = shutdown_tx.send(true);
            scheduler_task.await.context("scheduler task panicked")??;
        }
        result = &mut scheduler_task => {
            result.context("scheduler task panicked")??;
        }
    }

    tracing::info!("tradewatch poller stopped");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
    }
    Ok(())
}
