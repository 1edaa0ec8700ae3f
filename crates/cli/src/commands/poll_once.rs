//! Single poll of one instance, optionally without side effects.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;

use tradewatch_core::{CredentialStore, NotificationTargets, StorageBackend, StorageConnector};
use tradewatch_data::{MemoryConnector, MemoryStorage, PgConnector, PgStorage};
use tradewatch_exchange::{AdapterFactory, FactoryAdapterSource};
use tradewatch_poller::{CycleOutcome, PollerContext};

use super::ConfigArgs;

/// Arguments for the poll-once command.
#[derive(Args, Debug, Clone)]
pub struct PollOnceArgs {
    /// Instance id to poll
    #[arg(short, long)]
    pub instance: i64,

    /// Detect against empty in-memory state and print the events instead of
    /// storing or delivering them
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Runs one cycle for `args.instance` and prints its report.
///
/// # Errors
/// Returns an error if the instance cannot be loaded, the poller cannot be
/// built, or the cycle ends in a storage failure.
pub async fn run_poll_once(args: PollOnceArgs) -> Result<()> {
    let mut config = args.config.load()?;
    let storage = PgStorage::connect(&config.database)
        .await
        .context("failed to connect to database")?;

    let mut instance = storage
        .load_instance(args.instance)
        .await?
        .ok_or_else(|| anyhow!("instance {} not found", args.instance))?;
    tracing::info!(
        instance_id = instance.id,
        exchange = %instance.exchange,
        dry_run = args.dry_run,
        "Polling {} once",
        instance.name
    );

    let scratch = args.dry_run.then(MemoryStorage::new);
    let connector: Arc<dyn StorageConnector> = match &scratch {
        Some(scratch) => {
            instance.notifications = NotificationTargets::default();
            config.notifications.default_telegram_bot_token = None;
            config.notifications.default_chat_destination = None;
            scratch.insert_instance(instance.clone());
            Arc::new(MemoryConnector::new(scratch.clone()))
        }
        None => Arc::new(PgConnector::new(config.database.clone())),
    };

    let credentials: Arc<dyn CredentialStore> = Arc::new(storage);
    let adapters = Arc::new(FactoryAdapterSource::new(
        AdapterFactory::default(),
        credentials,
        config.exchange.clone(),
    ));
    let context = PollerContext::new(connector, adapters, config);
    let recovery = context.open_storage().await?;
    let mut poller = context.build_poller(instance, recovery).await?;

    let outcome = poller.poll_once().await;
    let report = outcome.report();
    println!(
        "{}: {} positions, {} orders, {} trades, {} events",
        outcome.label(),
        report.positions,
        report.orders,
        report.trades,
        report.events
    );
    for resource in &report.fetch_failures {
        println!("  failed to fetch {}", resource.as_str());
    }

    if let Some(scratch) = scratch {
        for event in scratch.activities().iter().filter(|a| a.payload.is_some()) {
            let payload = event.payload.as_ref().map(ToString::to_string).unwrap_or_default();
            println!("  {} {}", event.event_type, payload);
        }
    }

    if let CycleOutcome::HardFailure { error, .. } = outcome {
        bail!("poll failed: {error}");
    }
    Ok(())
}
