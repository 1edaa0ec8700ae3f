//! Applies the bundled database migrations.

use anyhow::{Context, Result};
use clap::Args;

use tradewatch_data::PgStorage;

use super::ConfigArgs;

/// Arguments for the migrate command.
#[derive(Args, Debug, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

/// # Errors
/// Returns an error if the database is unreachable or a migration fails.
pub async fn run_migrate(args: MigrateArgs) -> Result<()> {
    let config = args.config.load()?;
    let storage = PgStorage::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    storage.migrate().await.context("failed to apply migrations")?;
    tracing::info!("Database schema is up to date");
    Ok(())
}
