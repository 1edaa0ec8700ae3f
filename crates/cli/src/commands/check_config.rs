//! Prints the effective configuration with secrets masked.

use anyhow::{Context, Result};
use clap::Args;

use tradewatch_core::AppConfig;

use super::ConfigArgs;

const MASK: &str = "********";

/// Arguments for the check-config command.
#[derive(Args, Debug, Clone)]
pub struct CheckConfigArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Masks the database password, the webhook secret and the default bot token.
fn redacted(mut config: AppConfig) -> AppConfig {
    if let Some((scheme, rest)) = config.database.url.split_once("://") {
        if let Some((userinfo, host)) = rest.rsplit_once('@') {
            let user = userinfo.split(':').next().unwrap_or_default();
            config.database.url = format!("{scheme}://{user}:{MASK}@{host}");
        }
    }
    if !config.notifications.webhook_secret.is_empty() {
        config.notifications.webhook_secret = MASK.to_string();
    }
    if config.notifications.default_telegram_bot_token.is_some() {
        config.notifications.default_telegram_bot_token = Some(MASK.to_string());
    }
    config
}

/// Loads configuration from every source and prints the merged result.
///
/// # Errors
/// Returns an error if configuration fails to load.
pub fn run_check_config(args: &CheckConfigArgs) -> Result<()> {
    let config = args.config.load()?;
    let rendered =
        serde_json::to_string_pretty(&redacted(config)).context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}
