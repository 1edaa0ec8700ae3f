//! CLI commands for the change-detection poller.

pub mod check_config;
pub mod migrate;
pub mod normalize;
pub mod poll_once;
pub mod run;

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tradewatch_core::{AppConfig, ConfigLoader};

pub use check_config::{run_check_config, CheckConfigArgs};
pub use migrate::{run_migrate, MigrateArgs};
pub use normalize::{run_normalize, NormalizeArgs};
pub use poll_once::{run_poll_once, PollOnceArgs};
pub use run::{run_scheduler, RunArgs};

/// Where configuration comes from. Shared by every command that needs it.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Config file; defaults to config/Config.toml when present
    #[arg(short, long, env = "TRADEWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Profile overlay, loads config/Config.<profile>.toml on top
    #[arg(long, env = "TRADEWATCH_PROFILE")]
    pub profile: Option<String>,
}

impl ConfigArgs {
    /// # Errors
    /// Returns an error if an explicit file is missing or a source fails to parse.
    pub fn load(&self) -> Result<AppConfig> {
        match (&self.config, &self.profile) {
            (Some(path), _) => ConfigLoader::load_from(path),
            (None, Some(profile)) => ConfigLoader::load_with_profile(profile),
            (None, None) => ConfigLoader::load(),
        }
    }
}
