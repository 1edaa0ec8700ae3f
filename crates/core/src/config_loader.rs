use std::path::Path;

use crate::config::AppConfig;
use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";
const ENV_PREFIX: &str = "TRADEWATCH_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from defaults, `config/Config.toml`, and
    /// `TRADEWATCH_*` environment variables (`__` separates nested keys).
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source cannot be parsed.
    pub fn load() -> Result<AppConfig> {
        Self::figment(Path::new(DEFAULT_CONFIG_PATH), None)
            .extract()
            .context("failed to load configuration")
    }

    /// Loads configuration with a profile overlay `config/Config.<profile>.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source cannot be parsed.
    pub fn load_with_profile(profile: &str) -> Result<AppConfig> {
        Self::figment(Path::new(DEFAULT_CONFIG_PATH), Some(profile))
            .extract()
            .with_context(|| format!("failed to load configuration for profile {profile}"))
    }

    /// Loads configuration from an explicit file, which must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be parsed.
    pub fn load_from(path: &Path) -> Result<AppConfig> {
        if !path.exists() {
            bail!("config file not found: {}", path.display());
        }
        Self::figment(path, None)
            .extract()
            .with_context(|| format!("failed to load configuration from {}", path.display()))
    }

    fn figment(path: &Path, profile: Option<&str>) -> Figment {
        tracing::debug!(path = %path.display(), ?profile, "Loading configuration");
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path));

        if let Some(profile) = profile {
            let overlay = path.with_file_name(format!("Config.{profile}.toml"));
            figment = figment.merge(Toml::file(overlay));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_without_files() {
        Jail::expect_with(|_jail| {
            let config = ConfigLoader::load().expect("defaults load");
            assert_eq!(config.recovery.max_attempts, 3);
            assert_eq!(config.recovery.base_delay_ms, 500);
            assert_eq!(config.notifications.chat_min_spacing_secs, 5);
            assert_eq!(config.balance.retention_days, 90);
            Ok(())
        });
    }

    #[test]
    fn test_file_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/Config.toml",
                r#"
                [database]
                url = "postgresql://db/watch"

                [scheduler]
                refresh_interval_secs = 15
                "#,
            )?;
            jail.set_env("TRADEWATCH_SCHEDULER__REFRESH_INTERVAL_SECS", "30");
            jail.set_env("TRADEWATCH_NOTIFICATIONS__WEBHOOK_SECRET", "s3cret");

            let config = ConfigLoader::load().expect("layered load");
            assert_eq!(config.database.url, "postgresql://db/watch");
            assert_eq!(config.scheduler.refresh_interval_secs, 30);
            assert_eq!(config.notifications.webhook_secret, "s3cret");
            assert_eq!(config.database.max_connections, 2);
            Ok(())
        });
    }

    #[test]
    fn test_profile_overlay() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file("config/Config.toml", "[balance]\nretention_days = 90\n")?;
            jail.create_file("config/Config.test.toml", "[balance]\nretention_days = 7\n")?;

            let config = ConfigLoader::load_with_profile("test").expect("profile load");
            assert_eq!(config.balance.retention_days, 7);
            Ok(())
        });
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        assert!(ConfigLoader::load_from(Path::new("/nonexistent/tradewatch.toml")).is_err());
    }
}
