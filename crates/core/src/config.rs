use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub recovery: RecoveryConfig,
    pub notifications: NotificationConfig,
    pub exchange: ExchangeConfig,
    pub balance: BalanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    /// Pool size of each poller's own session.
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often the supervisor re-lists active instances.
    pub refresh_interval_secs: u64,
    pub default_polling_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub webhook_secret: String,
    pub webhook_timeout_secs: u64,
    pub chat_min_spacing_secs: u64,
    pub telegram_api_url: String,
    pub telegram_timeout_secs: u64,
    pub default_telegram_bot_token: Option<String>,
    pub default_chat_destination: Option<String>,
    pub default_chat_thread: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub request_timeout_secs: u64,
    pub requests_per_second: u32,
    pub bybit_base_url: String,
    pub bitget_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    pub retention_days: i64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/tradewatch".to_string(),
            max_connections: 2,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
            default_polling_interval_secs: 60,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_secret: String::new(),
            webhook_timeout_secs: 10,
            chat_min_spacing_secs: 5,
            telegram_api_url: "https://api.telegram.org".to_string(),
            telegram_timeout_secs: 10,
            default_telegram_bot_token: None,
            default_chat_destination: None,
            default_chat_thread: None,
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            requests_per_second: 10,
            bybit_base_url: "https://api.bybit.com".to_string(),
            bitget_base_url: "https://api.bitget.com".to_string(),
        }
    }
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self { retention_days: 90 }
    }
}

impl DatabaseConfig {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl SchedulerConfig {
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

impl RecoveryConfig {
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl NotificationConfig {
    #[must_use]
    pub const fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    #[must_use]
    pub const fn chat_min_spacing(&self) -> Duration {
        Duration::from_secs(self.chat_min_spacing_secs)
    }

    #[must_use]
    pub const fn telegram_timeout(&self) -> Duration {
        Duration::from_secs(self.telegram_timeout_secs)
    }
}

impl ExchangeConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl BalanceConfig {
    #[must_use]
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }
}
