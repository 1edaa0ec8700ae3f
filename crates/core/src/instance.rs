//! Monitored instance model.

use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Where an instance's notifications go. Every target is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTargets {
    pub webhook_url: Option<String>,
    pub chat_token: Option<String>,
    pub chat_destination: Option<String>,
    pub chat_thread: Option<String>,
}

/// One exchange account watched on behalf of a user.
///
/// Rows are created and deactivated externally; only the instance's own
/// poller writes `last_poll` and `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredInstance {
    pub id: i64,
    pub name: String,
    pub exchange: String,
    pub trading_pair: Option<String>,
    pub strategies: Vec<String>,
    pub polling_interval_secs: u64,
    pub is_active: bool,
    pub balance_enabled: bool,
    #[serde(default)]
    pub notifications: NotificationTargets,
    pub last_poll: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl MonitoredInstance {
    /// Minimal active instance with a 60 second cadence.
    #[must_use]
    pub fn new(id: i64, name: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            exchange: exchange.into(),
            trading_pair: None,
            strategies: Vec::new(),
            polling_interval_secs: 60,
            is_active: true,
            balance_enabled: false,
            notifications: NotificationTargets::default(),
            last_poll: None,
            last_error: None,
        }
    }

    #[must_use]
    pub fn with_trading_pair(mut self, pair: impl Into<String>) -> Self {
        self.trading_pair = Some(pair.into());
        self
    }

    #[must_use]
    pub fn with_strategies<I, S>(mut self, strategies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strategies = strategies.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn with_polling_interval(mut self, secs: u64) -> Self {
        self.polling_interval_secs = secs;
        self
    }

    #[must_use]
    pub const fn with_balance_tracking(mut self, enabled: bool) -> Self {
        self.balance_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_notifications(mut self, targets: NotificationTargets) -> Self {
        self.notifications = targets;
        self
    }

    /// Polling cadence. Zero falls back to `default_secs`; the result is
    /// never shorter than one second.
    #[must_use]
    pub fn polling_interval(&self, default_secs: u64) -> Duration {
        let secs = if self.polling_interval_secs == 0 {
            default_secs
        } else {
            self.polling_interval_secs
        };
        Duration::from_secs(secs.max(1))
    }

    /// Trading-pair filter, treating a blank pair as no filter.
    #[must_use]
    pub fn pair_filter(&self) -> Option<&str> {
        self.trading_pair
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Mutation applied by a poller at the end of a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceUpdate {
    /// Cycle completed: advance `last_poll`, clear `last_error`.
    Polled { at: DateTime<Utc> },
    /// Cycle failed: record the error, leave `last_poll` untouched.
    Failed { error: String },
}

/// API credentials for one exchange account.
#[derive(Debug)]
pub struct ExchangeCredentials {
    pub api_key: String,
    pub api_secret: SecretString,
    /// Required by Bitget, unused by Bybit.
    pub passphrase: Option<SecretString>,
}

impl ExchangeCredentials {
    #[must_use]
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: SecretString::from(api_secret.into()),
            passphrase: None,
        }
    }

    #[must_use]
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(SecretString::from(passphrase.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_pair_is_no_filter() {
        let instance = MonitoredInstance::new(1, "a", "bybit").with_trading_pair("  ");
        assert_eq!(instance.pair_filter(), None);

        let instance = instance.with_trading_pair("BCH/USDT");
        assert_eq!(instance.pair_filter(), Some("BCH/USDT"));
    }

    #[test]
    fn test_polling_interval_floor() {
        let instance = MonitoredInstance::new(1, "a", "bybit").with_polling_interval(0);
        assert_eq!(instance.polling_interval(45), Duration::from_secs(45));
        assert_eq!(instance.polling_interval(0), Duration::from_secs(1));

        let instance = instance.with_polling_interval(30);
        assert_eq!(instance.polling_interval(45), Duration::from_secs(30));
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = ExchangeCredentials::new("key", "very-secret").with_passphrase("pass-phrase");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("pass-phrase"));
    }
}
