//! Row types for the Postgres schema.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;

use tradewatch_core::{
    AccountBalance, BalanceSnapshot, MonitoredInstance, NotificationTargets, SnapshotKey,
    StateSnapshot, StorageError,
};

use crate::error::decode_error;

/// `bot_instances` row, minus credential columns.
#[derive(Debug, Clone, FromRow)]
pub struct InstanceRow {
    pub id: i64,
    pub name: String,
    pub exchange: String,
    pub trading_pair: Option<String>,
    pub strategies: Vec<String>,
    pub polling_interval: i32,
    pub is_active: bool,
    pub balance_notifications: bool,
    pub webhook_url: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_topic_id: Option<String>,
    pub last_poll: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl From<InstanceRow> for MonitoredInstance {
    fn from(row: InstanceRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            exchange: row.exchange,
            trading_pair: row.trading_pair,
            strategies: row.strategies,
            polling_interval_secs: u64::try_from(row.polling_interval).unwrap_or(0),
            is_active: row.is_active,
            balance_enabled: row.balance_notifications,
            notifications: NotificationTargets {
                webhook_url: row.webhook_url,
                chat_token: row.telegram_bot_token,
                chat_destination: row.telegram_chat_id,
                chat_thread: row.telegram_topic_id,
            },
            last_poll: row.last_poll,
            last_error: row.last_error,
        }
    }
}

/// Latest `poll_states` row for a key.
#[derive(Debug, Clone, FromRow)]
pub struct SnapshotRow {
    pub data_hash: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl SnapshotRow {
    #[must_use]
    pub fn into_snapshot(self, key: SnapshotKey) -> StateSnapshot {
        StateSnapshot {
            key,
            fingerprint: self.data_hash,
            data: self.data,
            timestamp: self.timestamp,
        }
    }
}

/// `balance_history` row.
#[derive(Debug, Clone, FromRow)]
pub struct BalanceRow {
    pub instance_id: i64,
    pub balance_data: Value,
    pub timestamp: DateTime<Utc>,
}

impl TryFrom<BalanceRow> for BalanceSnapshot {
    type Error = StorageError;

    fn try_from(row: BalanceRow) -> Result<Self, Self::Error> {
        let balance: AccountBalance = serde_json::from_value(row.balance_data)
            .map_err(|e| decode_error("balance_data", e))?;
        Ok(Self {
            instance_id: row.instance_id,
            balance,
            timestamp: row.timestamp,
        })
    }
}

/// Credential columns of `bot_instances`.
#[derive(Debug, Clone, FromRow)]
pub struct CredentialRow {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub api_passphrase: Option<String>,
}
