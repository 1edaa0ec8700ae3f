//! Postgres storage backend.
//!
//! Each [`PgStorage`] owns its own small pool, which is the "session" a
//! poller recreates after a transient failure.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::debug;

use tradewatch_core::{
    ActivityEvent, BalanceSnapshot, CredentialStore, DatabaseConfig, ErrorRecord,
    ExchangeCredentials, InstanceUpdate, MonitoredInstance, SnapshotKey, StateSnapshot,
    StorageBackend, StorageConnector, StorageResult,
};

use crate::error::{classify_sqlx, decode_error};
use crate::models::{BalanceRow, CredentialRow, InstanceRow, SnapshotRow};

const INSTANCE_COLUMNS: &str = r"
    id, name, exchange, trading_pair, strategies, polling_interval, is_active,
    balance_notifications, webhook_url, telegram_bot_token, telegram_chat_id,
    telegram_topic_id, last_poll, last_error
";

/// Postgres-backed [`StorageBackend`].
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Opens a new pool against `config.url`.
    ///
    /// # Errors
    /// Returns a transient error if the database is unreachable.
    pub async fn connect(config: &DatabaseConfig) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(config.connect_timeout())
            .connect(&config.url)
            .await
            .map_err(classify_sqlx)?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the bundled schema migrations.
    ///
    /// # Errors
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

// ============================================================================
// Storage backend
// ============================================================================

#[async_trait]
impl StorageBackend for PgStorage {
    async fn latest_snapshot(&self, key: &SnapshotKey) -> StorageResult<Option<StateSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r"
            SELECT data_hash, data, timestamp
            FROM poll_states
            WHERE instance_id = $1
              AND symbol = $2
              AND data_type = $3
              AND side IS NOT DISTINCT FROM $4
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
            ",
        )
        .bind(key.instance_id)
        .bind(&key.symbol)
        .bind(key.data_type())
        .bind(key.side())
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        Ok(row.map(|r| r.into_snapshot(key.clone())))
    }

    async fn put_snapshot(&self, snapshot: &StateSnapshot) -> StorageResult<()> {
        sqlx::query(
            r"
            INSERT INTO poll_states (instance_id, symbol, data_type, side, data_hash, data, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(snapshot.key.instance_id)
        .bind(&snapshot.key.symbol)
        .bind(snapshot.key.data_type())
        .bind(snapshot.key.side())
        .bind(&snapshot.fingerprint)
        .bind(&snapshot.data)
        .bind(snapshot.timestamp)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        Ok(())
    }

    async fn append_activity(&self, event: &ActivityEvent) -> StorageResult<()> {
        sqlx::query(
            r"
            INSERT INTO activity_logs (instance_id, event_type, symbol, message, payload, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(event.instance_id)
        .bind(&event.event_type)
        .bind(event.symbol.as_deref())
        .bind(&event.message)
        .bind(event.payload.as_ref())
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        Ok(())
    }

    async fn append_error(&self, record: &ErrorRecord) -> StorageResult<()> {
        sqlx::query(
            r"
            INSERT INTO error_logs (instance_id, error_type, error_message, timestamp)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(record.instance_id)
        .bind(&record.error_type)
        .bind(&record.message)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        Ok(())
    }

    async fn put_balance_snapshot(&self, snapshot: &BalanceSnapshot) -> StorageResult<()> {
        let balance_data = serde_json::to_value(&snapshot.balance)
            .map_err(|e| decode_error("balance_data", e))?;

        sqlx::query(
            r"
            INSERT INTO balance_history (instance_id, balance_data, timestamp)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(snapshot.instance_id)
        .bind(balance_data)
        .bind(snapshot.timestamp)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        Ok(())
    }

    async fn prune_balance_older_than(
        &self,
        instance_id: i64,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM balance_history WHERE instance_id = $1 AND timestamp < $2")
            .bind(instance_id)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx)?;

        debug!(instance_id, removed = result.rows_affected(), "Pruned balance history");
        Ok(result.rows_affected())
    }

    async fn balance_history(&self, instance_id: i64) -> StorageResult<Vec<BalanceSnapshot>> {
        let rows = sqlx::query_as::<_, BalanceRow>(
            r"
            SELECT instance_id, balance_data, timestamp
            FROM balance_history
            WHERE instance_id = $1
            ORDER BY timestamp ASC
            ",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        rows.into_iter().map(BalanceSnapshot::try_from).collect()
    }

    async fn update_instance(&self, instance_id: i64, update: &InstanceUpdate) -> StorageResult<()> {
        let query = match update {
            InstanceUpdate::Polled { at } => {
                sqlx::query("UPDATE bot_instances SET last_poll = $2, last_error = NULL WHERE id = $1")
                    .bind(instance_id)
                    .bind(*at)
            }
            InstanceUpdate::Failed { error } => {
                sqlx::query("UPDATE bot_instances SET last_error = $2 WHERE id = $1")
                    .bind(instance_id)
                    .bind(error.as_str())
            }
        };

        query.execute(&self.pool).await.map_err(classify_sqlx)?;
        Ok(())
    }

    async fn load_instance(&self, instance_id: i64) -> StorageResult<Option<MonitoredInstance>> {
        let sql = format!("SELECT {INSTANCE_COLUMNS} FROM bot_instances WHERE id = $1");
        let row = sqlx::query_as::<_, InstanceRow>(&sql)
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify_sqlx)?;

        Ok(row.map(MonitoredInstance::from))
    }

    async fn list_active_instances(&self) -> StorageResult<Vec<MonitoredInstance>> {
        let sql = format!("SELECT {INSTANCE_COLUMNS} FROM bot_instances WHERE is_active ORDER BY id");
        let rows = sqlx::query_as::<_, InstanceRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx)?;

        Ok(rows.into_iter().map(MonitoredInstance::from).collect())
    }
}

// ============================================================================
// Credentials
// ============================================================================

#[async_trait]
impl CredentialStore for PgStorage {
    async fn credentials(&self, instance_id: i64) -> StorageResult<Option<ExchangeCredentials>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            "SELECT api_key, api_secret, api_passphrase FROM bot_instances WHERE id = $1",
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx)?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(match (row.api_key, row.api_secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                let creds = ExchangeCredentials::new(key, secret);
                Some(match row.api_passphrase.filter(|p| !p.is_empty()) {
                    Some(passphrase) => creds.with_passphrase(passphrase),
                    None => creds,
                })
            }
            _ => None,
        })
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Opens a fresh [`PgStorage`] pool per call.
#[derive(Debug, Clone)]
pub struct PgConnector {
    config: DatabaseConfig,
}

impl PgConnector {
    #[must_use]
    pub const fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StorageConnector for PgConnector {
    async fn connect(&self) -> StorageResult<Arc<dyn StorageBackend>> {
        let storage = PgStorage::connect(&self.config).await?;
        Ok(Arc::new(storage))
    }
}
