use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::balance::{AccountBalance, BalanceSnapshot};
use crate::error::{FetchError, StorageResult};
use crate::events::{ActivityEvent, ErrorRecord};
use crate::instance::{ExchangeCredentials, InstanceUpdate, MonitoredInstance};
use crate::record::ExchangeRecord;
use crate::snapshot::{SnapshotKey, StateSnapshot};

/// Read-only view of one exchange account.
///
/// Each poller owns its own adapter; implementations never share clients
/// across instances.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Exchange identifier this adapter was built for (`bybit`, `bitget`).
    fn exchange_id(&self) -> &str;

    async fn fetch_positions(&self) -> Result<Vec<ExchangeRecord>, FetchError>;

    async fn fetch_open_orders(&self) -> Result<Vec<ExchangeRecord>, FetchError>;

    /// Executions since `since`, or the exchange's default window when `None`.
    async fn fetch_recent_trades(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ExchangeRecord>, FetchError>;

    async fn fetch_balance(&self) -> Result<AccountBalance, FetchError>;
}

/// Persistence used by pollers and the scheduler.
///
/// Must tolerate concurrent use from many pollers.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Most recent snapshot for `key`, if any.
    async fn latest_snapshot(&self, key: &SnapshotKey) -> StorageResult<Option<StateSnapshot>>;

    /// Appends a snapshot row. Callers only do so when the fingerprint changed.
    async fn put_snapshot(&self, snapshot: &StateSnapshot) -> StorageResult<()>;

    async fn append_activity(&self, event: &ActivityEvent) -> StorageResult<()>;

    async fn append_error(&self, record: &ErrorRecord) -> StorageResult<()>;

    async fn put_balance_snapshot(&self, snapshot: &BalanceSnapshot) -> StorageResult<()>;

    /// Deletes balance rows for `instance_id` older than `cutoff`, returning
    /// how many were removed.
    async fn prune_balance_older_than(
        &self,
        instance_id: i64,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<u64>;

    /// Balance rows for `instance_id`, oldest first.
    async fn balance_history(&self, instance_id: i64) -> StorageResult<Vec<BalanceSnapshot>>;

    async fn update_instance(&self, instance_id: i64, update: &InstanceUpdate) -> StorageResult<()>;

    async fn load_instance(&self, instance_id: i64) -> StorageResult<Option<MonitoredInstance>>;

    async fn list_active_instances(&self) -> StorageResult<Vec<MonitoredInstance>>;
}

/// Opens storage sessions. Pollers call this again to replace a session
/// that failed transiently.
#[async_trait]
pub trait StorageConnector: Send + Sync {
    async fn connect(&self) -> StorageResult<Arc<dyn StorageBackend>>;
}

/// Source of exchange API credentials. Credential management lives elsewhere.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credentials(&self, instance_id: i64) -> StorageResult<Option<ExchangeCredentials>>;
}

/// Builds the exchange adapter a poller will own for `instance`.
#[async_trait]
pub trait AdapterSource: Send + Sync {
    async fn adapter_for(
        &self,
        instance: &MonitoredInstance,
    ) -> Result<Box<dyn ExchangeAdapter>, FetchError>;
}
