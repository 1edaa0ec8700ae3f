pub mod balance;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod instance;
pub mod record;
pub mod snapshot;
pub mod strategy;
pub mod symbol;
pub mod traits;

pub use balance::{AccountBalance, BalanceSnapshot, CurrencyBalance};
pub use config::{
    AppConfig, BalanceConfig, DatabaseConfig, ExchangeConfig, NotificationConfig, RecoveryConfig,
    SchedulerConfig,
};
pub use config_loader::ConfigLoader;
pub use error::{DeliveryError, FetchError, StorageError, StorageResult};
pub use events::{ActivityEvent, ErrorRecord, EventPayload, EventType, PayloadContext};
pub use instance::{ExchangeCredentials, InstanceUpdate, MonitoredInstance, NotificationTargets};
pub use record::ExchangeRecord;
pub use snapshot::{fingerprint, PositionSide, SnapshotKey, SnapshotKind, StateSnapshot};
pub use strategy::resolve_strategy_tag;
pub use traits::{
    AdapterSource, CredentialStore, ExchangeAdapter, StorageBackend, StorageConnector,
};
