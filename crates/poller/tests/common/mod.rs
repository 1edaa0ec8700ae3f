//! Shared fixtures: a scriptable exchange, a recording chat transport, and
//! helpers that wire a poller over in-memory storage.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;

use tradewatch_core::record::fields;
use tradewatch_core::{
    AccountBalance, AdapterSource, BalanceConfig, DeliveryError, ExchangeAdapter, ExchangeRecord,
    FetchError, MonitoredInstance, NotificationConfig, RecoveryConfig, StorageConnector,
};
use tradewatch_data::{MemoryConnector, MemoryStorage};
use tradewatch_notify::{ChatTarget, ChatTransport, EventDispatcher};
use tradewatch_poller::{ErrorRecoveryManager, Poller, Resource};

#[derive(Debug, Default)]
struct ExchangeState {
    positions: Vec<ExchangeRecord>,
    orders: Vec<ExchangeRecord>,
    trades: Vec<ExchangeRecord>,
    balance: AccountBalance,
    failing: HashSet<&'static str>,
    keys_rejected: bool,
    positions_delay: Option<Duration>,
    trade_queries: Vec<Option<DateTime<Utc>>>,
}

/// Exchange whose responses are set by the test. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeExchange {
    state: Arc<Mutex<ExchangeState>>,
}

impl FakeExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_positions(&self, positions: Vec<ExchangeRecord>) {
        self.state.lock().positions = positions;
    }

    pub fn set_orders(&self, orders: Vec<ExchangeRecord>) {
        self.state.lock().orders = orders;
    }

    pub fn set_trades(&self, trades: Vec<ExchangeRecord>) {
        self.state.lock().trades = trades;
    }

    pub fn set_balance(&self, balance: AccountBalance) {
        self.state.lock().balance = balance;
    }

    pub fn fail(&self, resource: Resource) {
        self.state.lock().failing.insert(resource.as_str());
    }

    /// Every fetch fails with an authentication error until `accept_keys`.
    pub fn reject_keys(&self) {
        self.state.lock().keys_rejected = true;
    }

    pub fn accept_keys(&self) {
        self.state.lock().keys_rejected = false;
    }

    /// Makes the positions fetch take `delay` before answering.
    pub fn delay_positions(&self, delay: Duration) {
        self.state.lock().positions_delay = Some(delay);
    }

    /// `since` argument of every trade fetch so far.
    pub fn trade_queries(&self) -> Vec<Option<DateTime<Utc>>> {
        self.state.lock().trade_queries.clone()
    }

    fn check(&self, resource: Resource) -> Result<(), FetchError> {
        let state = self.state.lock();
        if state.keys_rejected {
            Err(FetchError::Authentication("API key is invalid".to_string()))
        } else if state.failing.contains(resource.as_str()) {
            Err(FetchError::Timeout(format!("{} request timed out", resource.as_str())))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ExchangeAdapter for FakeExchange {
    fn exchange_id(&self) -> &str {
        "bybit"
    }

    async fn fetch_positions(&self) -> Result<Vec<ExchangeRecord>, FetchError> {
        let delay = self.state.lock().positions_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check(Resource::Positions)?;
        Ok(self.state.lock().positions.clone())
    }

    async fn fetch_open_orders(&self) -> Result<Vec<ExchangeRecord>, FetchError> {
        self.check(Resource::Orders)?;
        Ok(self.state.lock().orders.clone())
    }

    async fn fetch_recent_trades(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ExchangeRecord>, FetchError> {
        self.state.lock().trade_queries.push(since);
        self.check(Resource::Trades)?;
        Ok(self.state.lock().trades.clone())
    }

    async fn fetch_balance(&self) -> Result<AccountBalance, FetchError> {
        self.check(Resource::Balance)?;
        Ok(self.state.lock().balance.clone())
    }
}

#[async_trait]
impl AdapterSource for FakeExchange {
    async fn adapter_for(
        &self,
        _instance: &MonitoredInstance,
    ) -> Result<Box<dyn ExchangeAdapter>, FetchError> {
        Ok(Box::new(self.clone()))
    }
}

/// Adapter source for accounts with no stored API keys.
pub struct NoCredentials;

#[async_trait]
impl AdapterSource for NoCredentials {
    async fn adapter_for(
        &self,
        instance: &MonitoredInstance,
    ) -> Result<Box<dyn ExchangeAdapter>, FetchError> {
        Err(FetchError::Authentication(format!(
            "no API credentials for instance {}",
            instance.id
        )))
    }
}

/// Chat transport that records what it was asked to send, and when.
#[derive(Debug, Default)]
pub struct RecordingChat {
    sent: Mutex<Vec<(Instant, String)>>,
}

impl RecordingChat {
    pub fn sent(&self) -> Vec<(Instant, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChatTransport for RecordingChat {
    async fn send(&self, _target: &ChatTarget, message: &str) -> Result<(), DeliveryError> {
        self.sent.lock().push((Instant::now(), message.to_string()));
        Ok(())
    }
}

pub fn position(symbol: &str, side: &str, contracts: f64, pnl: f64) -> ExchangeRecord {
    ExchangeRecord::new()
        .with(fields::SYMBOL, symbol)
        .with(fields::SIDE, side)
        .with(fields::CONTRACTS, contracts)
        .with(fields::ENTRY_PRICE, 0.5)
        .with(fields::UNREALIZED_PNL, pnl)
}

pub fn order(symbol: &str, id: &str, status: &str) -> ExchangeRecord {
    ExchangeRecord::new()
        .with(fields::SYMBOL, symbol)
        .with(fields::ID, id)
        .with(fields::SIDE, "buy")
        .with(fields::PRICE, 0.5)
        .with(fields::AMOUNT, 100.0)
        .with(fields::STATUS, status)
}

pub fn trade(symbol: &str, id: &str, order_id: &str) -> ExchangeRecord {
    ExchangeRecord::new()
        .with(fields::SYMBOL, symbol)
        .with(fields::ID, id)
        .with(fields::ORDER, order_id)
        .with(fields::SIDE, "sell")
        .with(fields::PRICE, 0.55)
        .with(fields::AMOUNT, 100.0)
}

pub fn connector(storage: &MemoryStorage) -> Arc<dyn StorageConnector> {
    Arc::new(MemoryConnector::new(storage.clone()))
}

/// Registers `instance` in `storage` and builds a poller for it.
pub async fn poller_for(
    storage: &MemoryStorage,
    exchange: &FakeExchange,
    instance: MonitoredInstance,
    chat: Arc<RecordingChat>,
    notifications: &NotificationConfig,
) -> Poller {
    storage.insert_instance(instance.clone());
    let recovery = ErrorRecoveryManager::connect(connector(storage), &RecoveryConfig::default())
        .await
        .unwrap();
    let dispatcher = EventDispatcher::with_transport(&instance, notifications, chat).unwrap();
    Poller::new(
        instance,
        Box::new(exchange.clone()),
        Arc::new(recovery),
        dispatcher,
        &BalanceConfig::default(),
    )
}
