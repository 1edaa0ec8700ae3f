mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use tradewatch_core::{AdapterSource, AppConfig, ExchangeAdapter, FetchError, MonitoredInstance};
use tradewatch_data::MemoryStorage;
use tradewatch_poller::{run_instance_loop, PollerContext, Scheduler};

use common::{connector, order, FakeExchange, NoCredentials, RecordingChat};

fn config(refresh_secs: u64) -> AppConfig {
    let mut config = AppConfig::default();
    config.scheduler.refresh_interval_secs = refresh_secs;
    config
}

fn context(storage: &MemoryStorage, exchange: &FakeExchange, refresh_secs: u64) -> PollerContext {
    PollerContext::new(connector(storage), Arc::new(exchange.clone()), config(refresh_secs))
        .with_chat_transport(Arc::new(RecordingChat::default()))
}

/// Counts adapter builds; the first `unreachable` lookups fail as if the
/// credential store dropped its connection.
struct CountingSource {
    exchange: FakeExchange,
    builds: AtomicUsize,
    unreachable: AtomicUsize,
}

impl CountingSource {
    fn new(exchange: &FakeExchange, unreachable: usize) -> Self {
        Self {
            exchange: exchange.clone(),
            builds: AtomicUsize::new(0),
            unreachable: AtomicUsize::new(unreachable),
        }
    }

    fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdapterSource for CountingSource {
    async fn adapter_for(
        &self,
        instance: &MonitoredInstance,
    ) -> Result<Box<dyn ExchangeAdapter>, FetchError> {
        let down = self
            .unreachable
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if down {
            return Err(FetchError::Network(
                "credential lookup failed: connection reset by peer".to_string(),
            ));
        }
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.exchange.adapter_for(instance).await
    }
}

fn polls(storage: &MemoryStorage, instance_id: i64) -> usize {
    storage
        .activities_of("poll_complete")
        .iter()
        .filter(|a| a.instance_id == instance_id)
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_loop_polls_on_interval_and_exits_when_deactivated() {
    let storage = MemoryStorage::new();
    let exchange = FakeExchange::new();
    exchange.set_orders(vec![order("BTCUSDT", "o-1", "open")]);
    storage.insert_instance(MonitoredInstance::new(1, "a", "bybit").with_polling_interval(10));

    let (_tx, rx) = watch::channel(false);
    let handle = tokio::spawn(run_instance_loop(
        Arc::new(context(&storage, &exchange, 60)),
        1,
        rx,
    ));

    sleep(Duration::from_secs(25)).await;
    assert_eq!(polls(&storage, 1), 3);
    assert_eq!(storage.activities_of("new_order").len(), 1);

    storage.set_active(1, false);
    timeout(Duration::from_secs(30), handle)
        .await
        .expect("loop should stop after deactivation")
        .unwrap();
    assert_eq!(polls(&storage, 1), 3);
}

#[tokio::test(start_paused = true)]
async fn test_loop_exits_when_instance_removed() {
    let storage = MemoryStorage::new();
    let exchange = FakeExchange::new();
    storage.insert_instance(MonitoredInstance::new(4, "gone", "bybit").with_polling_interval(5));

    let (_tx, rx) = watch::channel(false);
    let handle = tokio::spawn(run_instance_loop(
        Arc::new(context(&storage, &exchange, 60)),
        4,
        rx,
    ));
    sleep(Duration::from_secs(1)).await;
    storage.remove_instance(4);

    timeout(Duration::from_secs(10), handle)
        .await
        .expect("loop should stop once the row is gone")
        .unwrap();
    assert_eq!(polls(&storage, 4), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_credentials_sets_last_error() {
    let storage = MemoryStorage::new();
    storage.insert_instance(MonitoredInstance::new(2, "no keys", "bitget").with_polling_interval(30));
    let context = PollerContext::new(connector(&storage), Arc::new(NoCredentials), config(60));

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(run_instance_loop(Arc::new(context), 2, rx));
    sleep(Duration::from_secs(1)).await;

    let errors = storage.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_type, "credentials");
    assert!(storage
        .instance(2)
        .unwrap()
        .last_error
        .unwrap()
        .contains("no API credentials"));

    tx.send(true).unwrap();
    timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_starts_new_instances_and_shuts_down() {
    let storage = MemoryStorage::new();
    let exchange = FakeExchange::new();
    storage.insert_instance(MonitoredInstance::new(1, "first", "bybit").with_polling_interval(30));
    let mut inactive = MonitoredInstance::new(3, "paused", "bybit");
    inactive.is_active = false;
    storage.insert_instance(inactive);

    let (tx, rx) = watch::channel(false);
    let scheduler = Scheduler::new(context(&storage, &exchange, 20));
    let run = tokio::spawn(scheduler.run(rx));

    sleep(Duration::from_secs(1)).await;
    assert_eq!(polls(&storage, 1), 1);

    storage.insert_instance(MonitoredInstance::new(2, "second", "bybit").with_polling_interval(30));
    sleep(Duration::from_secs(20)).await;
    assert_eq!(polls(&storage, 2), 1);
    assert_eq!(polls(&storage, 3), 0);

    tx.send(true).unwrap();
    timeout(Duration::from_secs(5), run)
        .await
        .expect("scheduler should stop promptly")
        .unwrap()
        .unwrap();

    // No cycle starts after shutdown.
    sleep(Duration::from_secs(120)).await;
    assert_eq!(polls(&storage, 1), 1);
    assert_eq!(polls(&storage, 2), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_restarts_reactivated_instance() {
    let storage = MemoryStorage::new();
    let exchange = FakeExchange::new();
    storage.insert_instance(MonitoredInstance::new(1, "flappy", "bybit").with_polling_interval(10));

    let (tx, rx) = watch::channel(false);
    let run = tokio::spawn(Scheduler::new(context(&storage, &exchange, 60)).run(rx));

    sleep(Duration::from_secs(1)).await;
    storage.set_active(1, false);
    sleep(Duration::from_secs(30)).await;
    let before = polls(&storage, 1);
    assert_eq!(before, 1);

    storage.set_active(1, true);
    sleep(Duration::from_secs(40)).await;
    assert!(polls(&storage, 1) > before);

    tx.send(true).unwrap();
    timeout(Duration::from_secs(5), run).await.unwrap().unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_lets_in_flight_cycle_finish() {
    let storage = MemoryStorage::new();
    let exchange = FakeExchange::new();
    exchange.set_orders(vec![order("BTCUSDT", "o-1", "open")]);
    exchange.delay_positions(Duration::from_secs(5));
    storage.insert_instance(MonitoredInstance::new(1, "slow", "bybit").with_polling_interval(10));

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(run_instance_loop(
        Arc::new(context(&storage, &exchange, 60)),
        1,
        rx,
    ));

    sleep(Duration::from_secs(2)).await;
    assert_eq!(storage.activities_of("poll_start").len(), 1);
    assert_eq!(polls(&storage, 1), 0);

    tx.send(true).unwrap();
    timeout(Duration::from_secs(30), handle)
        .await
        .expect("loop should stop once the cycle finishes")
        .unwrap();

    assert_eq!(polls(&storage, 1), 1);
    assert_eq!(storage.snapshots().len(), 1);
    assert_eq!(storage.activities_of("new_order").len(), 1);
    assert!(storage.instance(1).unwrap().last_poll.is_some());

    sleep(Duration::from_secs(60)).await;
    assert_eq!(storage.activities_of("poll_start").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deactivation_lets_in_flight_cycle_finish() {
    let storage = MemoryStorage::new();
    let exchange = FakeExchange::new();
    exchange.set_orders(vec![order("BTCUSDT", "o-1", "open")]);
    exchange.delay_positions(Duration::from_secs(5));
    storage.insert_instance(MonitoredInstance::new(1, "slow", "bybit").with_polling_interval(10));

    let (_tx, rx) = watch::channel(false);
    let handle = tokio::spawn(run_instance_loop(
        Arc::new(context(&storage, &exchange, 60)),
        1,
        rx,
    ));

    sleep(Duration::from_secs(2)).await;
    storage.set_active(1, false);
    assert_eq!(polls(&storage, 1), 0);

    timeout(Duration::from_secs(30), handle)
        .await
        .expect("loop should stop after deactivation")
        .unwrap();

    assert_eq!(storage.activities_of("poll_start").len(), 1);
    assert_eq!(polls(&storage, 1), 1);
    assert_eq!(storage.snapshots().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_keys_rebuild_adapter() {
    let storage = MemoryStorage::new();
    let exchange = FakeExchange::new();
    exchange.reject_keys();
    storage.insert_instance(MonitoredInstance::new(1, "rotated", "bybit").with_polling_interval(10));
    let source = Arc::new(CountingSource::new(&exchange, 0));
    let context = PollerContext::new(connector(&storage), source.clone(), config(60))
        .with_chat_transport(Arc::new(RecordingChat::default()));

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(run_instance_loop(Arc::new(context), 1, rx));

    sleep(Duration::from_secs(1)).await;
    assert_eq!(source.builds(), 1);
    assert!(!storage.errors().is_empty());

    // New keys are in place before the next cycle.
    exchange.accept_keys();
    exchange.set_orders(vec![order("BTCUSDT", "o-1", "open")]);
    sleep(Duration::from_secs(10)).await;
    assert_eq!(source.builds(), 2);
    assert_eq!(storage.activities_of("new_order").len(), 1);

    // A healthy adapter is kept.
    sleep(Duration::from_secs(10)).await;
    assert_eq!(source.builds(), 2);
    assert_eq!(polls(&storage, 1), 3);

    tx.send(true).unwrap();
    timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_credential_store_is_retried() {
    let storage = MemoryStorage::new();
    let exchange = FakeExchange::new();
    exchange.set_orders(vec![order("BTCUSDT", "o-1", "open")]);
    storage.insert_instance(MonitoredInstance::new(1, "db blip", "bybit").with_polling_interval(10));
    let source = Arc::new(CountingSource::new(&exchange, 1));
    let context = PollerContext::new(connector(&storage), source.clone(), config(60))
        .with_chat_transport(Arc::new(RecordingChat::default()));

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(run_instance_loop(Arc::new(context), 1, rx));

    sleep(Duration::from_secs(1)).await;
    let errors = storage.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_type, "setup_transient");
    assert_eq!(polls(&storage, 1), 0);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(source.builds(), 1);
    assert_eq!(polls(&storage, 1), 1);
    assert!(storage.instance(1).unwrap().last_error.is_none());

    tx.send(true).unwrap();
    timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
}
