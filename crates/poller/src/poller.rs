//! One polling cycle for one instance.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use tradewatch_core::events::activity;
use tradewatch_core::symbol::matches_filter;
use tradewatch_core::{
    resolve_strategy_tag, AccountBalance, ActivityEvent, BalanceConfig, BalanceSnapshot,
    ErrorRecord, EventPayload, ExchangeAdapter, ExchangeRecord, FetchError, InstanceUpdate,
    MonitoredInstance, NotificationConfig, PayloadContext, PositionSide, SnapshotKey,
    StorageError, StorageResult,
};
use tradewatch_notify::EventDispatcher;

use crate::detector::{ChangeDecision, ChangeDetector};
use crate::recovery::ErrorRecoveryManager;

/// Exchange resource fetched during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Positions,
    Orders,
    Trades,
    Balance,
}

impl Resource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positions => "positions",
            Self::Orders => "orders",
            Self::Trades => "trades",
            Self::Balance => "balance",
        }
    }

    /// Error type logged when fetching this resource fails.
    #[must_use]
    pub const fn error_type(self) -> &'static str {
        match self {
            Self::Positions => "fetch_positions",
            Self::Orders => "fetch_orders",
            Self::Trades => "fetch_trades",
            Self::Balance => "fetch_balance",
        }
    }
}

/// Counters for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Positions left after the pair filter and the zero-contract rule.
    pub positions: usize,
    pub orders: usize,
    pub trades: usize,
    /// Change events emitted.
    pub events: usize,
    pub fetch_failures: Vec<Resource>,
    /// The exchange rejected the adapter's API keys on some fetch.
    pub auth_rejected: bool,
    pub delivery_failures: usize,
    pub balance_stored: bool,
    pub balance_pruned: u64,
}

/// How a cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    Success(CycleReport),
    /// At least one resource could not be fetched; the rest was processed.
    PartialFailure(CycleReport),
    /// A storage call failed unrecoverably; remaining storage work was skipped.
    HardFailure {
        report: CycleReport,
        error: StorageError,
    },
}

impl CycleOutcome {
    #[must_use]
    pub const fn report(&self) -> &CycleReport {
        match self {
            Self::Success(report) | Self::PartialFailure(report) => report,
            Self::HardFailure { report, .. } => report,
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::PartialFailure(_) => "partial_failure",
            Self::HardFailure { .. } => "hard_failure",
        }
    }
}

#[derive(Debug, Default)]
struct Fetched {
    positions: Vec<ExchangeRecord>,
    orders: Vec<ExchangeRecord>,
    trades: Vec<ExchangeRecord>,
    balance: Option<AccountBalance>,
    failures: Vec<(Resource, FetchError)>,
}

/// Polls one instance. Owns its adapter, its storage session and its
/// dispatcher; nothing here is shared with other instances.
pub struct Poller {
    instance: MonitoredInstance,
    adapter: Box<dyn ExchangeAdapter>,
    storage: Arc<ErrorRecoveryManager>,
    detector: ChangeDetector,
    dispatcher: EventDispatcher,
    retention: chrono::Duration,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("instance_id", &self.instance.id)
            .field("exchange", &self.adapter.exchange_id())
            .finish_non_exhaustive()
    }
}

impl Poller {
    #[must_use]
    pub fn new(
        instance: MonitoredInstance,
        adapter: Box<dyn ExchangeAdapter>,
        storage: Arc<ErrorRecoveryManager>,
        dispatcher: EventDispatcher,
        balance: &BalanceConfig,
    ) -> Self {
        Self {
            instance,
            adapter,
            detector: ChangeDetector::new(storage.clone()),
            storage,
            dispatcher,
            retention: balance.retention(),
        }
    }

    #[must_use]
    pub const fn instance(&self) -> &MonitoredInstance {
        &self.instance
    }

    /// Replaces the cached instance row with a freshly loaded one.
    pub fn refresh(&mut self, instance: MonitoredInstance, notifications: &NotificationConfig) {
        self.dispatcher.retarget(&instance, notifications);
        self.instance = instance;
    }

    /// Runs one complete cycle.
    pub async fn poll_once(&mut self) -> CycleOutcome {
        let started = Utc::now();
        let mut report = CycleReport::default();
        debug!(instance_id = self.instance.id, "Starting poll of {}", self.instance.name);

        match self.run_cycle(started, &mut report).await {
            Ok(()) => {
                self.instance.last_poll = Some(started);
                self.instance.last_error = None;
                info!(
                    instance_id = self.instance.id,
                    events = report.events,
                    positions = report.positions,
                    orders = report.orders,
                    trades = report.trades,
                    "Poll complete"
                );
                if report.fetch_failures.is_empty() {
                    CycleOutcome::Success(report)
                } else {
                    CycleOutcome::PartialFailure(report)
                }
            }
            Err(e) => {
                error!(instance_id = self.instance.id, "Poll aborted by storage failure: {}", e);
                self.record_failure(&e).await;
                self.instance.last_error = Some(e.to_string());
                CycleOutcome::HardFailure { report, error: e }
            }
        }
    }

    async fn run_cycle(&self, started: DateTime<Utc>, report: &mut CycleReport) -> StorageResult<()> {
        let id = self.instance.id;
        self.append_activity(
            ActivityEvent::new(
                id,
                activity::POLL_START,
                format!("Polling {} on {}", self.instance.name, self.instance.exchange),
            )
            .at(started),
        )
        .await?;

        let fetched = self.fetch_all().await;
        for (resource, err) in &fetched.failures {
            report.fetch_failures.push(*resource);
            report.auth_rejected |= matches!(err, FetchError::Authentication(_));
            self.append_error(ErrorRecord::new(id, resource.error_type(), err.to_string()))
                .await?;
        }

        let balance = fetched.balance.as_ref();
        self.process_positions(&fetched.positions, balance, started, report)
            .await?;
        self.process_orders(&fetched.orders, balance, started, report)
            .await?;
        self.process_trades(&fetched.trades, balance, started, report)
            .await?;

        if let Some(balance) = balance {
            self.store_balance(balance, started, report).await?;
        }

        let mut summary = format!(
            "{} positions, {} orders, {} trades, {} events",
            report.positions, report.orders, report.trades, report.events
        );
        if !report.fetch_failures.is_empty() {
            let failed: Vec<&str> = report.fetch_failures.iter().map(|r| r.as_str()).collect();
            summary.push_str(&format!("; failed to fetch {}", failed.join(", ")));
        }
        self.append_activity(ActivityEvent::new(id, activity::POLL_COMPLETE, summary))
            .await?;

        let update = InstanceUpdate::Polled { at: started };
        let update = &update;
        self.storage
            .run("update_instance", move |s| async move {
                s.update_instance(id, update).await
            })
            .await
    }

    // ========================================================================
    // Fetching
    // ========================================================================

    async fn fetch_all(&self) -> Fetched {
        let mut fetched = Fetched::default();

        match self.adapter.fetch_positions().await {
            Ok(positions) => fetched.positions = positions,
            Err(e) => self.fetch_failed(&mut fetched, Resource::Positions, e),
        }
        match self.adapter.fetch_open_orders().await {
            Ok(orders) => fetched.orders = orders,
            Err(e) => self.fetch_failed(&mut fetched, Resource::Orders, e),
        }
        match self.adapter.fetch_recent_trades(self.instance.last_poll).await {
            Ok(trades) => fetched.trades = trades,
            Err(e) => self.fetch_failed(&mut fetched, Resource::Trades, e),
        }
        if self.instance.balance_enabled {
            match self.adapter.fetch_balance().await {
                Ok(balance) => fetched.balance = Some(balance),
                Err(e) => self.fetch_failed(&mut fetched, Resource::Balance, e),
            }
        }

        fetched
    }

    fn fetch_failed(&self, fetched: &mut Fetched, resource: Resource, err: FetchError) {
        warn!(
            instance_id = self.instance.id,
            resource = resource.as_str(),
            kind = err.kind(),
            "Fetch failed: {}",
            err
        );
        fetched.failures.push((resource, err));
    }

    // ========================================================================
    // Change detection
    // ========================================================================

    async fn process_positions(
        &self,
        positions: &[ExchangeRecord],
        balance: Option<&AccountBalance>,
        started: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> StorageResult<()> {
        let filter = self.instance.pair_filter();
        for record in positions {
            let Some(symbol) = record.symbol() else { continue };
            if !matches_filter(filter, symbol) || record.contracts().abs() < f64::EPSILON {
                continue;
            }
            report.positions += 1;

            let key = SnapshotKey::position(self.instance.id, symbol, PositionSide::parse(record.side()));
            if let Some(decision) = self.detector.evaluate(key, record.to_value(), started).await? {
                self.handle_change(decision, record, balance, started, report)
                    .await?;
            }
        }
        Ok(())
    }

    async fn process_orders(
        &self,
        orders: &[ExchangeRecord],
        balance: Option<&AccountBalance>,
        started: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> StorageResult<()> {
        let filter = self.instance.pair_filter();
        for record in orders {
            let Some(symbol) = record.symbol() else { continue };
            if !matches_filter(filter, symbol) {
                continue;
            }
            let Some(order_id) = record.id() else {
                warn!(instance_id = self.instance.id, symbol, "Skipping order without id");
                continue;
            };
            report.orders += 1;

            let key = SnapshotKey::order(self.instance.id, symbol, order_id);
            if let Some(decision) = self.detector.evaluate(key, record.to_value(), started).await? {
                self.handle_change(decision, record, balance, started, report)
                    .await?;
            }
        }
        Ok(())
    }

    async fn process_trades(
        &self,
        trades: &[ExchangeRecord],
        balance: Option<&AccountBalance>,
        started: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> StorageResult<()> {
        let filter = self.instance.pair_filter();
        for record in trades {
            let Some(symbol) = record.symbol() else { continue };
            if !matches_filter(filter, symbol) {
                continue;
            }
            let Some(trade_id) = record.id() else {
                warn!(instance_id = self.instance.id, symbol, "Skipping trade without id");
                continue;
            };
            report.trades += 1;

            let key = SnapshotKey::trade(self.instance.id, symbol, trade_id);
            if let Some(decision) = self.detector.evaluate(key, record.to_value(), started).await? {
                self.handle_change(decision, record, balance, started, report)
                    .await?;
            }
        }
        Ok(())
    }

    /// Dispatches, then persists the snapshot, the event and each delivery
    /// outcome.
    async fn handle_change(
        &self,
        decision: ChangeDecision,
        record: &ExchangeRecord,
        balance: Option<&AccountBalance>,
        started: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> StorageResult<()> {
        let id = self.instance.id;
        let symbol = record.symbol().unwrap_or_default();
        let strategy = resolve_strategy_tag(&self.instance.strategies, symbol);
        let ctx = PayloadContext {
            instance_id: id,
            exchange: &self.instance.exchange,
            strategy: &strategy,
            timestamp: started,
        };
        let payload = EventPayload::from_record(decision.event_type, record, &ctx)
            .with_balance(balance.cloned());

        info!(
            instance_id = id,
            symbol,
            event_type = %decision.event_type,
            strategy = %strategy,
            "Change detected"
        );
        let outcomes = self.dispatcher.dispatch(&payload).await;

        self.detector.record(&decision).await?;
        self.append_activity(
            ActivityEvent::new(id, decision.event_type.as_str(), format!("{} on {symbol}", decision.event_type))
                .with_symbol(symbol)
                .with_payload(payload.to_json())
                .at(started),
        )
        .await?;
        report.events += 1;

        for outcome in outcomes {
            let message = match &outcome.result {
                Ok(()) => format!("{} delivered", decision.event_type),
                Err(e) => format!("{} delivery failed: {e}", decision.event_type),
            };
            self.append_activity(
                ActivityEvent::new(id, outcome.activity_type(), message.clone()).with_symbol(symbol),
            )
            .await?;
            if !outcome.is_success() {
                report.delivery_failures += 1;
                self.append_error(ErrorRecord::new(id, outcome.error_type(), message))
                    .await?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Balance
    // ========================================================================

    async fn store_balance(
        &self,
        balance: &AccountBalance,
        started: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> StorageResult<()> {
        let id = self.instance.id;
        let snapshot = BalanceSnapshot {
            instance_id: id,
            balance: balance.clone(),
            timestamp: started,
        };
        let snapshot = &snapshot;
        self.storage
            .run("put_balance_snapshot", move |s| async move {
                s.put_balance_snapshot(snapshot).await
            })
            .await?;
        report.balance_stored = true;

        let cutoff = started - self.retention;
        let removed = self
            .storage
            .run("prune_balance", move |s| async move {
                s.prune_balance_older_than(id, cutoff).await
            })
            .await?;
        if removed > 0 {
            debug!(instance_id = id, removed, "Pruned old balance snapshots");
        }
        report.balance_pruned = removed;
        Ok(())
    }

    // ========================================================================
    // Storage helpers
    // ========================================================================

    async fn append_activity(&self, event: ActivityEvent) -> StorageResult<()> {
        let event = &event;
        self.storage
            .run("append_activity", move |s| async move { s.append_activity(event).await })
            .await
    }

    async fn append_error(&self, record: ErrorRecord) -> StorageResult<()> {
        let record = &record;
        self.storage
            .run("append_error", move |s| async move { s.append_error(record).await })
            .await
    }

    /// Single-attempt writes after an unrecoverable storage failure.
    async fn record_failure(&self, err: &StorageError) {
        let id = self.instance.id;
        let message = err.to_string();
        let session = self.storage.session().await;

        let record = ErrorRecord::new(id, "poll_failed", message.clone());
        if let Err(e) = session.append_error(&record).await {
            warn!(instance_id = id, "Could not log poll failure: {}", e);
        }
        let event = ActivityEvent::new(id, activity::POLL_ERROR, message.clone());
        if let Err(e) = session.append_activity(&event).await {
            warn!(instance_id = id, "Could not log poll error: {}", e);
        }
        if let Err(e) = session
            .update_instance(id, &InstanceUpdate::Failed { error: message })
            .await
        {
            warn!(instance_id = id, "Could not record last_error: {}", e);
        }
    }
}
