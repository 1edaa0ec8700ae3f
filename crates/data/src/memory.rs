//! In-memory storage backend.
//!
//! Used by tests and the `poll-once --dry-run` command. Clones share the same
//! underlying state, so a "recreated session" sees everything the previous
//! one wrote. Failures can be scripted per operation to exercise recovery.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use tradewatch_core::{
    ActivityEvent, BalanceSnapshot, CredentialStore, ErrorRecord, ExchangeCredentials,
    InstanceUpdate, MonitoredInstance, SnapshotKey, StateSnapshot, StorageBackend,
    StorageConnector, StorageError, StorageResult,
};

/// Storage operations that can have failures scripted against them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOp {
    LatestSnapshot,
    PutSnapshot,
    AppendActivity,
    AppendError,
    PutBalance,
    PruneBalance,
    BalanceHistory,
    UpdateInstance,
    LoadInstance,
    ListInstances,
}

#[derive(Debug, Clone)]
struct StoredCredentials {
    api_key: String,
    api_secret: String,
    passphrase: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    instances: BTreeMap<i64, MonitoredInstance>,
    credentials: HashMap<i64, StoredCredentials>,
    snapshots: Vec<StateSnapshot>,
    activities: Vec<ActivityEvent>,
    errors: Vec<ErrorRecord>,
    balances: Vec<BalanceSnapshot>,
    failures: HashMap<StorageOp, VecDeque<StorageError>>,
    calls: HashMap<StorageOp, usize>,
}

/// Shared-state in-memory [`StorageBackend`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<State>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Fixtures
    // ========================================================================

    pub fn insert_instance(&self, instance: MonitoredInstance) {
        self.state.lock().instances.insert(instance.id, instance);
    }

    /// Flips the active flag, as the external admin surface would.
    pub fn set_active(&self, instance_id: i64, active: bool) {
        if let Some(instance) = self.state.lock().instances.get_mut(&instance_id) {
            instance.is_active = active;
        }
    }

    pub fn remove_instance(&self, instance_id: i64) {
        self.state.lock().instances.remove(&instance_id);
    }

    pub fn set_credentials(
        &self,
        instance_id: i64,
        api_key: &str,
        api_secret: &str,
        passphrase: Option<&str>,
    ) {
        self.state.lock().credentials.insert(
            instance_id,
            StoredCredentials {
                api_key: api_key.to_string(),
                api_secret: api_secret.to_string(),
                passphrase: passphrase.map(str::to_string),
            },
        );
    }

    /// Makes the next call to `op` fail with `error`. Queued errors are
    /// consumed in order, one per call.
    pub fn fail_next(&self, op: StorageOp, error: StorageError) {
        self.state.lock().failures.entry(op).or_default().push_back(error);
    }

    /// Queues `times` failures for `op`, each built by `make`.
    pub fn fail_times(&self, op: StorageOp, times: usize, make: impl Fn() -> StorageError) {
        let mut state = self.state.lock();
        let queue = state.failures.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(make());
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    #[must_use]
    pub fn instance(&self, instance_id: i64) -> Option<MonitoredInstance> {
        self.state.lock().instances.get(&instance_id).cloned()
    }

    #[must_use]
    pub fn snapshots(&self) -> Vec<StateSnapshot> {
        self.state.lock().snapshots.clone()
    }

    #[must_use]
    pub fn snapshots_for(&self, key: &SnapshotKey) -> Vec<StateSnapshot> {
        self.state
            .lock()
            .snapshots
            .iter()
            .filter(|s| &s.key == key)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn activities(&self) -> Vec<ActivityEvent> {
        self.state.lock().activities.clone()
    }

    /// Activities of one type, in insertion order.
    #[must_use]
    pub fn activities_of(&self, event_type: &str) -> Vec<ActivityEvent> {
        self.state
            .lock()
            .activities
            .iter()
            .filter(|a| a.event_type == event_type)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.state.lock().errors.clone()
    }

    /// Number of calls made to `op`, failed ones included.
    #[must_use]
    pub fn call_count(&self, op: StorageOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    fn enter(&self, op: StorageOp) -> StorageResult<parking_lot::MutexGuard<'_, State>> {
        let mut state = self.state.lock();
        *state.calls.entry(op).or_default() += 1;
        if let Some(err) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn latest_snapshot(&self, key: &SnapshotKey) -> StorageResult<Option<StateSnapshot>> {
        let state = self.enter(StorageOp::LatestSnapshot)?;
        Ok(state.snapshots.iter().rev().find(|s| &s.key == key).cloned())
    }

    async fn put_snapshot(&self, snapshot: &StateSnapshot) -> StorageResult<()> {
        self.enter(StorageOp::PutSnapshot)?.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn append_activity(&self, event: &ActivityEvent) -> StorageResult<()> {
        self.enter(StorageOp::AppendActivity)?.activities.push(event.clone());
        Ok(())
    }

    async fn append_error(&self, record: &ErrorRecord) -> StorageResult<()> {
        self.enter(StorageOp::AppendError)?.errors.push(record.clone());
        Ok(())
    }

    async fn put_balance_snapshot(&self, snapshot: &BalanceSnapshot) -> StorageResult<()> {
        self.enter(StorageOp::PutBalance)?.balances.push(snapshot.clone());
        Ok(())
    }

    async fn prune_balance_older_than(
        &self,
        instance_id: i64,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let mut state = self.enter(StorageOp::PruneBalance)?;
        let before = state.balances.len();
        state
            .balances
            .retain(|b| b.instance_id != instance_id || b.timestamp >= cutoff);
        Ok((before - state.balances.len()) as u64)
    }

    async fn balance_history(&self, instance_id: i64) -> StorageResult<Vec<BalanceSnapshot>> {
        let state = self.enter(StorageOp::BalanceHistory)?;
        let mut rows: Vec<BalanceSnapshot> = state
            .balances
            .iter()
            .filter(|b| b.instance_id == instance_id)
            .cloned()
            .collect();
        rows.sort_by_key(|b| b.timestamp);
        Ok(rows)
    }

    async fn update_instance(&self, instance_id: i64, update: &InstanceUpdate) -> StorageResult<()> {
        let mut state = self.enter(StorageOp::UpdateInstance)?;
        let Some(instance) = state.instances.get_mut(&instance_id) else {
            return Ok(());
        };
        match update {
            InstanceUpdate::Polled { at } => {
                instance.last_poll = Some(*at);
                instance.last_error = None;
            }
            InstanceUpdate::Failed { error } => instance.last_error = Some(error.clone()),
        }
        Ok(())
    }

    async fn load_instance(&self, instance_id: i64) -> StorageResult<Option<MonitoredInstance>> {
        let state = self.enter(StorageOp::LoadInstance)?;
        Ok(state.instances.get(&instance_id).cloned())
    }

    async fn list_active_instances(&self) -> StorageResult<Vec<MonitoredInstance>> {
        let state = self.enter(StorageOp::ListInstances)?;
        Ok(state.instances.values().filter(|i| i.is_active).cloned().collect())
    }
}

#[async_trait]
impl CredentialStore for MemoryStorage {
    async fn credentials(&self, instance_id: i64) -> StorageResult<Option<ExchangeCredentials>> {
        let stored = self.state.lock().credentials.get(&instance_id).cloned();
        Ok(stored.map(|c| {
            let creds = ExchangeCredentials::new(c.api_key, c.api_secret);
            match c.passphrase {
                Some(p) => creds.with_passphrase(p),
                None => creds,
            }
        }))
    }
}

/// Hands out sessions over one shared [`MemoryStorage`], counting them.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    storage: MemoryStorage,
    connects: Arc<AtomicUsize>,
}

impl MemoryConnector {
    #[must_use]
    pub fn new(storage: MemoryStorage) -> Self {
        Self {
            storage,
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sessions opened so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageConnector for MemoryConnector {
    async fn connect(&self) -> StorageResult<Arc<dyn StorageBackend>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.storage.clone()))
    }
}
