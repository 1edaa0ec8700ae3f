//! Fingerprint-based change detection.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use tradewatch_core::record::{fields, status};
use tradewatch_core::{EventType, SnapshotKey, SnapshotKind, StateSnapshot, StorageResult};

use crate::recovery::ErrorRecoveryManager;

/// A detected change, carrying the snapshot to append once the event has
/// been handled.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeDecision {
    pub event_type: EventType,
    pub snapshot: StateSnapshot,
}

/// Decides which event, if any, the transition `previous -> current`
/// produces for the resource `current.key` identifies.
#[must_use]
pub fn classify(previous: Option<&StateSnapshot>, current: &StateSnapshot) -> Option<EventType> {
    if previous.is_some_and(|p| p.fingerprint == current.fingerprint) {
        return None;
    }

    match &current.key.kind {
        SnapshotKind::Position { .. } => Some(EventType::PositionUpdate),
        SnapshotKind::Trade { .. } => previous.is_none().then_some(EventType::OrderFilled),
        SnapshotKind::Order { .. } => {
            let Some(previous) = previous else {
                return Some(EventType::NewOrder);
            };
            let before = order_status(&previous.data);
            let after = order_status(&current.data);
            if before == after {
                return None;
            }
            Some(match after {
                Some(status::CLOSED) => EventType::OrderFilled,
                Some(status::CANCELED) => EventType::OrderCancelled,
                _ => EventType::OrderUpdate,
            })
        }
    }
}

fn order_status(data: &Value) -> Option<&str> {
    data.get(fields::STATUS).and_then(Value::as_str)
}

/// Compares fetched state with the latest stored snapshot for its key.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    storage: Arc<ErrorRecoveryManager>,
}

impl ChangeDetector {
    #[must_use]
    pub const fn new(storage: Arc<ErrorRecoveryManager>) -> Self {
        Self { storage }
    }

    /// Returns the change `data` represents for `key`, without writing.
    ///
    /// # Errors
    /// Returns an error if the previous snapshot cannot be read.
    pub async fn evaluate(
        &self,
        key: SnapshotKey,
        data: Value,
        observed_at: DateTime<Utc>,
    ) -> StorageResult<Option<ChangeDecision>> {
        let lookup = &key;
        let previous = self
            .storage
            .run("latest_snapshot", move |s| async move { s.latest_snapshot(lookup).await })
            .await?;

        let current = StateSnapshot::capture(key, data, observed_at);
        Ok(classify(previous.as_ref(), &current).map(|event_type| ChangeDecision {
            event_type,
            snapshot: current,
        }))
    }

    /// Appends the snapshot of a decision returned by [`Self::evaluate`].
    ///
    /// # Errors
    /// Returns an error if the snapshot cannot be written.
    pub async fn record(&self, decision: &ChangeDecision) -> StorageResult<()> {
        let snapshot = &decision.snapshot;
        self.storage
            .run("put_snapshot", move |s| async move { s.put_snapshot(snapshot).await })
            .await
    }

    /// Evaluates and, on change, records in one step.
    ///
    /// # Errors
    /// Returns an error if either storage call fails.
    pub async fn observe(
        &self,
        key: SnapshotKey,
        data: Value,
        observed_at: DateTime<Utc>,
    ) -> StorageResult<Option<ChangeDecision>> {
        let decision = self.evaluate(key, data, observed_at).await?;
        if let Some(decision) = &decision {
            self.record(decision).await?;
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tradewatch_core::{PositionSide, RecoveryConfig, StorageConnector};
    use tradewatch_data::{MemoryConnector, MemoryStorage};

    fn snapshot(key: SnapshotKey, data: Value) -> StateSnapshot {
        StateSnapshot::capture(key, data, Utc::now())
    }

    async fn detector(storage: &MemoryStorage) -> ChangeDetector {
        let connector: Arc<dyn StorageConnector> = Arc::new(MemoryConnector::new(storage.clone()));
        let manager = ErrorRecoveryManager::connect(connector, &RecoveryConfig::default())
            .await
            .unwrap();
        ChangeDetector::new(Arc::new(manager))
    }

    #[test]
    fn test_order_lifecycle_rules() {
        let key = SnapshotKey::order(1, "BTCUSDT", "o-1");
        let open = snapshot(key.clone(), json!({"id": "o-1", "status": "open", "filled": 0}));
        let partly = snapshot(key.clone(), json!({"id": "o-1", "status": "open", "filled": 1}));
        let closed = snapshot(key.clone(), json!({"id": "o-1", "status": "closed"}));
        let canceled = snapshot(key.clone(), json!({"id": "o-1", "status": "canceled"}));
        let triggered = snapshot(key, json!({"id": "o-1", "status": "triggered"}));

        assert_eq!(classify(None, &open), Some(EventType::NewOrder));
        assert_eq!(classify(Some(&open), &open), None);
        // Same status, different content: no event.
        assert_eq!(classify(Some(&open), &partly), None);
        assert_eq!(classify(Some(&open), &closed), Some(EventType::OrderFilled));
        assert_eq!(classify(Some(&open), &canceled), Some(EventType::OrderCancelled));
        assert_eq!(classify(Some(&open), &triggered), Some(EventType::OrderUpdate));
    }

    #[test]
    fn test_trade_reported_once() {
        let key = SnapshotKey::trade(1, "BTCUSDT", "t-1");
        let fill = snapshot(key.clone(), json!({"id": "t-1", "amount": 1}));
        let amended = snapshot(key, json!({"id": "t-1", "amount": 2}));

        assert_eq!(classify(None, &fill), Some(EventType::OrderFilled));
        assert_eq!(classify(Some(&fill), &amended), None);
    }

    #[test]
    fn test_position_any_change() {
        let key = SnapshotKey::position(1, "XRPUSDT", PositionSide::Long);
        let a = snapshot(key.clone(), json!({"contracts": 10, "unrealizedPnl": 1.0}));
        let b = snapshot(key, json!({"unrealizedPnl": 1.5, "contracts": 10}));

        assert_eq!(classify(None, &a), Some(EventType::PositionUpdate));
        assert_eq!(classify(Some(&a), &a), None);
        assert_eq!(classify(Some(&a), &b), Some(EventType::PositionUpdate));
    }

    #[tokio::test]
    async fn test_observe_is_idempotent() {
        let storage = MemoryStorage::new();
        let detector = detector(&storage).await;
        let key = SnapshotKey::position(1, "XRP/USDT:USDT", PositionSide::Long);
        let data = json!({"symbol": "XRP/USDT:USDT", "contracts": 10});

        let first = detector.observe(key.clone(), data.clone(), Utc::now()).await.unwrap();
        let second = detector.observe(key.clone(), data, Utc::now()).await.unwrap();

        assert_eq!(first.map(|d| d.event_type), Some(EventType::PositionUpdate));
        assert!(second.is_none());
        assert_eq!(storage.snapshots_for(&key).len(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_does_not_write() {
        let storage = MemoryStorage::new();
        let detector = detector(&storage).await;
        let key = SnapshotKey::order(1, "BTCUSDT", "o-1");

        let decision = detector
            .evaluate(key.clone(), json!({"status": "open"}), Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!(storage.snapshots().is_empty());

        detector.record(&decision).await.unwrap();
        assert_eq!(storage.snapshots_for(&key).len(), 1);
    }
}
