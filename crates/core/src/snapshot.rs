//! Fingerprinted state snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Position side, part of the snapshot key so hedge-mode long and short legs
/// on the same symbol are tracked independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
    /// One-way mode, or an exchange that does not report a side.
    Net,
}

impl PositionSide {
    /// Parses the side reported by an exchange (`long`/`buy`, `short`/`sell`).
    #[must_use]
    pub fn parse(side: Option<&str>) -> Self {
        match side.map(str::to_ascii_lowercase).as_deref() {
            Some("long" | "buy") => Self::Long,
            Some("short" | "sell") => Self::Short,
            _ => Self::Net,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
            Self::Net => "net",
        }
    }
}

/// Which resource a snapshot tracks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotKind {
    Position { side: PositionSide },
    Order { order_id: String },
    Trade { trade_id: String },
}

/// Identity of a tracked piece of state: `(instance, symbol, data_type, side?)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub instance_id: i64,
    pub symbol: String,
    pub kind: SnapshotKind,
}

impl SnapshotKey {
    #[must_use]
    pub fn position(instance_id: i64, symbol: impl Into<String>, side: PositionSide) -> Self {
        Self {
            instance_id,
            symbol: symbol.into(),
            kind: SnapshotKind::Position { side },
        }
    }

    #[must_use]
    pub fn order(instance_id: i64, symbol: impl Into<String>, order_id: impl Into<String>) -> Self {
        Self {
            instance_id,
            symbol: symbol.into(),
            kind: SnapshotKind::Order {
                order_id: order_id.into(),
            },
        }
    }

    #[must_use]
    pub fn trade(instance_id: i64, symbol: impl Into<String>, trade_id: impl Into<String>) -> Self {
        Self {
            instance_id,
            symbol: symbol.into(),
            kind: SnapshotKind::Trade {
                trade_id: trade_id.into(),
            },
        }
    }

    /// Storage encoding of the resource: `position`, `order_<id>`, `trade_<id>`.
    #[must_use]
    pub fn data_type(&self) -> String {
        match &self.kind {
            SnapshotKind::Position { .. } => "position".to_string(),
            SnapshotKind::Order { order_id } => format!("order_{order_id}"),
            SnapshotKind::Trade { trade_id } => format!("trade_{trade_id}"),
        }
    }

    /// Side column; only positions carry one.
    #[must_use]
    pub fn side(&self) -> Option<&'static str> {
        match &self.kind {
            SnapshotKind::Position { side } => Some(side.as_str()),
            _ => None,
        }
    }
}

/// One appended row of observed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub key: SnapshotKey,
    pub fingerprint: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl StateSnapshot {
    /// Builds a snapshot of `data`, computing its fingerprint.
    #[must_use]
    pub fn capture(key: SnapshotKey, data: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            fingerprint: fingerprint(&data),
            key,
            data,
            timestamp,
        }
    }
}

/// SHA-256 (hex) of the canonical JSON serialization of `value`.
///
/// Object keys are sorted recursively, so two maps with the same content
/// hash identically regardless of the order the exchange returned them in.
#[must_use]
pub fn fingerprint(value: &Value) -> String {
    let canonical = canonicalize(value).to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
