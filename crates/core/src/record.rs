//! Unified exchange records.
//!
//! Adapters translate each exchange's wire format into a flat JSON map using
//! a shared vocabulary of keys, so change detection and payload building do
//! not care which exchange the data came from.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Unified field names shared by all adapters.
pub mod fields {
    pub const SYMBOL: &str = "symbol";
    pub const ID: &str = "id";
    pub const ORDER: &str = "order";
    pub const SIDE: &str = "side";
    pub const STATUS: &str = "status";
    pub const PRICE: &str = "price";
    pub const AMOUNT: &str = "amount";
    pub const FILLED: &str = "filled";
    pub const CONTRACTS: &str = "contracts";
    pub const ENTRY_PRICE: &str = "entryPrice";
    pub const UNREALIZED_PNL: &str = "unrealizedPnl";
    pub const TIMESTAMP: &str = "timestamp";
    pub const TYPE: &str = "type";
}

/// Order statuses in the unified vocabulary.
pub mod status {
    pub const OPEN: &str = "open";
    pub const CLOSED: &str = "closed";
    pub const CANCELED: &str = "canceled";
}

/// One position, order, or trade as a unified key/value map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeRecord(Map<String, Value>);

impl ExchangeRecord {
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    #[must_use]
    pub const fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Reads a numeric field, accepting both JSON numbers and numeric strings.
    #[must_use]
    pub fn f64_field(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Reads an identifier that may be encoded as a string or a number.
    #[must_use]
    pub fn id_field(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        self.str_field(fields::SYMBOL)
    }

    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.id_field(fields::ID)
    }

    #[must_use]
    pub fn side(&self) -> Option<&str> {
        self.str_field(fields::SIDE)
    }

    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.str_field(fields::STATUS)
    }

    /// Open contract count; missing or malformed values count as zero.
    #[must_use]
    pub fn contracts(&self) -> f64 {
        self.f64_field(fields::CONTRACTS).unwrap_or(0.0)
    }

    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for ExchangeRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
