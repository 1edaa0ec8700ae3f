//! Change events, activity log entries, and notification payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::balance::AccountBalance;
use crate::record::{fields, ExchangeRecord};

/// A detected state transition worth notifying about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PositionUpdate,
    NewOrder,
    OrderFilled,
    OrderCancelled,
    OrderUpdate,
}

impl EventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PositionUpdate => "position_update",
            Self::NewOrder => "new_order",
            Self::OrderFilled => "order_filled",
            Self::OrderCancelled => "order_cancelled",
            Self::OrderUpdate => "order_update",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activity types that are not change events.
pub mod activity {
    pub const POLL_START: &str = "poll_start";
    pub const POLL_COMPLETE: &str = "poll_complete";
    pub const POLL_ERROR: &str = "poll_error";
    pub const WEBHOOK_SENT: &str = "webhook_sent";
    pub const WEBHOOK_FAILED: &str = "webhook_failed";
    pub const CHAT_SENT: &str = "chat_sent";
    pub const CHAT_FAILED: &str = "chat_failed";
}

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub instance_id: i64,
    pub event_type: String,
    pub symbol: Option<String>,
    pub message: String,
    pub payload: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    #[must_use]
    pub fn new(instance_id: i64, event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            instance_id,
            event_type: event_type.into(),
            symbol: None,
            message: message.into(),
            payload: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Append-only record of a caught failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub instance_id: i64,
    pub error_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    #[must_use]
    pub fn new(instance_id: i64, error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            instance_id,
            error_type: error_type.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Notification body for one detected change.
///
/// Serializes to the flat webhook JSON: the common header fields, the
/// resource-specific fields inline, and `balance` when one was fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub event_type: EventType,
    pub symbol: String,
    pub strategy: String,
    pub timestamp: DateTime<Utc>,
    pub instance_id: i64,
    pub exchange: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<AccountBalance>,
}

/// Header fields shared by every payload built during one cycle.
#[derive(Debug, Clone)]
pub struct PayloadContext<'a> {
    pub instance_id: i64,
    pub exchange: &'a str,
    pub strategy: &'a str,
    pub timestamp: DateTime<Utc>,
}

impl EventPayload {
    /// Builds the payload for `event_type` from a unified exchange record.
    ///
    /// Trade executions (records carrying an `order` reference) report the
    /// parent order id, `status = "filled"`, and the trade id.
    #[must_use]
    pub fn from_record(event_type: EventType, record: &ExchangeRecord, ctx: &PayloadContext<'_>) -> Self {
        let mut out = Map::new();
        let mut put = |key: &str, value: Option<&Value>| {
            out.insert(key.to_string(), value.cloned().unwrap_or(Value::Null));
        };

        match event_type {
            EventType::PositionUpdate => {
                put("side", record.get(fields::SIDE));
                put("entry_price", record.get(fields::ENTRY_PRICE));
                put("quantity", record.get(fields::CONTRACTS));
                put("unrealized_pnl", record.get(fields::UNREALIZED_PNL));
            }
            EventType::OrderFilled if record.get(fields::ORDER).is_some() => {
                put("order_id", record.get(fields::ORDER));
                put("side", record.get(fields::SIDE));
                put("entry_price", record.get(fields::PRICE));
                put("quantity", record.get(fields::AMOUNT));
                put("status", Some(&Value::from("filled")));
                put("trade_id", record.get(fields::ID));
            }
            EventType::NewOrder
            | EventType::OrderFilled
            | EventType::OrderCancelled
            | EventType::OrderUpdate => {
                put("order_id", record.get(fields::ID));
                put("side", record.get(fields::SIDE));
                put("entry_price", record.get(fields::PRICE));
                put("quantity", record.get(fields::AMOUNT));
                put("status", record.get(fields::STATUS));
            }
        }

        Self {
            event_type,
            symbol: record.symbol().unwrap_or_default().to_string(),
            strategy: ctx.strategy.to_string(),
            timestamp: ctx.timestamp,
            instance_id: ctx.instance_id,
            exchange: ctx.exchange.to_string(),
            fields: out,
            balance: None,
        }
    }

    #[must_use]
    pub fn with_balance(mut self, balance: Option<AccountBalance>) -> Self {
        self.balance = balance;
        self
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    /// JSON body sent to webhooks and stored as activity payload.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
