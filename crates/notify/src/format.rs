//! Plain-text rendering of event payloads for chat sinks.

use std::fmt::Write;

use serde_json::Value;
use tradewatch_core::{EventPayload, EventType};

fn headline(event_type: EventType) -> &'static str {
    match event_type {
        EventType::PositionUpdate => "Position update",
        EventType::NewOrder => "New order",
        EventType::OrderFilled => "Order filled",
        EventType::OrderCancelled => "Order cancelled",
        EventType::OrderUpdate => "Order update",
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Renders `payload` as a short message.
///
/// The balance block lists the active coin first, then USDT, then any other
/// currency above dust.
#[must_use]
pub fn render_message(payload: &EventPayload, instance_name: &str, active_coin: Option<&str>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} | {}", headline(payload.event_type), instance_name);
    let _ = writeln!(out, "Symbol: {}", payload.symbol);
    let _ = writeln!(out, "Strategy: {}", payload.strategy);

    for (label, key) in [
        ("Side", "side"),
        ("Order", "order_id"),
        ("Price", "entry_price"),
        ("Quantity", "quantity"),
        ("Status", "status"),
        ("Unrealized PnL", "unrealized_pnl"),
    ] {
        if let Some(value) = payload.field(key) {
            let _ = writeln!(out, "{label}: {}", display(value));
        }
    }

    if let Some(balance) = &payload.balance {
        let lines = balance.summary(active_coin);
        if !lines.is_empty() {
            out.push_str("\nBalance:\n");
            for (currency, amounts) in lines {
                let _ = writeln!(
                    out,
                    "  {currency}: {} (free {}, used {})",
                    amounts.total.normalize(),
                    amounts.free.normalize(),
                    amounts.used.normalize()
                );
            }
        }
    }

    let _ = write!(out, "{}", payload.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    out
}
