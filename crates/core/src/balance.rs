//! Account balance types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Funds held in one currency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyBalance {
    pub free: Decimal,
    pub used: Decimal,
    pub total: Decimal,
}

impl CurrencyBalance {
    #[must_use]
    pub const fn new(free: Decimal, used: Decimal, total: Decimal) -> Self {
        Self { free, used, total }
    }
}

/// Per-currency balances reported by an exchange, keyed by currency code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountBalance {
    currencies: BTreeMap<String, CurrencyBalance>,
}

impl AccountBalance {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; currency codes are uppercased.
    #[must_use]
    pub fn with(mut self, currency: &str, balance: CurrencyBalance) -> Self {
        self.insert(currency, balance);
        self
    }

    pub fn insert(&mut self, currency: &str, balance: CurrencyBalance) {
        self.currencies.insert(currency.to_uppercase(), balance);
    }

    #[must_use]
    pub fn get(&self, currency: &str) -> Option<&CurrencyBalance> {
        self.currencies.get(&currency.to_uppercase())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.currencies.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.currencies.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CurrencyBalance)> {
        self.currencies.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Currencies worth showing to a human, most relevant first.
    ///
    /// The active coin and USDT lead when they hold a positive total; any
    /// other currency is listed only above the dust threshold of 0.01.
    #[must_use]
    pub fn summary(&self, active_coin: Option<&str>) -> Vec<(&str, &CurrencyBalance)> {
        let dust = Decimal::new(1, 2);
        let mut priority: Vec<String> = Vec::with_capacity(2);
        if let Some(coin) = active_coin.map(str::to_uppercase).filter(|c| !c.is_empty()) {
            priority.push(coin);
        }
        if !priority.iter().any(|c| c == "USDT") {
            priority.push("USDT".to_string());
        }

        let mut lines: Vec<(&str, &CurrencyBalance)> = priority
            .iter()
            .filter_map(|code| self.currencies.get_key_value(code))
            .filter(|(_, b)| b.total > Decimal::ZERO)
            .map(|(k, v)| (k.as_str(), v))
            .collect();

        for (code, balance) in &self.currencies {
            if !priority.contains(code) && balance.total > dust {
                lines.push((code.as_str(), balance));
            }
        }
        lines
    }
}

/// A stored balance observation for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub instance_id: i64,
    pub balance: AccountBalance,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bal(total: Decimal) -> CurrencyBalance {
        CurrencyBalance::new(total, Decimal::ZERO, total)
    }

    #[test]
    fn test_summary_orders_active_coin_then_usdt() {
        let balance = AccountBalance::new()
            .with("ada", bal(dec!(5)))
            .with("usdt", bal(dec!(100)))
            .with("xrp", bal(dec!(250)));

        let codes: Vec<&str> = balance.summary(Some("XRP")).iter().map(|(c, _)| *c).collect();
        assert_eq!(codes, vec!["XRP", "USDT", "ADA"]);
    }

    #[test]
    fn test_summary_hides_dust() {
        let balance = AccountBalance::new()
            .with("USDT", bal(dec!(10)))
            .with("SHIB", bal(dec!(0.005)));

        let codes: Vec<&str> = balance.summary(None).iter().map(|(c, _)| *c).collect();
        assert_eq!(codes, vec!["USDT"]);
    }

    #[test]
    fn test_summary_keeps_small_active_coin() {
        let balance = AccountBalance::new().with("BTC", bal(dec!(0.001)));
        let summary = balance.summary(Some("btc"));
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].0, "BTC");
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let balance = AccountBalance::new().with("USDT", CurrencyBalance::new(dec!(1), dec!(2), dec!(3)));
        let value = serde_json::to_value(&balance).unwrap();
        assert_eq!(value["USDT"]["total"], serde_json::json!("3"));
    }
}
