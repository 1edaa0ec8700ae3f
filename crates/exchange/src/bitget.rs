//! Bitget v2 mix (USDT-M futures) adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use tradewatch_core::record::{fields, status};
use tradewatch_core::{
    AccountBalance, CurrencyBalance, ExchangeAdapter, ExchangeCredentials, ExchangeRecord,
    FetchError,
};

use crate::rest::{encode_query, parse_millis, parse_num, RestClient, RestConfig};
use crate::signing::bitget_signature;

/// Bitget production REST endpoint.
pub const BITGET_BASE_URL: &str = "https://api.bitget.com";

const PRODUCT_TYPE: &str = "USDT-FUTURES";
const MARGIN_COIN: &str = "USDT";
const SUCCESS_CODE: &str = "00000";

/// Body codes for unknown key, bad signature, and bad passphrase.
const AUTH_CODES: [&str; 4] = ["40006", "40009", "40012", "40037"];

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    symbol: String,
    #[serde(default)]
    hold_side: String,
    #[serde(default)]
    total: String,
    #[serde(default)]
    open_price_avg: String,
    #[serde(default, rename = "unrealizedPL")]
    unrealized_pl: String,
    #[serde(default)]
    leverage: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingOrders {
    #[serde(default)]
    entrusted_list: Option<Vec<RawOrder>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    order_id: String,
    symbol: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    order_type: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    size: String,
    #[serde(default)]
    base_volume: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    c_time: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Fills {
    #[serde(default)]
    fill_list: Option<Vec<RawFill>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFill {
    trade_id: String,
    order_id: String,
    symbol: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    base_volume: String,
    #[serde(default)]
    c_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAccount {
    margin_coin: String,
    #[serde(default)]
    available: String,
    #[serde(default)]
    locked: String,
    #[serde(default)]
    account_equity: String,
}

/// Read-only Bitget futures account view.
pub struct BitgetAdapter {
    rest: RestClient,
    api_key: String,
    api_secret: SecretString,
    passphrase: SecretString,
}

impl std::fmt::Debug for BitgetAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitgetAdapter")
            .field("rest", &self.rest)
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

impl BitgetAdapter {
    /// # Errors
    /// Returns an authentication error if the passphrase is missing, or a
    /// network error if the HTTP client cannot be built.
    pub fn new(config: RestConfig, credentials: ExchangeCredentials) -> Result<Self, FetchError> {
        let ExchangeCredentials {
            api_key,
            api_secret,
            passphrase,
        } = credentials;
        let passphrase = passphrase
            .ok_or_else(|| FetchError::Authentication("Bitget requires an API passphrase".into()))?;

        Ok(Self {
            rest: RestClient::new(config)?,
            api_key,
            api_secret,
            passphrase,
        })
    }

    async fn signed_get<T: DeserializeOwned + Default>(
        &self,
        path: &str,
        pairs: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let query = encode_query(pairs);
        let timestamp = Utc::now().timestamp_millis();
        let signature = bitget_signature(
            self.api_secret.expose_secret(),
            timestamp,
            "GET",
            path,
            &query,
            "",
        )?;

        let mut headers = HeaderMap::new();
        headers.insert("ACCESS-KEY", header_value(&self.api_key)?);
        headers.insert("ACCESS-SIGN", header_value(&signature)?);
        headers.insert("ACCESS-TIMESTAMP", header_value(&timestamp.to_string())?);
        headers.insert("ACCESS-PASSPHRASE", header_value(self.passphrase.expose_secret())?);
        headers.insert("locale", HeaderValue::from_static("en-US"));

        let envelope: Envelope<T> = self.rest.get(path, &query, headers).await?;
        if envelope.code != SUCCESS_CODE {
            if AUTH_CODES.contains(&envelope.code.as_str()) {
                return Err(FetchError::Authentication(envelope.msg));
            }
            return Err(FetchError::exchange(envelope.code, envelope.msg));
        }
        // Bitget answers `"data": null` for empty collections.
        Ok(envelope.data.unwrap_or_default())
    }
}

fn header_value(value: &str) -> Result<HeaderValue, FetchError> {
    HeaderValue::from_str(value)
        .map_err(|e| FetchError::Authentication(format!("invalid header value: {e}")))
}

fn map_order_status(raw: &str) -> &'static str {
    match raw {
        "filled" => status::CLOSED,
        "canceled" | "cancelled" => status::CANCELED,
        _ => status::OPEN,
    }
}

impl From<RawPosition> for ExchangeRecord {
    fn from(raw: RawPosition) -> Self {
        let side = match raw.hold_side.as_str() {
            "long" => "long",
            "short" => "short",
            _ => "net",
        };
        Self::new()
            .with(fields::SYMBOL, raw.symbol)
            .with(fields::SIDE, side)
            .with(fields::CONTRACTS, parse_num(&raw.total))
            .with(fields::ENTRY_PRICE, parse_num(&raw.open_price_avg))
            .with(fields::UNREALIZED_PNL, parse_num(&raw.unrealized_pl))
            .with("leverage", parse_num(&raw.leverage))
    }
}

impl From<RawOrder> for ExchangeRecord {
    fn from(raw: RawOrder) -> Self {
        Self::new()
            .with(fields::ID, raw.order_id)
            .with(fields::SYMBOL, raw.symbol)
            .with(fields::SIDE, raw.side.to_lowercase())
            .with(fields::TYPE, raw.order_type.to_lowercase())
            .with(fields::PRICE, parse_num(&raw.price))
            .with(fields::AMOUNT, parse_num(&raw.size))
            .with(fields::FILLED, parse_num(&raw.base_volume))
            .with(fields::STATUS, map_order_status(&raw.status))
            .with(fields::TIMESTAMP, parse_millis(&raw.c_time))
    }
}

impl From<RawFill> for ExchangeRecord {
    fn from(raw: RawFill) -> Self {
        Self::new()
            .with(fields::ID, raw.trade_id)
            .with(fields::ORDER, raw.order_id)
            .with(fields::SYMBOL, raw.symbol)
            .with(fields::SIDE, raw.side.to_lowercase())
            .with(fields::PRICE, parse_num(&raw.price))
            .with(fields::AMOUNT, parse_num(&raw.base_volume))
            .with(fields::TIMESTAMP, parse_millis(&raw.c_time))
    }
}

fn parse_decimal(value: &str) -> Decimal {
    value.trim().parse().unwrap_or_default()
}

#[async_trait]
impl ExchangeAdapter for BitgetAdapter {
    fn exchange_id(&self) -> &str {
        "bitget"
    }

    async fn fetch_positions(&self) -> Result<Vec<ExchangeRecord>, FetchError> {
        let data: Vec<RawPosition> = self
            .signed_get(
                "/api/v2/mix/position/all-position",
                &[("productType", PRODUCT_TYPE.into()), ("marginCoin", MARGIN_COIN.into())],
            )
            .await?;
        Ok(data.into_iter().map(ExchangeRecord::from).collect())
    }

    async fn fetch_open_orders(&self) -> Result<Vec<ExchangeRecord>, FetchError> {
        let data: PendingOrders = self
            .signed_get("/api/v2/mix/order/orders-pending", &[("productType", PRODUCT_TYPE.into())])
            .await?;
        Ok(data
            .entrusted_list
            .unwrap_or_default()
            .into_iter()
            .map(ExchangeRecord::from)
            .collect())
    }

    async fn fetch_recent_trades(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ExchangeRecord>, FetchError> {
        let mut pairs = vec![("productType", PRODUCT_TYPE.to_string())];
        if let Some(since) = since {
            pairs.push(("startTime", since.timestamp_millis().to_string()));
        }
        let data: Fills = self.signed_get("/api/v2/mix/order/fills", &pairs).await?;
        Ok(data
            .fill_list
            .unwrap_or_default()
            .into_iter()
            .map(ExchangeRecord::from)
            .collect())
    }

    async fn fetch_balance(&self) -> Result<AccountBalance, FetchError> {
        let data: Vec<RawAccount> = self
            .signed_get("/api/v2/mix/account/accounts", &[("productType", PRODUCT_TYPE.into())])
            .await?;

        let mut balance = AccountBalance::new();
        for account in &data {
            let free = parse_decimal(&account.available);
            let used = parse_decimal(&account.locked);
            let equity = parse_decimal(&account.account_equity);
            let total = if equity.is_zero() { free + used } else { equity };
            balance.insert(&account.margin_coin, CurrencyBalance::new(free, used, total));
        }
        Ok(balance)
    }
}
