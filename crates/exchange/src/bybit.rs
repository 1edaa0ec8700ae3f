//! Bybit v5 unified-account adapter (USDT linear perpetuals).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use tradewatch_core::record::{fields, status};
use tradewatch_core::{
    AccountBalance, CurrencyBalance, ExchangeAdapter, ExchangeCredentials, ExchangeRecord,
    FetchError,
};

use crate::rest::{encode_query, parse_millis, parse_num, RestClient, RestConfig};
use crate::signing::bybit_signature;

/// Bybit production REST endpoint.
pub const BYBIT_BASE_URL: &str = "https://api.bybit.com";

const RECV_WINDOW: u64 = 5_000;
const CATEGORY: &str = "linear";
const SETTLE_COIN: &str = "USDT";

/// Return codes for invalid key, bad signature, and missing permission.
const AUTH_RET_CODES: [i64; 3] = [10003, 10004, 10005];

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ListResult<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    symbol: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    size: String,
    #[serde(default)]
    avg_price: String,
    #[serde(default)]
    unrealised_pnl: String,
    #[serde(default)]
    leverage: String,
    #[serde(default)]
    position_idx: i64,
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
    qty: String,
    #[serde(default)]
    cum_exec_qty: String,
    #[serde(default)]
    order_status: String,
    #[serde(default)]
    created_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExecution {
    exec_id: String,
    order_id: String,
    symbol: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    exec_price: String,
    #[serde(default)]
    exec_qty: String,
    #[serde(default)]
    exec_time: String,
}

#[derive(Debug, Deserialize)]
struct RawWallet {
    #[serde(default)]
    coin: Vec<RawCoin>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCoin {
    coin: String,
    #[serde(default)]
    wallet_balance: String,
    #[serde(default)]
    locked: String,
    #[serde(default, rename = "totalPositionIM")]
    total_position_im: String,
    #[serde(default, rename = "totalOrderIM")]
    total_order_im: String,
}

// =============================================================================
// Adapter
// =============================================================================

/// Read-only Bybit account view.
pub struct BybitAdapter {
    rest: RestClient,
    credentials: ExchangeCredentials,
}

impl std::fmt::Debug for BybitAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitAdapter")
            .field("rest", &self.rest)
            .field("api_key", &self.credentials.api_key)
            .finish_non_exhaustive()
    }
}

impl BybitAdapter {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: RestConfig, credentials: ExchangeCredentials) -> Result<Self, FetchError> {
        Ok(Self {
            rest: RestClient::new(config)?,
            credentials,
        })
    }

    async fn signed_get<T: DeserializeOwned>(
        &self,
        path: &str,
        pairs: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let query = encode_query(pairs);
        let timestamp = Utc::now().timestamp_millis();
        let signature = bybit_signature(
            self.credentials.api_secret.expose_secret(),
            timestamp,
            &self.credentials.api_key,
            RECV_WINDOW,
            &query,
        )?;

        let mut headers = HeaderMap::new();
        headers.insert("X-BAPI-API-KEY", header_value(&self.credentials.api_key)?);
        headers.insert("X-BAPI-TIMESTAMP", header_value(&timestamp.to_string())?);
        headers.insert("X-BAPI-SIGN", header_value(&signature)?);
        headers.insert("X-BAPI-RECV-WINDOW", header_value(&RECV_WINDOW.to_string())?);

        let envelope: Envelope<T> = self.rest.get(path, &query, headers).await?;
        unwrap_envelope(envelope)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, FetchError> {
    HeaderValue::from_str(value)
        .map_err(|e| FetchError::Authentication(format!("invalid header value: {e}")))
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, FetchError> {
    if envelope.ret_code != 0 {
        if AUTH_RET_CODES.contains(&envelope.ret_code) {
            return Err(FetchError::Authentication(envelope.ret_msg));
        }
        return Err(FetchError::exchange(envelope.ret_code.to_string(), envelope.ret_msg));
    }
    envelope
        .result
        .ok_or_else(|| FetchError::Decode("missing result".to_string()))
}

/// Maps a Bybit order status onto the unified vocabulary.
fn map_order_status(raw: &str) -> &'static str {
    match raw {
        "Filled" => status::CLOSED,
        "Cancelled" | "Rejected" | "Deactivated" | "PartiallyFilledCanceled" => status::CANCELED,
        _ => status::OPEN,
    }
}

fn map_position_side(raw: &RawPosition) -> &'static str {
    match raw.side.as_str() {
        "Buy" => "long",
        "Sell" => "short",
        _ => match raw.position_idx {
            1 => "long",
            2 => "short",
            _ => "net",
        },
    }
}

impl From<RawPosition> for ExchangeRecord {
    fn from(raw: RawPosition) -> Self {
        let side = map_position_side(&raw);
        Self::new()
            .with(fields::SYMBOL, raw.symbol)
            .with(fields::SIDE, side)
            .with(fields::CONTRACTS, parse_num(&raw.size))
            .with(fields::ENTRY_PRICE, parse_num(&raw.avg_price))
            .with(fields::UNREALIZED_PNL, parse_num(&raw.unrealised_pnl))
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
            .with(fields::AMOUNT, parse_num(&raw.qty))
            .with(fields::FILLED, parse_num(&raw.cum_exec_qty))
            .with(fields::STATUS, map_order_status(&raw.order_status))
            .with(fields::TIMESTAMP, parse_millis(&raw.created_time))
    }
}

impl From<RawExecution> for ExchangeRecord {
    fn from(raw: RawExecution) -> Self {
        Self::new()
            .with(fields::ID, raw.exec_id)
            .with(fields::ORDER, raw.order_id)
            .with(fields::SYMBOL, raw.symbol)
            .with(fields::SIDE, raw.side.to_lowercase())
            .with(fields::PRICE, parse_num(&raw.exec_price))
            .with(fields::AMOUNT, parse_num(&raw.exec_qty))
            .with(fields::TIMESTAMP, parse_millis(&raw.exec_time))
    }
}

fn parse_decimal(value: &str) -> Decimal {
    value.trim().parse().unwrap_or_default()
}

fn coin_balance(raw: &RawCoin) -> CurrencyBalance {
    let total = parse_decimal(&raw.wallet_balance);
    let used = parse_decimal(&raw.locked)
        + parse_decimal(&raw.total_position_im)
        + parse_decimal(&raw.total_order_im);
    let used = used.min(total);
    CurrencyBalance::new(total - used, used, total)
}

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
    fn exchange_id(&self) -> &str {
        "bybit"
    }

    async fn fetch_positions(&self) -> Result<Vec<ExchangeRecord>, FetchError> {
        let result: ListResult<RawPosition> = self
            .signed_get(
                "/v5/position/list",
                &[("category", CATEGORY.into()), ("settleCoin", SETTLE_COIN.into())],
            )
            .await?;
        Ok(result.list.into_iter().map(ExchangeRecord::from).collect())
    }

    async fn fetch_open_orders(&self) -> Result<Vec<ExchangeRecord>, FetchError> {
        let result: ListResult<RawOrder> = self
            .signed_get(
                "/v5/order/realtime",
                &[("category", CATEGORY.into()), ("settleCoin", SETTLE_COIN.into())],
            )
            .await?;
        Ok(result.list.into_iter().map(ExchangeRecord::from).collect())
    }

    async fn fetch_recent_trades(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ExchangeRecord>, FetchError> {
        let mut pairs = vec![("category", CATEGORY.to_string())];
        if let Some(since) = since {
            pairs.push(("startTime", since.timestamp_millis().to_string()));
        }
        let result: ListResult<RawExecution> = self.signed_get("/v5/execution/list", &pairs).await?;
        Ok(result.list.into_iter().map(ExchangeRecord::from).collect())
    }

    async fn fetch_balance(&self) -> Result<AccountBalance, FetchError> {
        let result: ListResult<RawWallet> = self
            .signed_get("/v5/account/wallet-balance", &[("accountType", "UNIFIED".into())])
            .await?;

        let mut balance = AccountBalance::new();
        for coin in result.list.iter().flat_map(|w| w.coin.iter()) {
            balance.insert(&coin.coin, coin_balance(coin));
        }
        Ok(balance)
    }
}
