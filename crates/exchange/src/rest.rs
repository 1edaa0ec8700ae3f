//! Shared REST plumbing: timeout-bounded HTTP client, rate limiting, and
//! status handling. Signing is left to each exchange adapter.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tradewatch_core::{ExchangeConfig, FetchError};

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Connection settings for one exchange REST API.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base URL without trailing slash.
    pub base_url: String,

    /// Per-request timeout.
    pub timeout: Duration,

    /// Requests per second allowed by the local limiter.
    pub requests_per_second: NonZeroU32,
}

impl RestConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(10),
            requests_per_second: nonzero!(10u32),
        }
    }

    /// Builds a config from the `[exchange]` section for `base_url`.
    #[must_use]
    pub fn from_exchange_config(base_url: &str, config: &ExchangeConfig) -> Self {
        Self::new(base_url)
            .with_timeout(config.request_timeout())
            .with_rate_limit(NonZeroU32::new(config.requests_per_second).unwrap_or(nonzero!(10u32)))
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_second: NonZeroU32) -> Self {
        self.requests_per_second = requests_per_second;
        self
    }
}

/// Rate-limited HTTP client bound to one base URL.
pub(crate) struct RestClient {
    config: RestConfig,
    http: Client,
    rate_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.config.base_url)
            .field("timeout", &self.config.timeout)
            .finish_non_exhaustive()
    }
}

impl RestClient {
    pub(crate) fn new(config: RestConfig) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {e}")))?;

        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(
            config.requests_per_second,
        )));

        Ok(Self {
            config,
            http,
            rate_limiter,
        })
    }

    /// Signed GET of `path?query`, decoding the body as `T`.
    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
        headers: HeaderMap,
    ) -> Result<T, FetchError> {
        self.rate_limiter.until_ready().await;

        let url = if query.is_empty() {
            format!("{}{}", self.config.base_url, path)
        } else {
            format!("{}{}?{}", self.config.base_url, path, query)
        };

        tracing::debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .headers(headers)
            .send()
            .await
            .map_err(map_reqwest)?;

        Self::handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, FetchError> {
        let status = response.status();

        if status.as_u16() == 401 || status.as_u16() == 403 {
            let text = response.text().await.unwrap_or_default();
            return Err(FetchError::Authentication(format!("HTTP {status}: {text}")));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(FetchError::api(status.as_u16(), text));
        }

        let body = response.text().await.map_err(map_reqwest)?;
        serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

/// Maps transport failures onto the fetch error taxonomy.
pub(crate) fn map_reqwest(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(err.to_string())
    } else if err.is_connect() {
        FetchError::Network(format!("connection failed: {err}"))
    } else if err.is_decode() {
        FetchError::Decode(err.to_string())
    } else {
        FetchError::Network(err.to_string())
    }
}

/// URL-encodes query pairs in the given order.
///
/// Both exchanges sign the exact query string sent, so the order here is
/// the order on the wire.
pub(crate) fn encode_query(pairs: &[(&str, String)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Parses an exchange numeric string; blanks and garbage become `None`.
pub(crate) fn parse_num(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse().ok()
}

/// Parses a millisecond epoch string.
pub(crate) fn parse_millis(value: &str) -> Option<i64> {
    value.trim().parse().ok()
}
