//! Adapter construction keyed on exchange identifier.
//!
//! Adding an exchange means registering one more constructor; pollers never
//! branch on the exchange name.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use tradewatch_core::{
    AdapterSource, CredentialStore, ExchangeAdapter, ExchangeConfig, ExchangeCredentials,
    FetchError, MonitoredInstance,
};

use crate::bitget::BitgetAdapter;
use crate::bybit::BybitAdapter;
use crate::rest::RestConfig;

/// Builds an adapter from credentials and the `[exchange]` config section.
pub type AdapterConstructor =
    fn(ExchangeCredentials, &ExchangeConfig) -> Result<Box<dyn ExchangeAdapter>, FetchError>;

/// Registry of adapter constructors.
#[derive(Clone)]
pub struct AdapterFactory {
    constructors: BTreeMap<String, AdapterConstructor>,
}

impl std::fmt::Debug for AdapterFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterFactory")
            .field("exchanges", &self.supported())
            .finish()
    }
}

impl Default for AdapterFactory {
    fn default() -> Self {
        let mut factory = Self::empty();
        factory.register("bybit", build_bybit);
        factory.register("bitget", build_bitget);
        factory
    }
}

impl AdapterFactory {
    /// A factory with no exchanges registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registers `constructor` under `exchange_id`, replacing any previous one.
    pub fn register(&mut self, exchange_id: &str, constructor: AdapterConstructor) {
        self.constructors
            .insert(exchange_id.trim().to_lowercase(), constructor);
    }

    /// Registered exchange identifiers, sorted.
    #[must_use]
    pub fn supported(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Builds the adapter for `exchange_id` (case-insensitive).
    ///
    /// # Errors
    /// Returns `UnsupportedExchange` for an unknown identifier, or whatever
    /// the constructor reports.
    pub fn build(
        &self,
        exchange_id: &str,
        credentials: ExchangeCredentials,
        config: &ExchangeConfig,
    ) -> Result<Box<dyn ExchangeAdapter>, FetchError> {
        let key = exchange_id.trim().to_lowercase();
        let constructor = self
            .constructors
            .get(&key)
            .ok_or_else(|| FetchError::UnsupportedExchange(exchange_id.to_string()))?;
        constructor(credentials, config)
    }
}

fn build_bybit(
    credentials: ExchangeCredentials,
    config: &ExchangeConfig,
) -> Result<Box<dyn ExchangeAdapter>, FetchError> {
    let rest = RestConfig::from_exchange_config(&config.bybit_base_url, config);
    Ok(Box::new(BybitAdapter::new(rest, credentials)?))
}

fn build_bitget(
    credentials: ExchangeCredentials,
    config: &ExchangeConfig,
) -> Result<Box<dyn ExchangeAdapter>, FetchError> {
    let rest = RestConfig::from_exchange_config(&config.bitget_base_url, config);
    Ok(Box::new(BitgetAdapter::new(rest, credentials)?))
}

/// [`AdapterSource`] that looks credentials up in a [`CredentialStore`] and
/// builds a fresh adapter through an [`AdapterFactory`].
pub struct FactoryAdapterSource {
    factory: AdapterFactory,
    credentials: Arc<dyn CredentialStore>,
    config: ExchangeConfig,
}

impl FactoryAdapterSource {
    #[must_use]
    pub fn new(
        factory: AdapterFactory,
        credentials: Arc<dyn CredentialStore>,
        config: ExchangeConfig,
    ) -> Self {
        Self {
            factory,
            credentials,
            config,
        }
    }
}

#[async_trait]
impl AdapterSource for FactoryAdapterSource {
    async fn adapter_for(
        &self,
        instance: &MonitoredInstance,
    ) -> Result<Box<dyn ExchangeAdapter>, FetchError> {
        let credentials = self
            .credentials
            .credentials(instance.id)
            .await
            .map_err(|e| {
                let message = format!("credential lookup failed: {e}");
                if e.is_transient() {
                    FetchError::Network(message)
                } else {
                    FetchError::Authentication(message)
                }
            })?
            .ok_or_else(|| {
                FetchError::Authentication(format!("no API credentials for instance {}", instance.id))
            })?;

        debug!(instance_id = instance.id, exchange = %instance.exchange, "Building exchange adapter");
        self.factory.build(&instance.exchange, credentials, &self.config)
    }
}
