//! Read-only exchange adapters.
//!
//! Each exchange family implements [`tradewatch_core::ExchangeAdapter`] and
//! translates its wire format into unified records. [`AdapterFactory`] picks
//! the implementation by exchange identifier.

pub mod bitget;
pub mod bybit;
pub mod factory;
pub mod rest;
mod signing;

pub use bitget::{BitgetAdapter, BITGET_BASE_URL};
pub use bybit::{BybitAdapter, BYBIT_BASE_URL};
pub use factory::{AdapterConstructor, AdapterFactory, FactoryAdapterSource};
pub use rest::RestConfig;
