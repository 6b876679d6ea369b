//! Exchange market data.
//!
//! This module handles:
//! - Asset/exchange identities and ticker types
//! - The market-data client trait and REST implementations
//! - Per-exchange symbol resolution
//! - Mock client for testing

pub mod binance;
pub mod client;
pub mod coinbase;
pub mod mock;
pub mod registry;
pub mod types;

pub use client::{ClientFactory, FetchStrategy, MarketDataClient, RestClientFactory};
pub use mock::{MockClientFactory, MockExchangeClient, MockExchangeClientBuilder};
pub use registry::{MarketRegistry, QUOTE_SUFFIXES};
pub use types::{Asset, ExchangeId, MarketCatalog, MarketInfo, ResolvedSymbol, Ticker};
