//! Coinbase Exchange REST client (single-symbol tickers only).

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::FetchError;

use super::client::{get_json, FetchStrategy, MarketDataClient};
use super::types::{ExchangeId, MarketCatalog, MarketInfo, Ticker};

#[derive(Debug, Clone, Deserialize)]
struct Product {
    id: String,
    base_currency: String,
    quote_currency: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    trading_disabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ProductTicker {
    bid: Option<Decimal>,
    ask: Option<Decimal>,
}

/// Coinbase Exchange market-data client.
#[derive(Debug)]
pub struct CoinbaseClient {
    id: ExchangeId,
    http: reqwest::Client,
    base_url: String,
    /// Unified symbol -> product id.
    products: DashMap<String, String>,
}

impl CoinbaseClient {
    /// Create a client against `base_url` (e.g. `https://api.exchange.coinbase.com`).
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self {
            id: ExchangeId::new("coinbase"),
            http,
            base_url,
            products: DashMap::new(),
        }
    }

    fn product_id(&self, symbol: &str) -> String {
        self.products
            .get(symbol)
            .map(|id| id.value().clone())
            .unwrap_or_else(|| symbol.replace('/', "-"))
    }
}

fn catalog_from(products: Vec<Product>) -> MarketCatalog {
    products
        .into_iter()
        .filter(|p| p.status == "online" && !p.trading_disabled)
        .map(|p| {
            let market = MarketInfo::spot(&p.base_currency, &p.quote_currency, p.id);
            (market.symbol.clone(), market)
        })
        .collect()
}

#[async_trait]
impl MarketDataClient for CoinbaseClient {
    fn exchange_id(&self) -> &ExchangeId {
        &self.id
    }

    fn capability(&self) -> FetchStrategy {
        FetchStrategy::Single
    }

    #[instrument(skip(self))]
    async fn load_markets(&self) -> Result<MarketCatalog, FetchError> {
        let url = format!("{}/products", self.base_url);
        let products: Vec<Product> = get_json(&self.http, &url, &[]).await?;
        let catalog = catalog_from(products);

        self.products.clear();
        for market in catalog.values() {
            self.products
                .insert(market.symbol.clone(), market.id.clone());
        }

        debug!(markets = catalog.len(), "Loaded Coinbase products");
        Ok(catalog)
    }

    #[instrument(skip(self))]
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, FetchError> {
        let url = format!("{}/products/{}/ticker", self.base_url, self.product_id(symbol));
        let raw: ProductTicker = get_json(&self.http, &url, &[]).await?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            bid: raw.bid,
            ask: raw.ask,
        })
    }
}
