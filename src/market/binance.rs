//! Binance spot REST client (batch-capable).

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::FetchError;

use super::client::{get_json, FetchStrategy, MarketDataClient};
use super::types::{ExchangeId, MarketCatalog, MarketInfo, Ticker};

/// Symbol entry from `/api/v3/exchangeInfo`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    is_spot_trading_allowed: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

/// Entry from `/api/v3/ticker/bookTicker`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookTicker {
    symbol: String,
    bid_price: Option<Decimal>,
    ask_price: Option<Decimal>,
}

/// Binance spot market-data client.
#[derive(Debug)]
pub struct BinanceClient {
    id: ExchangeId,
    http: reqwest::Client,
    base_url: String,
    /// Unified symbol -> native id.
    native: DashMap<String, String>,
    /// Native id -> unified symbol.
    unified: DashMap<String, String>,
}

impl BinanceClient {
    /// Create a client against `base_url` (e.g. `https://api.binance.com`).
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self {
            id: ExchangeId::new("binance"),
            http,
            base_url,
            native: DashMap::new(),
            unified: DashMap::new(),
        }
    }

    fn native_id(&self, symbol: &str) -> String {
        self.native
            .get(symbol)
            .map(|id| id.value().clone())
            .unwrap_or_else(|| symbol.replace(['/', '-', '_'], ""))
    }

    fn to_ticker(&self, raw: BookTicker) -> Ticker {
        let symbol = self
            .unified
            .get(&raw.symbol)
            .map(|s| s.value().clone())
            .unwrap_or(raw.symbol);
        Ticker {
            symbol,
            bid: raw.bid_price,
            ask: raw.ask_price,
        }
    }
}

fn catalog_from(info: ExchangeInfo) -> MarketCatalog {
    info.symbols
        .into_iter()
        .map(|s| {
            let mut market = MarketInfo::spot(&s.base_asset, &s.quote_asset, s.symbol);
            market.spot = s.is_spot_trading_allowed && s.status == "TRADING";
            (market.symbol.clone(), market)
        })
        .collect()
}

#[async_trait]
impl MarketDataClient for BinanceClient {
    fn exchange_id(&self) -> &ExchangeId {
        &self.id
    }

    fn capability(&self) -> FetchStrategy {
        FetchStrategy::Batch
    }

    #[instrument(skip(self))]
    async fn load_markets(&self) -> Result<MarketCatalog, FetchError> {
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let info: ExchangeInfo = get_json(&self.http, &url, &[]).await?;
        let catalog = catalog_from(info);

        self.native.clear();
        self.unified.clear();
        for market in catalog.values() {
            self.native.insert(market.symbol.clone(), market.id.clone());
            self.unified.insert(market.id.clone(), market.symbol.clone());
        }

        debug!(markets = catalog.len(), "Loaded Binance markets");
        Ok(catalog)
    }

    #[instrument(skip(self))]
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, FetchError> {
        let url = format!("{}/api/v3/ticker/bookTicker", self.base_url);
        let raw: BookTicker =
            get_json(&self.http, &url, &[("symbol", self.native_id(symbol))]).await?;
        Ok(self.to_ticker(raw))
    }

    #[instrument(skip(self, symbols), fields(count = symbols.len()))]
    async fn fetch_tickers(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Ticker>, FetchError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<String> = symbols.iter().map(|s| self.native_id(s)).collect();
        let ids = serde_json::to_string(&ids).map_err(|e| FetchError::Other(e.to_string()))?;

        let url = format!("{}/api/v3/ticker/bookTicker", self.base_url);
        let raw: Vec<BookTicker> = get_json(&self.http, &url, &[("symbols", ids)]).await?;

        Ok(raw
            .into_iter()
            .map(|entry| {
                let ticker = self.to_ticker(entry);
                (ticker.symbol.clone(), ticker)
            })
            .collect())
    }
}
