//! Market-data client abstraction and the REST client factory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use strum::{Display, EnumString};
use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::FetchError;

use super::binance::BinanceClient;
use super::coinbase::CoinbaseClient;
use super::types::{ExchangeId, MarketCatalog, Ticker};

/// How a poller fetches quotes from an exchange; fixed when the poller is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum FetchStrategy {
    /// One call returns tickers for many symbols.
    Batch,
    /// One call per symbol.
    Single,
}

/// A read-only market-data session with one exchange.
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    /// Exchange this client talks to.
    fn exchange_id(&self) -> &ExchangeId;

    /// Whether the exchange supports multi-symbol ticker requests.
    fn capability(&self) -> FetchStrategy;

    /// Load the exchange's market catalog.
    async fn load_markets(&self) -> Result<MarketCatalog, FetchError>;

    /// Fetch the ticker for one symbol.
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, FetchError>;

    /// Fetch tickers for many symbols at once, keyed by symbol.
    ///
    /// Symbols the exchange does not return are simply absent from the map.
    async fn fetch_tickers(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Ticker>, FetchError> {
        Err(FetchError::Other(format!(
            "{} does not support batch tickers ({} symbols requested)",
            self.exchange_id(),
            symbols.len()
        )))
    }
}

/// Builds clients for exchange ids.
pub trait ClientFactory: Send + Sync {
    /// Return a client, or `None` if the exchange is not supported.
    fn create(&self, exchange: &ExchangeId) -> Option<Arc<dyn MarketDataClient>>;
}

/// Factory for the built-in REST clients.
#[derive(Debug, Clone)]
pub struct RestClientFactory {
    http: reqwest::Client,
    binance_url: String,
    coinbase_url: String,
}

impl RestClientFactory {
    /// Create a factory sharing one HTTP connection pool.
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: build_http_client(Duration::from_millis(config.http_timeout_ms))?,
            binance_url: config.binance_api_url.trim_end_matches('/').to_string(),
            coinbase_url: config.coinbase_api_url.trim_end_matches('/').to_string(),
        })
    }

    /// Exchange ids this factory can build.
    pub fn supported() -> &'static [&'static str] {
        &["binance", "coinbase"]
    }
}

impl ClientFactory for RestClientFactory {
    fn create(&self, exchange: &ExchangeId) -> Option<Arc<dyn MarketDataClient>> {
        match exchange.as_str() {
            "binance" => Some(Arc::new(BinanceClient::new(
                self.http.clone(),
                self.binance_url.clone(),
            ))),
            "coinbase" => Some(Arc::new(CoinbaseClient::new(
                self.http.clone(),
                self.coinbase_url.clone(),
            ))),
            _ => None,
        }
    }
}

/// Build the shared HTTP client.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        // Disable Nagle's algorithm for small request/response pairs
        .tcp_nodelay(true)
        .tcp_keepalive(Duration::from_secs(30))
        .pool_idle_timeout(Duration::from_secs(90))
        .user_agent(concat!("spread-watch/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// GET a JSON document, classifying failures.
#[instrument(skip(http, query), level = "trace")]
pub(crate) async fn get_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    query: &[(&str, String)],
) -> Result<T, FetchError> {
    let response = http.get(url).query(query).send().await?;
    let status = response.status();

    if !status.is_success() {
        debug!(%status, url, "Request failed");
        return Err(FetchError::from_status(status, url));
    }

    Ok(response.json::<T>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn config() -> Config {
        envy::from_iter(Vec::<(String, String)>::new()).unwrap()
    }

    #[test]
    fn strategy_parses_from_string() {
        assert_eq!(FetchStrategy::from_str("batch").unwrap(), FetchStrategy::Batch);
        assert_eq!(FetchStrategy::from_str("single").unwrap(), FetchStrategy::Single);
        assert_eq!(FetchStrategy::Batch.to_string(), "batch");
    }

    #[test]
    fn factory_builds_known_exchanges_only() {
        let factory = RestClientFactory::new(&config()).unwrap();

        let binance = factory.create(&ExchangeId::new("binance")).unwrap();
        assert_eq!(binance.capability(), FetchStrategy::Batch);

        let coinbase = factory.create(&ExchangeId::new("coinbase")).unwrap();
        assert_eq!(coinbase.capability(), FetchStrategy::Single);

        assert!(factory.create(&ExchangeId::new("nope")).is_none());
    }
}
