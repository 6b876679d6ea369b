//! Mock exchange client for tests.
//!
//! Serves a fixed catalog and mutable tickers without network access, with
//! failure injection for each client call.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::FetchError;

use super::client::{ClientFactory, FetchStrategy, MarketDataClient};
use super::types::{ExchangeId, MarketCatalog, MarketInfo, Ticker};

/// Configuration for mock client behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Simulated latency per call in milliseconds.
    pub latency_ms: u64,
}

#[derive(Debug, Default)]
struct MockState {
    markets: MarketCatalog,
    tickers: HashMap<String, Ticker>,
    failing_loads: u32,
    batch_failure: Option<FetchError>,
    ticker_failures: HashMap<String, FetchError>,
    omitted: HashSet<String>,
}

/// Mock market-data client.
#[derive(Debug)]
pub struct MockExchangeClient {
    id: ExchangeId,
    strategy: FetchStrategy,
    config: MockConfig,
    state: Mutex<MockState>,
    load_calls: AtomicU64,
    ticker_calls: AtomicU64,
    batch_calls: AtomicU64,
}

impl MockExchangeClient {
    /// Start building a mock for `exchange`.
    pub fn builder(exchange: &str) -> MockExchangeClientBuilder {
        MockExchangeClientBuilder::new(exchange)
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
    }

    /// Set or replace the ticker for `symbol`.
    pub fn set_ticker(&self, symbol: &str, bid: Option<Decimal>, ask: Option<Decimal>) {
        self.state().tickers.insert(
            symbol.to_string(),
            Ticker {
                symbol: symbol.to_string(),
                bid,
                ask,
            },
        );
    }

    /// Make the next `count` catalog loads fail.
    pub fn fail_next_loads(&self, count: u32) {
        self.state().failing_loads = count;
    }

    /// Make batch calls fail with `error` until cleared with `None`.
    pub fn fail_batch(&self, error: Option<FetchError>) {
        self.state().batch_failure = error;
    }

    /// Make single calls for `symbol` fail with `error`.
    pub fn fail_ticker(&self, symbol: &str, error: FetchError) {
        self.state()
            .ticker_failures
            .insert(symbol.to_string(), error);
    }

    /// Leave `symbol` out of batch responses.
    pub fn omit_from_batch(&self, symbol: &str) {
        self.state().omitted.insert(symbol.to_string());
    }

    /// Number of catalog loads attempted.
    pub fn load_calls(&self) -> u64 {
        self.load_calls.load(Ordering::SeqCst)
    }

    /// Number of single-ticker calls made.
    pub fn ticker_calls(&self) -> u64 {
        self.ticker_calls.load(Ordering::SeqCst)
    }

    /// Number of batch calls made.
    pub fn batch_calls(&self) -> u64 {
        self.batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataClient for MockExchangeClient {
    fn exchange_id(&self) -> &ExchangeId {
        &self.id
    }

    fn capability(&self) -> FetchStrategy {
        self.strategy
    }

    async fn load_markets(&self) -> Result<MarketCatalog, FetchError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let mut state = self.state();
        if state.failing_loads > 0 {
            state.failing_loads -= 1;
            return Err(FetchError::Unavailable("mock catalog load failure".into()));
        }
        Ok(state.markets.clone())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, FetchError> {
        self.ticker_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let state = self.state();
        if let Some(err) = state.ticker_failures.get(symbol) {
            return Err(err.clone());
        }
        state
            .tickers
            .get(symbol)
            .cloned()
            .ok_or_else(|| FetchError::Other(format!("unknown symbol {symbol}")))
    }

    async fn fetch_tickers(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Ticker>, FetchError> {
        if self.strategy == FetchStrategy::Single {
            return Err(FetchError::Other("mock does not support batch".into()));
        }
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let state = self.state();
        if let Some(err) = &state.batch_failure {
            return Err(err.clone());
        }
        Ok(symbols
            .iter()
            .filter(|s| !state.omitted.contains(*s))
            .filter_map(|s| state.tickers.get(s).map(|t| (s.clone(), t.clone())))
            .collect())
    }
}

/// Builder for [`MockExchangeClient`].
#[derive(Debug)]
pub struct MockExchangeClientBuilder {
    id: ExchangeId,
    strategy: FetchStrategy,
    config: MockConfig,
    state: MockState,
}

impl MockExchangeClientBuilder {
    /// Create a builder for a batch-capable mock with no markets.
    pub fn new(exchange: &str) -> Self {
        Self {
            id: ExchangeId::new(exchange),
            strategy: FetchStrategy::Batch,
            config: MockConfig::default(),
            state: MockState::default(),
        }
    }

    /// Set the reported fetch capability.
    pub fn strategy(mut self, strategy: FetchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set simulated per-call latency.
    pub fn latency_ms(mut self, latency_ms: u64) -> Self {
        self.config.latency_ms = latency_ms;
        self
    }

    /// List a spot market `BASE/QUOTE`.
    pub fn spot_market(mut self, base: &str, quote: &str) -> Self {
        let market = MarketInfo::spot(base, quote, format!("{base}{quote}"));
        self.state.markets.insert(market.symbol.clone(), market);
        self
    }

    /// List an arbitrary market.
    pub fn market(mut self, market: MarketInfo) -> Self {
        self.state.markets.insert(market.symbol.clone(), market);
        self
    }

    /// List a spot market and give it a ticker.
    pub fn quote(self, base: &str, quote: &str, bid: Decimal, ask: Decimal) -> Self {
        let symbol = format!("{base}/{quote}");
        self.spot_market(base, quote).ticker(&symbol, Some(bid), Some(ask))
    }

    /// Set a ticker for a symbol.
    pub fn ticker(mut self, symbol: &str, bid: Option<Decimal>, ask: Option<Decimal>) -> Self {
        self.state.tickers.insert(
            symbol.to_string(),
            Ticker {
                symbol: symbol.to_string(),
                bid,
                ask,
            },
        );
        self
    }

    /// Build the mock.
    pub fn build(self) -> MockExchangeClient {
        MockExchangeClient {
            id: self.id,
            strategy: self.strategy,
            config: self.config,
            state: Mutex::new(self.state),
            load_calls: AtomicU64::new(0),
            ticker_calls: AtomicU64::new(0),
            batch_calls: AtomicU64::new(0),
        }
    }
}

/// Factory handing out pre-built mock clients.
#[derive(Debug, Default, Clone)]
pub struct MockClientFactory {
    clients: HashMap<ExchangeId, Arc<MockExchangeClient>>,
}

impl MockClientFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under its own exchange id.
    pub fn with_client(mut self, client: Arc<MockExchangeClient>) -> Self {
        self.clients.insert(client.exchange_id().clone(), client);
        self
    }
}

impl ClientFactory for MockClientFactory {
    fn create(&self, exchange: &ExchangeId) -> Option<Arc<dyn MarketDataClient>> {
        self.clients
            .get(exchange)
            .map(|client| Arc::clone(client) as Arc<dyn MarketDataClient>)
    }
}
