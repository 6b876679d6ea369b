//! One polling task per exchange.
//!
//! A poller owns its exchange session and [`MarketRegistry`]. Every cycle it
//! resolves the asset universe, fetches tickers with the strategy chosen at
//! construction, and emits exactly one [`PriceEvent::PriceUpdate`] per asset
//! (fewer only when stop is requested mid-way through a single-symbol cycle).
//! Fetch failures become failure quotes; they never end the loop.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use strum::Display;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::market::{
    Asset, ExchangeId, FetchStrategy, MarketDataClient, MarketRegistry, ResolvedSymbol,
};
use crate::metrics;

use super::events::{ErrorKind, EventSender, PriceEvent, Quote, SessionId};

/// Poller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum PollerState {
    /// Built, not yet running.
    Uninitialized,
    /// Loading the market catalog for the first time.
    Initializing,
    /// Cycling. Reached even when the first catalog load fails.
    Active,
    /// Loop exited.
    Stopped,
}

/// Timing for one poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerSettings {
    /// Time between cycle starts.
    pub interval: Duration,
    /// Nap granularity while waiting for the next cycle.
    pub tick: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            tick: Duration::from_millis(100),
        }
    }
}

/// What one cycle emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Quotes with prices.
    pub succeeded: usize,
    /// Failure quotes.
    pub failed: usize,
}

impl CycleSummary {
    /// Total events emitted.
    pub fn emitted(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Polls one exchange for the whole asset universe.
pub struct Poller {
    exchange: ExchangeId,
    session: SessionId,
    client: Arc<dyn MarketDataClient>,
    strategy: FetchStrategy,
    assets: Arc<[Asset]>,
    settings: PollerSettings,
    registry: Option<MarketRegistry>,
    events: EventSender,
    stop: Arc<AtomicBool>,
    refresh: Arc<Notify>,
    state: watch::Sender<PollerState>,
}

impl Poller {
    /// Create a poller. `strategy` is fixed for its lifetime.
    pub fn new(
        session: SessionId,
        client: Arc<dyn MarketDataClient>,
        strategy: FetchStrategy,
        assets: Arc<[Asset]>,
        settings: PollerSettings,
        events: EventSender,
    ) -> Self {
        let (state, _) = watch::channel(PollerState::Uninitialized);
        Self {
            exchange: client.exchange_id().clone(),
            session,
            client,
            strategy,
            assets,
            settings,
            registry: None,
            events,
            stop: Arc::new(AtomicBool::new(false)),
            refresh: Arc::new(Notify::new()),
            state,
        }
    }

    /// Exchange polled.
    pub fn exchange(&self) -> &ExchangeId {
        &self.exchange
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    /// Start the polling loop on the runtime.
    pub fn spawn(self) -> PollerHandle {
        let exchange = self.exchange.clone();
        let session = self.session;
        let stop = Arc::clone(&self.stop);
        let refresh = Arc::clone(&self.refresh);
        let state = self.state.subscribe();

        PollerHandle {
            exchange,
            session,
            stop,
            refresh,
            state,
            task: tokio::spawn(self.run()),
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || self.events.is_closed()
    }

    async fn run(mut self) {
        info!(
            exchange = %self.exchange,
            session = self.session,
            strategy = %self.strategy,
            interval_ms = duration_ms(self.settings.interval),
            "Poller started"
        );

        while !self.stop_requested() {
            let cycle_start = Instant::now();
            let summary = self.run_cycle().await;
            debug!(
                exchange = %self.exchange,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "Cycle complete"
            );
            self.wait_for_next_cycle(cycle_start).await;
        }

        self.state.send_replace(PollerState::Stopped);
        info!(exchange = %self.exchange, session = self.session, "Poller stopped");
    }

    /// Nap until `cycle_start + interval`, waking early on stop or refresh.
    async fn wait_for_next_cycle(&self, cycle_start: Instant) {
        let deadline = cycle_start + self.settings.interval;
        loop {
            if self.stop_requested() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let nap = (deadline - now).min(self.settings.tick);
            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                _ = self.refresh.notified() => {
                    debug!(exchange = %self.exchange, "Woken early");
                    return;
                }
            }
        }
    }

    /// Run one resolve-fetch-emit cycle.
    #[instrument(skip(self), fields(exchange = %self.exchange))]
    pub async fn run_cycle(&mut self) -> CycleSummary {
        let _timer = metrics::timer_poll_cycle(&self.exchange);
        let mut summary = CycleSummary::default();

        if !self.ensure_registry().await {
            for asset in self.assets.iter() {
                self.emit(
                    asset,
                    Quote::failure(ErrorKind::InitializationFailed, None),
                    &mut summary,
                );
            }
            return summary;
        }

        let (resolved, unresolved) = self.resolve_assets();
        for asset in &unresolved {
            self.emit(asset, Quote::failure(ErrorKind::NoMarket, None), &mut summary);
        }

        if resolved.is_empty() {
            return summary;
        }

        match self.strategy {
            FetchStrategy::Batch => self.fetch_batch(&resolved, &mut summary).await,
            FetchStrategy::Single => self.fetch_each(&resolved, &mut summary).await,
        }
        summary
    }

    /// Load the catalog if it is not loaded yet. Returns whether it is available.
    async fn ensure_registry(&mut self) -> bool {
        if self.registry.is_some() {
            return true;
        }

        if self.state() == PollerState::Uninitialized {
            self.state.send_replace(PollerState::Initializing);
        }

        let loaded = match self.client.load_markets().await {
            Ok(catalog) => {
                info!(
                    exchange = %self.exchange,
                    markets = catalog.len(),
                    "Market catalog loaded"
                );
                self.registry = Some(MarketRegistry::new(self.exchange.clone(), catalog));
                true
            }
            Err(err) => {
                warn!(exchange = %self.exchange, error = %err, "Market catalog load failed");
                metrics::inc_catalog_load_failures(&self.exchange);
                false
            }
        };

        if self.state() != PollerState::Active {
            self.state.send_replace(PollerState::Active);
        }
        loaded
    }

    fn resolve_assets(&mut self) -> (Vec<ResolvedSymbol>, Vec<Asset>) {
        let mut resolved = Vec::with_capacity(self.assets.len());
        let mut unresolved = Vec::new();

        let Some(registry) = self.registry.as_mut() else {
            return (resolved, self.assets.to_vec());
        };
        for asset in self.assets.iter() {
            match registry.resolve(asset) {
                Some(symbol) => resolved.push(symbol),
                None => unresolved.push(asset.clone()),
            }
        }
        (resolved, unresolved)
    }

    async fn fetch_batch(&self, resolved: &[ResolvedSymbol], summary: &mut CycleSummary) {
        let mut symbols: Vec<String> = resolved.iter().map(|r| r.symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();

        let started = Instant::now();
        let result = self.client.fetch_tickers(&symbols).await;
        let latency_ms = elapsed_ms(started);

        match result {
            Ok(tickers) => {
                metrics::record_fetch_latency(&self.exchange, latency_ms);
                for target in resolved {
                    let quote = match tickers.get(&target.symbol) {
                        Some(ticker) => Quote::success(ticker, &target.symbol, latency_ms),
                        None => Quote::failure(ErrorKind::MissingInBatch, Some(&target.symbol)),
                    };
                    self.emit(&target.asset, quote, summary);
                }
                let extra = tickers.len().saturating_sub(
                    symbols
                        .iter()
                        .filter(|s| tickers.contains_key(*s))
                        .count(),
                );
                if extra > 0 {
                    debug!(exchange = %self.exchange, extra, "Ignored unrequested tickers");
                }
            }
            Err(err) => {
                let kind = ErrorKind::from(&err);
                warn!(
                    exchange = %self.exchange,
                    error = %err,
                    kind = %kind,
                    symbols = symbols.len(),
                    "Batch fetch failed"
                );
                for target in resolved {
                    self.emit(
                        &target.asset,
                        Quote::failure(kind, Some(&target.symbol)),
                        summary,
                    );
                }
            }
        }
    }

    async fn fetch_each(&self, resolved: &[ResolvedSymbol], summary: &mut CycleSummary) {
        let mut seen = HashSet::new();
        for target in resolved {
            if self.stop_requested() {
                debug!(exchange = %self.exchange, "Stop requested mid-cycle");
                return;
            }
            if !seen.insert(target.asset.clone()) {
                continue;
            }

            let started = Instant::now();
            let result = self.client.fetch_ticker(&target.symbol).await;
            let latency_ms = elapsed_ms(started);

            let quote = match result {
                Ok(ticker) => {
                    metrics::record_fetch_latency(&self.exchange, latency_ms);
                    Quote::success(&ticker, &target.symbol, latency_ms)
                }
                Err(err) => {
                    let kind = ErrorKind::from(&err);
                    warn!(
                        exchange = %self.exchange,
                        symbol = %target.symbol,
                        error = %err,
                        kind = %kind,
                        "Ticker fetch failed"
                    );
                    Quote::failure(kind, Some(&target.symbol))
                }
            };
            self.emit(&target.asset, quote, summary);
        }
    }

    fn emit(&self, asset: &Asset, quote: Quote, summary: &mut CycleSummary) {
        if quote.error.is_none() {
            summary.succeeded += 1;
        } else {
            summary.failed += 1;
        }
        metrics::inc_quotes_emitted(&self.exchange, quote.error);

        let event = PriceEvent::PriceUpdate {
            exchange: self.exchange.clone(),
            session: self.session,
            asset: asset.clone(),
            quote,
        };
        if self.events.send(event).is_err() {
            debug!(exchange = %self.exchange, "Event channel closed");
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    duration_ms(started.elapsed())
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// How a poller ended when joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Exited within the timeout.
    Stopped,
    /// Task panicked or was cancelled.
    Failed(String),
    /// Missed the timeout; left running detached.
    Abandoned,
}

/// Control handle for a spawned poller.
#[derive(Debug)]
pub struct PollerHandle {
    exchange: ExchangeId,
    session: SessionId,
    stop: Arc<AtomicBool>,
    refresh: Arc<Notify>,
    state: watch::Receiver<PollerState>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Exchange polled.
    pub fn exchange(&self) -> &ExchangeId {
        &self.exchange
    }

    /// Session of the running poller.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    /// Ask the poller to stop; it exits at its next stop check.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.refresh.notify_one();
    }

    /// Start the next cycle now instead of at the interval boundary.
    pub fn force_refresh(&self) {
        self.refresh.notify_one();
    }

    /// Wait up to `timeout` for the task to exit. On timeout the task is
    /// detached, not cancelled.
    pub async fn join(mut self, timeout: Duration) -> JoinOutcome {
        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(Ok(())) => JoinOutcome::Stopped,
            Ok(Err(err)) => JoinOutcome::Failed(err.to_string()),
            Err(_) => JoinOutcome::Abandoned,
        }
    }
}
