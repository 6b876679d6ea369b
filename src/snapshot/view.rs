//! Point-in-time market view published by the aggregator.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;
use strum::Display;

use crate::feed::{Quote, SessionId};
use crate::market::{Asset, ExchangeId};

/// Latest quote per (asset, exchange).
pub type Snapshot = BTreeMap<Asset, BTreeMap<ExchangeId, Quote>>;

/// Bid change between the two latest quotes for one pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Movement {
    /// Bid went up.
    Rising,
    /// Bid went down.
    Falling,
    /// Bid did not change.
    Unchanged,
    /// Bid absent before, present now.
    Appeared,
    /// Bid present before, absent now.
    Disappeared,
}

/// Classify the change from `previous` to `current` bid.
///
/// Returns `None` when neither bid is present.
pub fn classify(previous: Option<Decimal>, current: Option<Decimal>) -> Option<Movement> {
    match (previous, current) {
        (Some(prev), Some(cur)) if cur > prev => Some(Movement::Rising),
        (Some(prev), Some(cur)) if cur < prev => Some(Movement::Falling),
        (Some(_), Some(_)) => Some(Movement::Unchanged),
        (None, Some(_)) => Some(Movement::Appeared),
        (Some(_), None) => Some(Movement::Disappeared),
        (None, None) => None,
    }
}

/// Running latency statistics for one exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    /// Samples recorded.
    pub count: u64,
    /// Cumulative mean in milliseconds.
    pub average_ms: f64,
    /// Most recent sample.
    pub last_ms: u64,
}

impl LatencyStats {
    /// Fold a sample into the mean.
    pub fn record(&mut self, latency_ms: u64) {
        self.count += 1;
        let sample = latency_ms as f64;
        self.average_ms += (sample - self.average_ms) / self.count as f64;
        self.last_ms = latency_ms;
    }
}

/// Everything the aggregator knows, as of `version` applied events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketView {
    /// Latest quotes.
    pub snapshot: Snapshot,
    /// Bid before the latest quote, per exchange then asset.
    pub previous_bids: BTreeMap<ExchangeId, BTreeMap<Asset, Option<Decimal>>>,
    /// Latency per exchange.
    pub latency: BTreeMap<ExchangeId, LatencyStats>,
    /// Currently attached poller session per exchange.
    pub sessions: BTreeMap<ExchangeId, SessionId>,
    /// Number of events applied.
    pub version: u64,
}

impl MarketView {
    /// Latest quote for a pair.
    pub fn quote(&self, asset: &Asset, exchange: &ExchangeId) -> Option<&Quote> {
        self.snapshot.get(asset)?.get(exchange)
    }

    /// Bid movement for a pair, if it has a quote.
    pub fn movement(&self, asset: &Asset, exchange: &ExchangeId) -> Option<Movement> {
        let current = self.quote(asset, exchange)?;
        let previous = self
            .previous_bids
            .get(exchange)
            .and_then(|bids| bids.get(asset))
            .copied()
            .flatten();
        classify(previous, current.bid)
    }

    /// Mean fetch latency for an exchange.
    pub fn average_latency(&self, exchange: &ExchangeId) -> Option<f64> {
        self.latency
            .get(exchange)
            .filter(|stats| stats.count > 0)
            .map(|stats| stats.average_ms)
    }

    /// Mean of the per-exchange averages.
    pub fn overall_average_latency(&self) -> Option<f64> {
        let averages: Vec<f64> = self
            .latency
            .values()
            .filter(|stats| stats.count > 0)
            .map(|stats| stats.average_ms)
            .collect();
        if averages.is_empty() {
            return None;
        }
        Some(averages.iter().sum::<f64>() / averages.len() as f64)
    }

    /// Exchanges with an attached poller.
    pub fn live_exchanges(&self) -> impl Iterator<Item = &ExchangeId> {
        self.sessions.keys()
    }
}
