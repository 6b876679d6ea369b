//! Per-exchange symbol resolution.

use std::collections::HashMap;

use tracing::debug;

use super::types::{Asset, ExchangeId, MarketCatalog, ResolvedSymbol};

/// Quote suffixes tried in order; the first spot match wins.
pub const QUOTE_SUFFIXES: [&str; 9] = [
    "/USDT", "/USD", "/USDC", "-USDT", "-USD", "-USDC", "_USDT", "_USD", "_USDC",
];

/// Maps assets to spot symbols for one exchange session.
///
/// Results are cached for the lifetime of the registry, misses included. A
/// market delisted after its first resolution keeps its cached symbol until
/// the poller restarts.
#[derive(Debug)]
pub struct MarketRegistry {
    exchange: ExchangeId,
    catalog: MarketCatalog,
    resolved: HashMap<Asset, Option<ResolvedSymbol>>,
    lookups: u64,
}

impl MarketRegistry {
    /// Create a registry over an already loaded catalog.
    pub fn new(exchange: ExchangeId, catalog: MarketCatalog) -> Self {
        Self {
            exchange,
            catalog,
            resolved: HashMap::new(),
            lookups: 0,
        }
    }

    /// Exchange this registry resolves for.
    pub fn exchange(&self) -> &ExchangeId {
        &self.exchange
    }

    /// Number of markets in the catalog.
    pub fn market_count(&self) -> usize {
        self.catalog.len()
    }

    /// Resolve an asset to its spot symbol, or `None` when not listed.
    pub fn resolve(&mut self, asset: &Asset) -> Option<ResolvedSymbol> {
        if let Some(cached) = self.resolved.get(asset) {
            return cached.clone();
        }

        let mut found = None;
        for suffix in QUOTE_SUFFIXES {
            let candidate = format!("{asset}{suffix}");
            self.lookups += 1;
            if self
                .catalog
                .get(&candidate)
                .is_some_and(|market| market.spot)
            {
                found = Some(ResolvedSymbol {
                    exchange: self.exchange.clone(),
                    asset: asset.clone(),
                    symbol: candidate,
                });
                break;
            }
        }

        match &found {
            Some(resolved) => debug!(
                exchange = %self.exchange,
                asset = %asset,
                symbol = %resolved.symbol,
                "Resolved symbol"
            ),
            None => debug!(exchange = %self.exchange, asset = %asset, "No spot market"),
        }

        self.resolved.insert(asset.clone(), found.clone());
        found
    }

    /// Total catalog probes performed so far.
    pub fn catalog_lookups(&self) -> u64 {
        self.lookups
    }
}
