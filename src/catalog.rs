//! Asset catalog: which exchanges list which assets.
//!
//! Read once at startup to produce the polled universe.
//!
//! ```json
//! { "exchanges": { "binance": ["BTC", "ETH"], "coinbase": ["BTC"] } }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CatalogError;
use crate::market::{Asset, ExchangeId};

/// Exchange-to-asset listing table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    exchanges: BTreeMap<ExchangeId, BTreeSet<Asset>>,
}

impl Catalog {
    /// Read a catalog file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            exchanges = catalog.exchanges.len(),
            "Catalog loaded"
        );
        Ok(catalog)
    }

    /// Parse a catalog document.
    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Record that `exchange` lists `asset`.
    pub fn insert(&mut self, exchange: ExchangeId, asset: Asset) {
        self.exchanges.entry(exchange).or_default().insert(asset);
    }

    /// Exchanges present in the catalog.
    pub fn exchanges(&self) -> impl Iterator<Item = &ExchangeId> {
        self.exchanges.keys()
    }

    /// Assets listed on `exchange`.
    pub fn assets_on(&self, exchange: &ExchangeId) -> Option<&BTreeSet<Asset>> {
        self.exchanges.get(exchange)
    }

    /// Exchanges listing `asset`.
    pub fn exchanges_listing(&self, asset: &Asset) -> BTreeSet<ExchangeId> {
        self.exchanges
            .iter()
            .filter(|(_, assets)| assets.contains(asset))
            .map(|(exchange, _)| exchange.clone())
            .collect()
    }

    /// Sorted assets listed on every selected exchange.
    ///
    /// Exchanges absent from the catalog are skipped with a warning.
    pub fn common_assets(&self, selected: &[ExchangeId]) -> Result<Vec<Asset>, CatalogError> {
        let mut known = Vec::with_capacity(selected.len());
        for exchange in selected {
            match self.exchanges.get(exchange) {
                Some(assets) => known.push(assets),
                None => warn!(exchange = %exchange, "Exchange not in catalog; skipping"),
            }
        }

        let mut sets = known.into_iter();
        let common: BTreeSet<Asset> = match sets.next() {
            Some(first) => sets.fold(first.clone(), |acc, next| {
                acc.intersection(next).cloned().collect()
            }),
            None => BTreeSet::new(),
        };

        if common.is_empty() {
            return Err(CatalogError::EmptyUniverse {
                exchanges: selected
                    .iter()
                    .map(ExchangeId::as_str)
                    .collect::<Vec<_>>()
                    .join(","),
            });
        }
        Ok(common.into_iter().collect())
    }
}
