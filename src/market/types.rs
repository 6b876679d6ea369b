//! Identity and market-data types shared by every exchange client.

use std::collections::HashMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Tradable asset identity, always uppercase (e.g. "BTC").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Asset(String);

impl Asset {
    /// Create an asset, normalizing case and surrounding whitespace.
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_ascii_uppercase())
    }

    /// The asset symbol.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Asset {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Asset {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Asset> for String {
    fn from(value: Asset) -> Self {
        value.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exchange identifier, always lowercase (e.g. "binance").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ExchangeId(String);

impl ExchangeId {
    /// Create an exchange id, normalizing case and surrounding whitespace.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_ascii_lowercase())
    }

    /// The exchange id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ExchangeId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for ExchangeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<ExchangeId> for String {
    fn from(value: ExchangeId) -> Self {
        value.0
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One listed trading pair on an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketInfo {
    /// Unified symbol, "BASE/QUOTE".
    pub symbol: String,
    /// Exchange-native id (e.g. "BTCUSDT" or "BTC-USD").
    pub id: String,
    /// Base currency.
    pub base: String,
    /// Quote currency.
    pub quote: String,
    /// Whether this is a spot market.
    pub spot: bool,
}

impl MarketInfo {
    /// Build a spot market whose unified symbol is `BASE/QUOTE`.
    pub fn spot(base: &str, quote: &str, id: impl Into<String>) -> Self {
        Self {
            symbol: format!("{base}/{quote}"),
            id: id.into(),
            base: base.to_string(),
            quote: quote.to_string(),
            spot: true,
        }
    }
}

/// Markets of one exchange keyed by symbol.
pub type MarketCatalog = HashMap<String, MarketInfo>;

/// Best bid/ask for one symbol as reported by an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticker {
    /// Symbol the ticker belongs to.
    pub symbol: String,
    /// Best bid, absent when the book side is empty.
    pub bid: Option<Decimal>,
    /// Best ask, absent when the book side is empty.
    pub ask: Option<Decimal>,
}

/// An asset resolved to a concrete spot symbol on one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedSymbol {
    /// Exchange the symbol belongs to.
    pub exchange: ExchangeId,
    /// Asset that was resolved.
    pub asset: Asset,
    /// Symbol to pass to the client.
    pub symbol: String,
}
