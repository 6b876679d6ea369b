//! Quotes and the events pollers send to the aggregator.

use rust_decimal::Decimal;
use strum::{Display, EnumString, IntoStaticStr};
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::error::FetchError;
use crate::market::{Asset, ExchangeId, Ticker};

/// Identifies one started poller; increases with every start.
pub type SessionId = u64;

/// Why a quote carries no usable prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ErrorKind {
    /// The exchange catalog could not be loaded.
    #[strum(serialize = "initialization failed")]
    InitializationFailed,
    /// The asset has no spot market on the exchange.
    #[strum(serialize = "no market")]
    NoMarket,
    /// A batch response did not include the asset's symbol.
    #[strum(serialize = "missing in batch")]
    MissingInBatch,
    /// Exchange or network unavailable.
    #[strum(serialize = "unavailable")]
    Unavailable,
    /// Request timed out.
    #[strum(serialize = "timeout")]
    Timeout,
    /// Exchange rate limit hit.
    #[strum(serialize = "rate limited")]
    RateLimited,
    /// Any other failure.
    #[strum(serialize = "unknown")]
    Unknown,
}

impl From<&FetchError> for ErrorKind {
    fn from(err: &FetchError) -> Self {
        match err {
            FetchError::Unavailable(_) | FetchError::Network(_) => Self::Unavailable,
            FetchError::Timeout(_) => Self::Timeout,
            FetchError::RateLimited(_) => Self::RateLimited,
            FetchError::Other(_) => Self::Unknown,
        }
    }
}

/// Result of the most recent fetch for one (asset, exchange) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// Symbol the quote was fetched for, when resolved.
    pub symbol: Option<String>,
    /// Elapsed time of the call that produced the quote.
    pub latency_ms: Option<u64>,
    /// Failure reason; `None` on success.
    pub error: Option<ErrorKind>,
    /// When the poller produced the quote.
    pub received_at: OffsetDateTime,
}

impl Quote {
    /// Successful quote from a ticker.
    pub fn success(ticker: &Ticker, symbol: &str, latency_ms: u64) -> Self {
        Self {
            bid: ticker.bid,
            ask: ticker.ask,
            symbol: Some(symbol.to_string()),
            latency_ms: Some(latency_ms),
            error: None,
            received_at: OffsetDateTime::now_utc(),
        }
    }

    /// Failure quote.
    pub fn failure(kind: ErrorKind, symbol: Option<&str>) -> Self {
        Self {
            bid: None,
            ask: None,
            symbol: symbol.map(str::to_string),
            latency_ms: None,
            error: Some(kind),
            received_at: OffsetDateTime::now_utc(),
        }
    }

    /// True when both sides are present and no error was recorded.
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.bid.is_some() && self.ask.is_some()
    }
}

/// Message from pollers and the supervisor to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceEvent {
    /// A fetch completed for one asset.
    PriceUpdate {
        /// Exchange the quote came from.
        exchange: ExchangeId,
        /// Poller session that produced it.
        session: SessionId,
        /// Asset quoted.
        asset: Asset,
        /// The quote.
        quote: Quote,
    },
    /// A poller for `exchange` is starting.
    PollerAttached {
        /// Exchange.
        exchange: ExchangeId,
        /// New session.
        session: SessionId,
    },
    /// The poller for `exchange` was removed; its data should be evicted.
    PollerDetached {
        /// Exchange.
        exchange: ExchangeId,
        /// Session being removed.
        session: SessionId,
    },
}

impl PriceEvent {
    /// Exchange the event concerns.
    pub fn exchange(&self) -> &ExchangeId {
        match self {
            Self::PriceUpdate { exchange, .. }
            | Self::PollerAttached { exchange, .. }
            | Self::PollerDetached { exchange, .. } => exchange,
        }
    }
}

/// Sending half of the event channel; cloned into every poller.
pub type EventSender = mpsc::UnboundedSender<PriceEvent>;
/// Receiving half of the event channel; owned by the aggregator.
pub type EventReceiver = mpsc::UnboundedReceiver<PriceEvent>;

/// Create the fan-in channel. Unbounded so a slow consumer never throttles pollers.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
