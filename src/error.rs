//! Unified error types for the spread watcher.

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

use crate::market::ExchangeId;

/// Unified error type for the spread watcher.
#[derive(Error, Debug)]
pub enum WatchError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Configuration loaded but failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Poller lifecycle error.
    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// Asset catalog error.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

/// Failure categories reported by a market-data client.
///
/// A fetch failure never ends a poller; it becomes a failure quote for the
/// affected assets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Exchange is down, in maintenance or refusing connections.
    #[error("exchange unavailable: {0}")]
    Unavailable(String),

    /// Transport-level failure other than a timeout.
    #[error("network error: {0}")]
    Network(String),

    /// Exchange asked us to slow down.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Request did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Anything else, including malformed payloads.
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: StatusCode, context: &str) -> Self {
        let message = format!("{context}: HTTP {status}");
        match status.as_u16() {
            418 | 429 => Self::RateLimited(message),
            502..=504 => Self::Unavailable(message),
            408 => Self::Timeout(message),
            _ => Self::Other(message),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Unavailable(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status, &err.to_string())
        } else if err.is_decode() || err.is_body() {
            Self::Other(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Poller lifecycle errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// No client implementation exists for this exchange id.
    #[error("unknown exchange: {0}")]
    UnknownExchange(ExchangeId),

    /// The aggregator has gone away; nothing would consume new events.
    #[error("event channel closed")]
    EventChannelClosed,
}

/// Asset catalog errors.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Catalog file could not be read.
    #[error("failed to read catalog {path}: {source}")]
    Io {
        /// Catalog path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Catalog content is not valid.
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    /// No asset is listed on every selected exchange.
    #[error("no common assets for exchanges: {exchanges}")]
    EmptyUniverse {
        /// The selected exchanges, comma separated.
        exchanges: String,
    },
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, WatchError>;
