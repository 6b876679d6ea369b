//! Application configuration loaded from environment variables.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::market::{Asset, ExchangeId};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Universe ===
    /// Exchanges to poll (comma separated). The first two are compared.
    #[serde(default = "default_exchanges")]
    pub exchanges: Vec<String>,

    /// Assets to track (comma separated). Empty means "derive from catalog".
    #[serde(default)]
    pub assets: Vec<String>,

    /// Path to the JSON asset catalog.
    #[serde(default)]
    pub catalog_path: Option<String>,

    // === Polling ===
    /// Default cycle interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-exchange cycle overrides, `id=ms` pairs (comma separated).
    #[serde(default = "default_exchange_intervals")]
    pub exchange_intervals: String,

    /// Exchanges forced onto single-symbol fetching.
    #[serde(default = "default_single_fetch_exchanges")]
    pub single_fetch_exchanges: Vec<String>,

    /// Granularity at which a napping poller checks for stop.
    #[serde(default = "default_stop_tick_ms")]
    pub stop_tick_ms: u64,

    /// How long shutdown waits for each poller before abandoning it.
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,

    // === Exchange APIs ===
    /// HTTP request timeout.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    /// Binance REST base URL.
    #[serde(default = "default_binance_url")]
    pub binance_api_url: String,

    /// Coinbase Exchange REST base URL.
    #[serde(default = "default_coinbase_url")]
    pub coinbase_api_url: String,

    // === Display ===
    /// How often the spread table is logged.
    #[serde(default = "default_display_refresh_ms")]
    pub display_refresh_ms: u64,

    /// Rows shown per spread table.
    #[serde(default = "default_display_rows")]
    pub display_rows: usize,

    // === Server Configuration ===
    /// HTTP server port for the read API.
    #[serde(default = "default_port")]
    pub port: u16,

    // === Metrics ===
    /// Serve Prometheus metrics.
    #[serde(default)]
    pub metrics_enabled: bool,

    /// Prometheus exporter port.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_exchanges() -> Vec<String> {
    vec!["binance".to_string(), "coinbase".to_string()]
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_exchange_intervals() -> String {
    "binance=2000,mexc=3000,bitfinex=5000,kraken=3000".to_string()
}

fn default_single_fetch_exchanges() -> Vec<String> {
    vec!["cryptocom".to_string(), "bitfinex".to_string()]
}

fn default_stop_tick_ms() -> u64 {
    100
}

fn default_join_timeout_ms() -> u64 {
    1000
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

fn default_binance_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_coinbase_url() -> String {
    "https://api.exchange.coinbase.com".to_string()
}

fn default_display_refresh_ms() -> u64 {
    1000
}

fn default_display_rows() -> usize {
    10
}

fn default_port() -> u16 {
    8080
}

fn default_metrics_port() -> u16 {
    9090
}

/// Parse `id=ms,id=ms` into an interval table.
fn parse_intervals(raw: &str) -> Result<HashMap<ExchangeId, Duration>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, ms) = entry
                .split_once('=')
                .ok_or_else(|| format!("EXCHANGE_INTERVALS entry '{entry}' is not id=ms"))?;
            let ms: u64 = ms
                .trim()
                .parse()
                .map_err(|_| format!("EXCHANGE_INTERVALS entry '{entry}' has a bad interval"))?;
            if ms == 0 {
                return Err(format!("EXCHANGE_INTERVALS entry '{entry}' must be positive"));
            }
            Ok((ExchangeId::new(id), Duration::from_millis(ms)))
        })
        .collect()
}

/// Keep the first occurrence of every non-empty item.
fn dedup_ordered<T: Clone + Eq + std::hash::Hash>(items: impl Iterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items.filter(|item| seen.insert(item.clone())).collect()
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.exchange_ids().is_empty() {
            return Err("EXCHANGES must name at least one exchange".to_string());
        }

        if self.poll_interval_ms == 0 {
            return Err("POLL_INTERVAL_MS must be positive".to_string());
        }

        if self.stop_tick_ms == 0 || self.stop_tick_ms >= 1000 {
            return Err("STOP_TICK_MS must be between 1 and 999".to_string());
        }

        if self.join_timeout_ms == 0 {
            return Err("JOIN_TIMEOUT_MS must be positive".to_string());
        }

        if self.display_refresh_ms == 0 {
            return Err("DISPLAY_REFRESH_MS must be positive".to_string());
        }

        parse_intervals(&self.exchange_intervals)?;

        for (name, value) in [
            ("BINANCE_API_URL", &self.binance_api_url),
            ("COINBASE_API_URL", &self.coinbase_api_url),
        ] {
            Url::parse(value).map_err(|e| format!("{name} is not a valid URL: {e}"))?;
        }

        Ok(())
    }

    /// Selected exchanges, normalized and deduplicated in order.
    pub fn exchange_ids(&self) -> Vec<ExchangeId> {
        dedup_ordered(
            self.exchanges
                .iter()
                .filter(|s| !s.trim().is_empty())
                .map(ExchangeId::new),
        )
    }

    /// Explicitly configured assets, normalized and deduplicated in order.
    pub fn asset_list(&self) -> Vec<Asset> {
        dedup_ordered(
            self.assets
                .iter()
                .filter(|s| !s.trim().is_empty())
                .map(Asset::new),
        )
    }

    /// Per-exchange cycle interval overrides.
    pub fn interval_overrides(&self) -> Result<HashMap<ExchangeId, Duration>, String> {
        parse_intervals(&self.exchange_intervals)
    }

    /// Exchanges that must not use batch fetching.
    pub fn single_fetch_set(&self) -> HashSet<ExchangeId> {
        self.single_fetch_exchanges
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(ExchangeId::new)
            .collect()
    }

    /// Default cycle interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Stop-check granularity.
    pub fn stop_tick(&self) -> Duration {
        Duration::from_millis(self.stop_tick_ms)
    }

    /// Per-poller join timeout.
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Spread table refresh period.
    pub fn display_refresh(&self) -> Duration {
        Duration::from_millis(self.display_refresh_ms)
    }
}
