//! Cross-exchange bid/ask poller and arbitrage spread monitor.
//!
//! One poller task per exchange fetches best bid/ask for a shared asset
//! universe and sends quotes over a single fan-in channel. One aggregator
//! owns the resulting snapshot and publishes immutable copies; spreads are
//! computed from those copies on demand.
//!
//! ```text
//! Supervisor ──spawns──▶ Poller(binance) ─┐
//!                        Poller(coinbase) ─┼─▶ EventChannel ─▶ Aggregator ─▶ MarketHandle
//!                        Poller(kraken)  ─┘                                     │
//!                                                              compute_spreads ◀┘
//! ```
//!
//! For exchanges A and B:
//!
//! ```text
//! spread_a_to_b = (B.ask - A.bid) / A.bid * 100
//! spread_b_to_a = (A.ask - B.bid) / B.bid * 100
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`market`]: Exchange clients and symbol resolution
//! - [`catalog`]: Asset listings used to build the universe
//! - [`feed`]: Pollers, price events and the supervisor
//! - [`snapshot`]: Aggregator and published market view
//! - [`arbitrage`]: Spread calculation and reporting
//! - [`api`]: HTTP API for the market view
//! - [`metrics`]: Prometheus metrics
//! - [`utils`]: Utility functions

pub mod api;
pub mod arbitrage;
pub mod catalog;
pub mod config;
pub mod error;
pub mod feed;
pub mod market;
pub mod metrics;
pub mod snapshot;
pub mod utils;

pub use config::Config;
pub use error::{Result, WatchError};
