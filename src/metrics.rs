//! Prometheus metrics for pollers and the aggregator.
//!
//! This module provides metrics for:
//! - Exchange fetch and poll-cycle latency
//! - Quotes emitted per exchange and outcome
//! - Events applied or discarded by the aggregator
//! - Poller lifecycle

use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use tracing::debug;

use crate::feed::ErrorKind;
use crate::market::ExchangeId;

// === Metric Name Constants ===

/// Exchange call latency metric name.
pub const METRIC_FETCH_LATENCY: &str = "fetch_latency_ms";
/// Full poll cycle latency metric name.
pub const METRIC_CYCLE_LATENCY: &str = "poll_cycle_latency_ms";
/// Quotes emitted counter metric name.
pub const METRIC_QUOTES_EMITTED: &str = "quotes_emitted_total";
/// Catalog load failures counter metric name.
pub const METRIC_CATALOG_LOAD_FAILURES: &str = "catalog_load_failures_total";
/// Events applied counter metric name.
pub const METRIC_EVENTS_APPLIED: &str = "aggregator_events_applied_total";
/// Events discarded counter metric name.
pub const METRIC_EVENTS_DISCARDED: &str = "aggregator_events_discarded_total";
/// Active pollers gauge metric name.
pub const METRIC_ACTIVE_POLLERS: &str = "active_pollers";
/// Abandoned pollers counter metric name.
pub const METRIC_POLLERS_ABANDONED: &str = "pollers_abandoned_total";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_FETCH_LATENCY,
        "Exchange ticker call latency in milliseconds"
    );
    describe_histogram!(
        METRIC_CYCLE_LATENCY,
        "Full poll cycle latency in milliseconds"
    );

    describe_counter!(
        METRIC_QUOTES_EMITTED,
        "Total number of quotes emitted by pollers"
    );
    describe_counter!(
        METRIC_CATALOG_LOAD_FAILURES,
        "Total number of failed market catalog loads"
    );
    describe_counter!(
        METRIC_EVENTS_APPLIED,
        "Total number of events applied to the snapshot"
    );
    describe_counter!(
        METRIC_EVENTS_DISCARDED,
        "Total number of stale events discarded by the aggregator"
    );
    describe_counter!(
        METRIC_POLLERS_ABANDONED,
        "Total number of pollers that missed their join timeout"
    );

    describe_gauge!(METRIC_ACTIVE_POLLERS, "Number of running pollers");

    debug!("Metrics initialized");
}

/// Record one exchange call.
pub fn record_fetch_latency(exchange: &ExchangeId, latency_ms: u64) {
    histogram!(METRIC_FETCH_LATENCY, "exchange" => exchange.to_string()).record(latency_ms as f64);
}

/// Count an emitted quote, labelled by outcome.
pub fn inc_quotes_emitted(exchange: &ExchangeId, error: Option<ErrorKind>) {
    let outcome: &'static str = error.map_or("ok", |kind| kind.into());
    counter!(
        METRIC_QUOTES_EMITTED,
        "exchange" => exchange.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Count a failed catalog load.
pub fn inc_catalog_load_failures(exchange: &ExchangeId) {
    counter!(METRIC_CATALOG_LOAD_FAILURES, "exchange" => exchange.to_string()).increment(1);
}

/// Count an applied event.
pub fn inc_events_applied() {
    counter!(METRIC_EVENTS_APPLIED).increment(1);
}

/// Count a discarded event.
pub fn inc_events_discarded() {
    counter!(METRIC_EVENTS_DISCARDED).increment(1);
}

/// Count an abandoned poller.
pub fn inc_pollers_abandoned(exchange: &ExchangeId) {
    counter!(METRIC_POLLERS_ABANDONED, "exchange" => exchange.to_string()).increment(1);
}

/// Set the number of running pollers.
pub fn set_active_pollers(count: usize) {
    gauge!(METRIC_ACTIVE_POLLERS).set(count as f64);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
    exchange: String,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric and exchange.
    pub fn new(metric_name: &'static str, exchange: &ExchangeId) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
            exchange: exchange.to_string(),
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        let latency_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        histogram!(self.metric_name, "exchange" => self.exchange.clone()).record(latency_ms);
    }
}

/// Create a latency timer for one poll cycle.
pub fn timer_poll_cycle(exchange: &ExchangeId) -> LatencyTimer {
    LatencyTimer::new(METRIC_CYCLE_LATENCY, exchange)
}
