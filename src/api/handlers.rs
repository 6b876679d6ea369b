//! HTTP API handlers.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::arbitrage::{SortDirection, SpreadColumn, SpreadOrder, SpreadRow};
use crate::feed::{Quote, Supervisor};
use crate::market::{Asset, ExchangeId};
use crate::snapshot::{LatencyStats, MarketHandle, Movement};

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// Whether pollers have been started.
    pub ready: Arc<AtomicBool>,
    /// Read handle on the aggregated view.
    pub market: MarketHandle,
    /// Polled assets.
    pub universe: Arc<[Asset]>,
    /// Exchanges compared when a spread request names none.
    pub default_pair: Option<(ExchangeId, ExchangeId)>,
    /// Poller owner, for status and forced refresh.
    pub supervisor: Arc<Supervisor>,
}

impl AppState {
    /// Create new app state.
    pub fn new(
        market: MarketHandle,
        universe: Arc<[Asset]>,
        default_pair: Option<(ExchangeId, ExchangeId)>,
        supervisor: Arc<Supervisor>,
    ) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            market,
            universe,
            default_pair,
            supervisor,
        }
    }

    /// Set ready state.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Check if ready.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether pollers are running.
    pub ready: bool,
    /// Exchanges with a running poller.
    pub exchanges: Vec<ExchangeId>,
}

/// Error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// What went wrong.
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// One quote as served over HTTP.
#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// Quoted symbol.
    pub symbol: Option<String>,
    /// Call latency.
    pub latency_ms: Option<u64>,
    /// Failure label.
    pub error: Option<String>,
    /// Bid movement since the previous quote.
    pub movement: Option<Movement>,
    /// Unix milliseconds when produced.
    pub received_at_ms: i64,
}

impl QuoteResponse {
    fn new(quote: &Quote, movement: Option<Movement>) -> Self {
        Self {
            bid: quote.bid,
            ask: quote.ask,
            symbol: quote.symbol.clone(),
            latency_ms: quote.latency_ms,
            error: quote.error.map(|kind| kind.to_string()),
            movement,
            received_at_ms: (quote.received_at.unix_timestamp_nanos() / 1_000_000) as i64,
        }
    }
}

/// Snapshot response.
#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    /// Events applied so far.
    pub version: u64,
    /// Quotes by asset then exchange.
    pub assets: BTreeMap<Asset, BTreeMap<ExchangeId, QuoteResponse>>,
}

/// Latency response.
#[derive(Debug, Serialize)]
pub struct LatencyResponse {
    /// Mean of per-exchange averages.
    pub overall_average_ms: Option<f64>,
    /// Per-exchange statistics.
    pub exchanges: BTreeMap<ExchangeId, LatencyStats>,
}

/// Spread query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct SpreadQuery {
    /// Exchange A.
    pub a: Option<String>,
    /// Exchange B.
    pub b: Option<String>,
    /// Sort column.
    pub sort: Option<String>,
    /// `asc` or `desc`.
    pub order: Option<String>,
}

/// Spread table response.
#[derive(Debug, Serialize)]
pub struct SpreadsResponse {
    /// Exchange A.
    pub a: ExchangeId,
    /// Exchange B.
    pub b: ExchangeId,
    /// Ordered rows.
    pub rows: Vec<SpreadRow>,
}

/// Movement response.
#[derive(Debug, Serialize)]
pub struct MovementResponse {
    /// Asset.
    pub asset: Asset,
    /// Exchange.
    pub exchange: ExchangeId,
    /// Movement, absent when neither bid is present.
    pub movement: Option<Movement>,
}

/// Refresh response.
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    /// Pollers woken.
    pub pollers: usize,
}

/// Health check handler.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.is_ready();
    let response = ReadyResponse {
        ready,
        exchanges: state.supervisor.active_exchanges(),
    };

    if ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Full snapshot handler.
pub async fn snapshot(State(state): State<AppState>) -> impl IntoResponse {
    let view = state.market.view();
    let assets = view
        .snapshot
        .iter()
        .map(|(asset, quotes)| {
            let quotes = quotes
                .iter()
                .map(|(exchange, quote)| {
                    (
                        exchange.clone(),
                        QuoteResponse::new(quote, view.movement(asset, exchange)),
                    )
                })
                .collect();
            (asset.clone(), quotes)
        })
        .collect();

    Json(SnapshotResponse {
        version: view.version,
        assets,
    })
}

/// Latency statistics handler.
pub async fn latency(State(state): State<AppState>) -> impl IntoResponse {
    let view = state.market.view();
    Json(LatencyResponse {
        overall_average_ms: view.overall_average_latency(),
        exchanges: view.latency.clone(),
    })
}

/// Spread table handler.
pub async fn spreads(
    State(state): State<AppState>,
    Query(query): Query<SpreadQuery>,
) -> Response {
    let (a, b) = match (query.a.as_deref(), query.b.as_deref(), &state.default_pair) {
        (Some(a), Some(b), _) => (ExchangeId::new(a), ExchangeId::new(b)),
        (None, None, Some(pair)) => pair.clone(),
        _ => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "both 'a' and 'b' exchanges are required",
            )
        }
    };

    let column = match query.sort.as_deref().map(SpreadColumn::from_str).transpose() {
        Ok(column) => column.unwrap_or_default(),
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "unknown sort column"),
    };
    let direction = match query.order.as_deref().map(SortDirection::from_str).transpose() {
        Ok(direction) => direction.unwrap_or_default(),
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "order must be asc or desc"),
    };

    let rows = state.market.compute_spreads(
        &state.universe,
        &a,
        &b,
        SpreadOrder::new(column, direction),
    );
    Json(SpreadsResponse { a, b, rows }).into_response()
}

/// Bid movement handler.
pub async fn movement(
    State(state): State<AppState>,
    Path((asset, exchange)): Path<(String, String)>,
) -> Response {
    let asset = Asset::new(asset);
    let exchange = ExchangeId::new(exchange);
    let view = state.market.view();

    if view.quote(&asset, &exchange).is_none() {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("no quote for {asset} on {exchange}"),
        );
    }

    Json(MovementResponse {
        movement: view.movement(&asset, &exchange),
        asset,
        exchange,
    })
    .into_response()
}

/// Forced refresh handler.
pub async fn refresh(State(state): State<AppState>) -> impl IntoResponse {
    state.supervisor.force_refresh_all();
    (
        StatusCode::ACCEPTED,
        Json(RefreshResponse {
            pollers: state.supervisor.active_exchanges().len(),
        }),
    )
}
