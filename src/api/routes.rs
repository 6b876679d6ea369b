//! HTTP API route definitions.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{health, latency, movement, ready, refresh, snapshot, spreads, AppState};

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Market view
        .route("/api/v1/snapshot", get(snapshot))
        .route("/api/v1/latency", get(latency))
        .route("/api/v1/spreads", get(spreads))
        .route("/api/v1/movement/:asset/:exchange", get(movement))
        .route("/api/v1/refresh", post(refresh))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use time::OffsetDateTime;
    use tower::ServiceExt;

    use crate::feed::{event_channel, PriceEvent, Quote, Supervisor, SupervisorSettings};
    use crate::market::{Asset, ExchangeId, MockClientFactory};
    use crate::snapshot::Aggregator;

    fn quote(bid: Decimal, ask: Decimal) -> Quote {
        Quote {
            bid: Some(bid),
            ask: Some(ask),
            symbol: Some("BTC/USDT".to_string()),
            latency_ms: Some(20),
            error: None,
            received_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn test_state() -> AppState {
        let (tx, rx) = event_channel();
        let (mut aggregator, market) = Aggregator::new(rx);

        for (session, exchange, bid, ask) in [
            (1, "a", dec!(60000), dec!(60010)),
            (2, "b", dec!(60100), dec!(60120)),
        ] {
            aggregator.apply(PriceEvent::PollerAttached {
                exchange: ExchangeId::new(exchange),
                session,
            });
            aggregator.apply(PriceEvent::PriceUpdate {
                exchange: ExchangeId::new(exchange),
                session,
                asset: Asset::new("BTC"),
                quote: quote(bid, ask),
            });
        }
        aggregator.publish();
        // The handle keeps the last published view after the aggregator is dropped.
        drop(aggregator);

        let supervisor = Supervisor::new(
            Arc::new(MockClientFactory::new()),
            SupervisorSettings::default(),
            vec![Asset::new("BTC")],
            tx,
        );
        AppState::new(
            market,
            Arc::from(vec![Asset::new("BTC")]),
            Some((ExchangeId::new("a"), ExchangeId::new("b"))),
            Arc::new(supervisor),
        )
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (status, body) = get_json(create_router(test_state()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn ready_endpoint_returns_503_when_not_ready() {
        let (status, _) = get_json(create_router(test_state()), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn ready_endpoint_returns_200_when_ready() {
        let state = test_state();
        state.set_ready(true);
        let (status, body) = get_json(create_router(state), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
    }

    #[tokio::test]
    async fn snapshot_lists_quotes_by_asset_and_exchange() {
        let (status, body) = get_json(create_router(test_state()), "/api/v1/snapshot").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["assets"]["BTC"]["a"]["bid"], "60000");
        assert_eq!(body["assets"]["BTC"]["b"]["movement"], "appeared");
        assert_eq!(body["version"], 4);
    }

    #[tokio::test]
    async fn spreads_use_default_pair() {
        let (status, body) = get_json(create_router(test_state()), "/api/v1/spreads").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rows"].as_array().unwrap().len(), 1);
        let spread: Decimal = body["rows"][0]["spread_a_to_b"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(spread, dec!(0.2));
    }

    #[tokio::test]
    async fn spreads_reject_unknown_sort_column() {
        let (status, body) =
            get_json(create_router(test_state()), "/api/v1/spreads?sort=volume").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("sort"));
    }

    #[tokio::test]
    async fn spreads_require_both_exchanges() {
        let (status, _) = get_json(create_router(test_state()), "/api/v1/spreads?a=a").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn movement_returns_404_for_unknown_pair() {
        let (status, _) =
            get_json(create_router(test_state()), "/api/v1/movement/ETH/a").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) =
            get_json(create_router(test_state()), "/api/v1/movement/btc/A").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["movement"], "appeared");
    }

    #[tokio::test]
    async fn latency_reports_per_exchange_average() {
        let (status, body) = get_json(create_router(test_state()), "/api/v1/latency").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["exchanges"]["a"]["count"], 1);
        assert_eq!(body["overall_average_ms"], 20.0);
    }
}
