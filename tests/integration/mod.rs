//! End-to-end tests wiring pollers, the event channel and the aggregator.
//!
//! Mock exchanges drive the default tests. Live tests hit public Binance and
//! Coinbase endpoints.
//! Run with: cargo test --test integration -- --ignored

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use spread_watch::arbitrage::{compute_spreads, SpreadOrder};
use spread_watch::config::Config;
use spread_watch::error::FetchError;
use spread_watch::feed::{
    event_channel, ErrorKind, EventReceiver, JoinOutcome, Poller, PollerSettings, PriceEvent,
    Supervisor, SupervisorSettings,
};
use spread_watch::market::{
    Asset, ClientFactory, ExchangeId, FetchStrategy, MarketDataClient, MarketRegistry,
    MockClientFactory, MockExchangeClient, RestClientFactory,
};
use spread_watch::snapshot::{Aggregator, MarketHandle, MarketView, Movement};

fn assets(names: &[&str]) -> Vec<Asset> {
    names.iter().map(Asset::new).collect()
}

fn drain(rx: &mut EventReceiver) -> Vec<PriceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait until `done` holds on the published view.
async fn wait_until(market: &mut MarketHandle, done: impl Fn(&MarketView) -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(60), async {
        while !done(&*market.view()) {
            assert!(market.changed().await, "aggregator stopped");
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

fn has_quote(view: &MarketView, asset: &str, exchange: &str) -> bool {
    view.quote(&Asset::new(asset), &ExchangeId::new(exchange))
        .is_some()
}

fn exchange_a() -> MockExchangeClient {
    MockExchangeClient::builder("a")
        .quote("BTC", "USDT", dec!(60000), dec!(60010))
        .quote("ETH", "USDT", dec!(3000), dec!(3001))
        .build()
}

fn exchange_b() -> MockExchangeClient {
    MockExchangeClient::builder("b")
        .strategy(FetchStrategy::Single)
        .quote("BTC", "USD", dec!(60100), dec!(60120))
        .quote("ETH", "USD", dec!(2990), dec!(2995))
        .build()
}

#[tokio::test]
async fn batch_cycle_emits_exactly_one_event_per_asset() {
    let client = Arc::new(exchange_a());
    client.omit_from_batch("ETH/USDT");
    let (tx, mut rx) = event_channel();
    let universe = assets(&["BTC", "ETH", "XYZ"]);

    let mut poller = Poller::new(
        1,
        client.clone(),
        FetchStrategy::Batch,
        universe.clone().into(),
        PollerSettings::default(),
        tx,
    );
    let summary = poller.run_cycle().await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), universe.len());
    assert_eq!(summary.emitted(), universe.len());
    assert_eq!(summary.succeeded, 1);
    assert_eq!(client.batch_calls(), 1);
    assert_eq!(client.ticker_calls(), 0);

    let mut by_asset = std::collections::BTreeMap::new();
    for event in events {
        if let PriceEvent::PriceUpdate { asset, quote, .. } = event {
            by_asset.insert(asset.as_str().to_string(), quote);
        }
    }
    assert_eq!(by_asset["BTC"].bid, Some(dec!(60000)));
    assert_eq!(by_asset["BTC"].symbol.as_deref(), Some("BTC/USDT"));
    assert_eq!(by_asset["ETH"].error, Some(ErrorKind::MissingInBatch));
    assert_eq!(by_asset["XYZ"].error, Some(ErrorKind::NoMarket));
    assert_eq!(by_asset["XYZ"].symbol, None);
}

#[tokio::test]
async fn failed_batch_marks_every_resolved_asset() {
    let client = Arc::new(exchange_a());
    client.fail_batch(Some(FetchError::RateLimited("429".into())));
    let (tx, mut rx) = event_channel();

    let mut poller = Poller::new(
        1,
        client,
        FetchStrategy::Batch,
        assets(&["BTC", "ETH"]).into(),
        PollerSettings::default(),
        tx,
    );
    poller.run_cycle().await;

    let kinds: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            PriceEvent::PriceUpdate { quote, .. } => quote.error,
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec![ErrorKind::RateLimited, ErrorKind::RateLimited]);
}

#[tokio::test(start_paused = true)]
async fn spreads_between_two_live_exchanges() {
    let factory = MockClientFactory::new()
        .with_client(Arc::new(exchange_a()))
        .with_client(Arc::new(exchange_b()));
    let universe = assets(&["BTC", "ETH", "XYZ"]);
    let (tx, rx) = event_channel();
    let (aggregator, mut market) = Aggregator::new(rx);
    tokio::spawn(aggregator.run());

    let supervisor = Supervisor::new(
        Arc::new(factory),
        SupervisorSettings::default(),
        universe.clone(),
        tx,
    );
    let (a, b) = (ExchangeId::new("a"), ExchangeId::new("b"));
    supervisor.add_exchange(&a).unwrap();
    supervisor.add_exchange(&b).unwrap();

    wait_until(&mut market, |view| {
        ["BTC", "ETH", "XYZ"]
            .iter()
            .all(|asset| has_quote(view, asset, "a") && has_quote(view, asset, "b"))
    })
    .await;

    let view = market.view();
    assert_eq!(
        view.quote(&Asset::new("XYZ"), &a).and_then(|q| q.error),
        Some(ErrorKind::NoMarket)
    );
    assert_eq!(
        view.quote(&Asset::new("XYZ"), &a)
            .and_then(|q| q.error)
            .map(|kind| kind.to_string()),
        Some("no market".to_string())
    );

    let rows = compute_spreads(&view.snapshot, &universe, &a, &b, SpreadOrder::default());
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.asset.as_str() != "XYZ"));

    let btc = rows
        .iter()
        .find(|row| row.asset.as_str() == "BTC")
        .unwrap();
    assert_eq!(btc.a_symbol.as_deref(), Some("BTC/USDT"));
    assert_eq!(btc.b_symbol.as_deref(), Some("BTC/USD"));
    assert_eq!(btc.spread_a_to_b, Some(dec!(0.2)));
    assert_eq!(
        btc.spread_b_to_a.map(|s| s.round_dp(2)),
        Some(dec!(-0.15))
    );

    // Descending by A-to-B spread: BTC (+0.2%) ahead of ETH (about -0.17%).
    assert_eq!(rows[0].asset.as_str(), "BTC");

    let outcomes = supervisor.stop_all().await;
    assert!(outcomes
        .iter()
        .all(|(_, outcome)| *outcome == JoinOutcome::Stopped));
}

#[tokio::test(start_paused = true)]
async fn forced_refresh_surfaces_bid_movement() {
    let a = Arc::new(exchange_a());
    let factory = MockClientFactory::new().with_client(a.clone());
    let (tx, rx) = event_channel();
    let (aggregator, mut market) = Aggregator::new(rx);
    tokio::spawn(aggregator.run());

    let mut settings = SupervisorSettings::default();
    settings.default_interval = Duration::from_secs(3600);
    let supervisor = Supervisor::new(Arc::new(factory), settings, assets(&["BTC"]), tx);
    let exchange = ExchangeId::new("a");
    supervisor.add_exchange(&exchange).unwrap();

    wait_until(&mut market, |view| has_quote(view, "BTC", "a")).await;
    assert_eq!(
        market.movement(&Asset::new("BTC"), &exchange),
        Some(Movement::Appeared)
    );

    a.set_ticker("BTC/USDT", Some(dec!(60500)), Some(dec!(60510)));
    supervisor.force_refresh_all();

    wait_until(&mut market, |view| {
        view.quote(&Asset::new("BTC"), &ExchangeId::new("a"))
            .and_then(|q| q.bid)
            == Some(dec!(60500))
    })
    .await;
    assert_eq!(
        market.movement(&Asset::new("BTC"), &exchange),
        Some(Movement::Rising)
    );

    supervisor.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn removing_an_exchange_leaves_the_others_polling() {
    let c = MockExchangeClient::builder("c")
        .quote("BTC", "USDC", dec!(59990), dec!(60000))
        .build();
    let factory = MockClientFactory::new()
        .with_client(Arc::new(exchange_a()))
        .with_client(Arc::new(exchange_b()))
        .with_client(Arc::new(c));
    let (tx, rx) = event_channel();
    let (aggregator, mut market) = Aggregator::new(rx);
    tokio::spawn(aggregator.run());

    let supervisor = Supervisor::new(
        Arc::new(factory),
        SupervisorSettings::default(),
        assets(&["BTC"]),
        tx,
    );
    for exchange in ["a", "b", "c"] {
        supervisor.add_exchange(&ExchangeId::new(exchange)).unwrap();
    }
    wait_until(&mut market, |view| {
        ["a", "b", "c"]
            .iter()
            .all(|exchange| has_quote(view, "BTC", exchange))
    })
    .await;

    let b = ExchangeId::new("b");
    assert_eq!(
        supervisor.remove_exchange(&b).await,
        Some(JoinOutcome::Stopped)
    );
    wait_until(&mut market, |view| !has_quote(view, "BTC", "b")).await;

    let view = market.view();
    assert!(view.average_latency(&b).is_none());
    assert!(view.movement(&Asset::new("BTC"), &b).is_none());
    assert_eq!(
        supervisor.active_exchanges(),
        vec![ExchangeId::new("a"), ExchangeId::new("c")]
    );

    // The remaining pollers keep feeding the view.
    let version = view.version;
    wait_until(&mut market, |view| view.version > version + 1).await;
    let view = market.view();
    assert!(has_quote(&view, "BTC", "a"));
    assert!(has_quote(&view, "BTC", "c"));
    assert!(!has_quote(&view, "BTC", "b"));

    supervisor.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn readding_while_removal_is_joining_leaves_nothing_stale() {
    let slow = MockExchangeClient::builder("a")
        .latency_ms(500)
        .quote("BTC", "USDT", dec!(60000), dec!(60010))
        .build();
    let factory = MockClientFactory::new().with_client(Arc::new(slow));
    let (tx, rx) = event_channel();
    let (aggregator, mut market) = Aggregator::new(rx);
    tokio::spawn(aggregator.run());

    let supervisor = Arc::new(Supervisor::new(
        Arc::new(factory),
        SupervisorSettings::default(),
        assets(&["BTC"]),
        tx,
    ));
    let a = ExchangeId::new("a");
    let start = tokio::time::Instant::now();
    supervisor.add_exchange(&a).unwrap();
    wait_until(&mut market, |view| has_quote(view, "BTC", "a")).await;

    // The second cycle starts at 2s and its fetch is in flight until 2.5s.
    tokio::time::sleep_until(start + Duration::from_millis(2200)).await;
    let removal = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        let a = a.clone();
        async move { supervisor.remove_exchange(&a).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(supervisor.add_exchange(&a), Ok(true));
    assert_eq!(removal.await.unwrap(), Some(JoinOutcome::Stopped));

    // Old session's late quote and detach have been delivered by now; the new
    // session has not produced a quote yet.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let view = market.view();
    assert_eq!(view.sessions.get(&a), Some(&2));
    assert!(!has_quote(&view, "BTC", "a"));
    assert!(view.average_latency(&a).is_none());
    assert!(view.movement(&Asset::new("BTC"), &a).is_none());

    wait_until(&mut market, |view| has_quote(view, "BTC", "a")).await;
    let view = market.view();
    assert_eq!(view.latency[&a].count, 1);
    assert_eq!(
        view.movement(&Asset::new("BTC"), &a),
        Some(Movement::Appeared)
    );

    supervisor.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn stop_all_abandons_slow_pollers_in_parallel() {
    let slow = |exchange: &str| {
        Arc::new(
            MockExchangeClient::builder(exchange)
                .latency_ms(5_000)
                .quote("BTC", "USDT", dec!(1), dec!(2))
                .build(),
        )
    };
    let (x, y) = (slow("x"), slow("y"));
    let factory = MockClientFactory::new()
        .with_client(Arc::clone(&x))
        .with_client(Arc::clone(&y));
    let (tx, rx) = event_channel();
    let (aggregator, market) = Aggregator::new(rx);
    tokio::spawn(aggregator.run());

    let mut settings = SupervisorSettings::default();
    settings.join_timeout = Duration::from_secs(1);
    let supervisor = Supervisor::new(Arc::new(factory), settings, assets(&["BTC"]), tx);
    supervisor.add_exchange(&ExchangeId::new("x")).unwrap();
    supervisor.add_exchange(&ExchangeId::new("y")).unwrap();

    // Both pollers are inside their catalog load.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = tokio::time::Instant::now();
    let outcomes = supervisor.stop_all().await;
    let took = started.elapsed();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|(_, outcome)| *outcome == JoinOutcome::Abandoned));
    assert!(took >= Duration::from_secs(1), "took {took:?}");
    assert!(took < Duration::from_secs(2), "took {took:?}");
    assert!(supervisor.active_exchanges().is_empty());

    // The abandoned pollers finish their cycle and emit after being detached.
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(x.batch_calls(), 1);
    assert_eq!(y.batch_calls(), 1);

    let view = market.view();
    assert!(view.snapshot.is_empty());
    assert!(view.sessions.is_empty());
    assert!(view.latency.is_empty());
    // Two attaches and two detaches; the late quotes were discarded.
    assert_eq!(view.version, 4);
}

#[tokio::test(start_paused = true)]
async fn readded_exchange_ignores_updates_from_old_session() {
    let factory = MockClientFactory::new().with_client(Arc::new(exchange_a()));
    let (tx, mut rx) = event_channel();
    let supervisor = Supervisor::new(
        Arc::new(factory),
        SupervisorSettings::default(),
        assets(&["BTC"]),
        tx,
    );
    let a = ExchangeId::new("a");

    supervisor.add_exchange(&a).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    supervisor.remove_exchange(&a).await;
    supervisor.add_exchange(&a).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    supervisor.stop_all().await;

    let events = drain(&mut rx);
    let (aggregator_tx, aggregator_rx) = event_channel();
    drop(aggregator_tx);
    let (mut aggregator, _market) = Aggregator::new(aggregator_rx);

    // Replay the first session's update after the second session attached.
    let stale = events
        .iter()
        .find(|event| matches!(event, PriceEvent::PriceUpdate { session: 1, .. }))
        .cloned()
        .unwrap();
    aggregator.apply(PriceEvent::PollerAttached {
        exchange: a.clone(),
        session: 2,
    });
    assert!(!aggregator.apply(stale));
    assert!(aggregator.view().snapshot.is_empty());
}

#[tokio::test]
async fn replaying_the_same_events_yields_the_same_view() {
    let client = Arc::new(exchange_a());
    let (tx, mut rx) = event_channel();
    tx.send(PriceEvent::PollerAttached {
        exchange: ExchangeId::new("a"),
        session: 7,
    })
    .unwrap();

    let mut poller = Poller::new(
        7,
        client.clone(),
        FetchStrategy::Batch,
        assets(&["BTC", "ETH"]).into(),
        PollerSettings::default(),
        tx,
    );
    poller.run_cycle().await;
    client.set_ticker("ETH/USDT", Some(dec!(2950)), Some(dec!(2951)));
    poller.run_cycle().await;
    let events = drain(&mut rx);

    let build = || {
        let (_tx, rx) = event_channel();
        let (mut aggregator, _) = Aggregator::new(rx);
        for event in events.iter().cloned() {
            aggregator.apply(event);
        }
        aggregator.view().clone()
    };

    let first = build();
    let second = build();
    assert_eq!(first, second);
    assert_eq!(
        first.movement(&Asset::new("ETH"), &ExchangeId::new("a")),
        Some(Movement::Falling)
    );
    assert_eq!(
        first.movement(&Asset::new("BTC"), &ExchangeId::new("a")),
        Some(Movement::Unchanged)
    );
}

fn live_config() -> Config {
    dotenvy::dotenv().ok();
    envy::from_iter(Vec::<(String, String)>::new()).unwrap()
}

async fn live_registry(exchange: &str) -> (Arc<dyn MarketDataClient>, MarketRegistry) {
    let factory = RestClientFactory::new(&live_config()).unwrap();
    let id = ExchangeId::new(exchange);
    let client = factory.create(&id).unwrap();
    let catalog = client.load_markets().await.unwrap();
    (client, MarketRegistry::new(id, catalog))
}

#[tokio::test]
#[ignore = "requires network access"]
async fn live_binance_batch_quotes() {
    let (client, mut registry) = live_registry("binance").await;
    let symbols: Vec<String> = ["BTC", "ETH"]
        .iter()
        .filter_map(|asset| registry.resolve(&Asset::new(asset)))
        .map(|resolved| resolved.symbol)
        .collect();
    assert_eq!(symbols, vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()]);

    let tickers = client.fetch_tickers(&symbols).await.unwrap();
    let btc = &tickers["BTC/USDT"];
    println!("binance BTC/USDT bid={:?} ask={:?}", btc.bid, btc.ask);
    assert!(btc.bid.unwrap_or(Decimal::ZERO) > Decimal::ZERO);
    assert!(btc.ask >= btc.bid);
}

#[tokio::test]
#[ignore = "requires network access"]
async fn live_coinbase_single_quote() {
    let (client, mut registry) = live_registry("coinbase").await;
    let resolved = registry.resolve(&Asset::new("BTC")).unwrap();
    println!("coinbase resolved BTC to {}", resolved.symbol);

    let ticker = client.fetch_ticker(&resolved.symbol).await.unwrap();
    assert!(ticker.bid.unwrap_or(Decimal::ZERO) > Decimal::ZERO);
}
