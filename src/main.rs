//! Cross-exchange spread watcher entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spread_watch::api::{create_router, AppState};
use spread_watch::arbitrage::{log_spread_table, SpreadOrder};
use spread_watch::catalog::Catalog;
use spread_watch::config::Config;
use spread_watch::feed::{event_channel, JoinOutcome, Supervisor, SupervisorSettings};
use spread_watch::market::{Asset, ClientFactory, ExchangeId, MarketRegistry, RestClientFactory};
use spread_watch::metrics;
use spread_watch::snapshot::Aggregator;
use spread_watch::utils::{spawn_shutdown_listener, wait_for_shutdown};

/// Cross-exchange bid/ask poller and spread monitor.
#[derive(Parser, Debug)]
#[command(name = "spread-watch")]
#[command(about = "Polls exchanges for best bid/ask and reports cross-exchange spreads")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "LOG_JSON")]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,

    /// HTTP server port (overrides PORT).
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start pollers, the aggregator and the HTTP API (default).
    Run {
        /// HTTP server port (overrides PORT).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Load one exchange's catalog and show how each asset resolves.
    ListMarkets {
        /// Exchange id, e.g. binance.
        exchange: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("spread_watch=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    // Initialize metrics
    metrics::init_metrics();

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(),
        Some(Command::ListMarkets { exchange }) => cmd_list_markets(&exchange).await,
        Some(Command::Run { port }) => cmd_run(port.or(args.port)).await,
        None => cmd_run(args.port).await,
    }
}

/// Load and validate configuration.
fn load_config() -> anyhow::Result<Config> {
    let config = Config::load().context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("configuration validation failed: {e}"))?;
    Ok(config)
}

/// Assets from ASSETS, or the catalog's common assets for the selected exchanges.
fn resolve_universe(config: &Config) -> anyhow::Result<Vec<Asset>> {
    let assets = config.asset_list();
    if !assets.is_empty() {
        return Ok(assets);
    }

    let path = config
        .catalog_path
        .as_deref()
        .context("either ASSETS or CATALOG_PATH must be set")?;
    let catalog = Catalog::load(path)?;
    Ok(catalog.common_assets(&config.exchange_ids())?)
}

/// Check configuration validity.
fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("SPREAD WATCH - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    print!("Resolving asset universe... ");
    let universe = match resolve_universe(&config) {
        Ok(u) => {
            println!("OK ({} assets)", u.len());
            u
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {:#}", e);
            return Err(anyhow::anyhow!("Asset universe unavailable"));
        }
    };

    let overrides = config.interval_overrides().unwrap_or_default();
    let single = config.single_fetch_set();

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    for exchange in config.exchange_ids() {
        let interval = overrides
            .get(&exchange)
            .copied()
            .unwrap_or(config.poll_interval());
        let supported = RestClientFactory::supported().contains(&exchange.as_str());
        println!(
            "  {:<10} every {:>5}ms{}{}",
            exchange.to_string(),
            interval.as_millis(),
            if single.contains(&exchange) { ", single-fetch" } else { "" },
            if supported { "" } else { "  (NO CLIENT)" },
        );
    }
    println!(
        "  Assets: {}",
        universe
            .iter()
            .map(Asset::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  Stop tick: {}ms", config.stop_tick_ms);
    println!("  Join timeout: {}ms", config.join_timeout_ms);
    println!("  API port: {}", config.port);
    println!(
        "  Metrics: {}",
        if config.metrics_enabled {
            format!("enabled on :{}", config.metrics_port)
        } else {
            "disabled".to_string()
        }
    );
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Load one exchange's catalog and resolve the configured assets against it.
async fn cmd_list_markets(exchange: &str) -> anyhow::Result<()> {
    let config = load_config()?;
    let exchange = ExchangeId::new(exchange);
    let factory = RestClientFactory::new(&config)?;
    let client = factory
        .create(&exchange)
        .with_context(|| format!("unknown exchange: {exchange}"))?;

    let catalog = client.load_markets().await?;
    let spot = catalog.values().filter(|m| m.spot).count();
    let mut registry = MarketRegistry::new(exchange.clone(), catalog);

    println!("======================================================================");
    println!(
        "{} - {} markets ({} spot)",
        exchange.as_str().to_uppercase(),
        registry.market_count(),
        spot
    );
    println!("======================================================================");

    let universe = resolve_universe(&config).unwrap_or_default();
    if universe.is_empty() {
        println!("No assets configured; set ASSETS or CATALOG_PATH to resolve symbols.");
    }
    for asset in &universe {
        match registry.resolve(asset) {
            Some(resolved) => println!("  {:<8} -> {}", asset.as_str(), resolved.symbol),
            None => println!("  {:<8} -> no market", asset.as_str()),
        }
    }

    Ok(())
}

/// Run pollers, the aggregator and the HTTP API until shutdown.
async fn cmd_run(port_override: Option<u16>) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let mut config = load_config().map_err(|e| {
        error!("{:#}", e);
        e
    })?;
    if let Some(port) = port_override {
        config.port = port;
    }

    let universe = resolve_universe(&config)?;
    let exchanges = config.exchange_ids();
    info!(
        assets = universe.len(),
        exchanges = exchanges.len(),
        "Configuration loaded successfully"
    );

    if config.metrics_enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!("Metrics exporter listening on {}", addr);
    }

    let shutdown = spawn_shutdown_listener();

    // Aggregator
    let (events, receiver) = event_channel();
    let (aggregator, market) = Aggregator::new(receiver);
    tokio::spawn(aggregator.run());

    // Pollers
    let factory = RestClientFactory::new(&config)?;
    let settings = SupervisorSettings::from_config(&config)?;
    let supervisor = Arc::new(Supervisor::new(
        Arc::new(factory),
        settings,
        universe.clone(),
        events,
    ));
    for exchange in &exchanges {
        supervisor.add_exchange(exchange)?;
    }

    let pair = match exchanges.as_slice() {
        [a, b, ..] => Some((a.clone(), b.clone())),
        _ => {
            warn!("Fewer than two exchanges selected; spreads unavailable");
            None
        }
    };

    // HTTP server
    let universe: Arc<[Asset]> = universe.into();
    let app_state = AppState::new(
        market.clone(),
        Arc::clone(&universe),
        pair.clone(),
        Arc::clone(&supervisor),
    );
    app_state.set_ready(true);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let router = create_router(app_state);
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(wait_for_shutdown(server_shutdown))
            .await
    });

    // Periodic spread display
    let mut display = tokio::time::interval(config.display_refresh());
    let stop = wait_for_shutdown(shutdown);
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = display.tick() => {
                if let Some((a, b)) = &pair {
                    let rows = market.compute_spreads(&universe, a, b, SpreadOrder::default());
                    log_spread_table(a, b, &rows, config.display_rows);
                }
            }
            _ = &mut stop => break,
        }
    }

    info!("Stopping pollers...");
    for (exchange, outcome) in supervisor.stop_all().await {
        if outcome != JoinOutcome::Stopped {
            warn!(exchange = %exchange, outcome = ?outcome, "Poller did not stop cleanly");
        }
    }

    if let Err(e) = server.await? {
        error!("HTTP server error: {}", e);
    }

    let view = market.view();
    info!(
        events = view.version,
        overall_latency_ms = ?view.overall_average_latency(),
        "Shutdown complete"
    );
    Ok(())
}
