//! Single consumer of the event channel.
//!
//! The aggregator is the only writer of the [`MarketView`]. It applies events
//! in arrival order and publishes an `Arc<MarketView>` after every drained
//! batch; readers clone the `Arc` and never observe a half-applied update.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::arbitrage::{compute_spreads, SpreadOrder, SpreadRow};
use crate::feed::{EventReceiver, PriceEvent};
use crate::market::{Asset, ExchangeId};
use crate::metrics;

use super::view::{MarketView, Movement, Snapshot};

/// Maximum events applied before publishing.
const DRAIN_BATCH: usize = 256;

/// Owns the market view and applies price events to it.
pub struct Aggregator {
    events: EventReceiver,
    view: Arc<MarketView>,
    publisher: watch::Sender<Arc<MarketView>>,
}

impl Aggregator {
    /// Create an aggregator and the read handle for its view.
    pub fn new(events: EventReceiver) -> (Self, MarketHandle) {
        let view = Arc::new(MarketView::default());
        let (publisher, receiver) = watch::channel(Arc::clone(&view));
        (
            Self {
                events,
                view,
                publisher,
            },
            MarketHandle { view: receiver },
        )
    }

    /// Current (possibly unpublished) view.
    pub fn view(&self) -> &MarketView {
        &self.view
    }

    /// Apply one event. Returns `false` if it was discarded as stale.
    pub fn apply(&mut self, event: PriceEvent) -> bool {
        let view = Arc::make_mut(&mut self.view);
        let applied = apply_event(view, event);
        if applied {
            view.version += 1;
            metrics::inc_events_applied();
        } else {
            metrics::inc_events_discarded();
        }
        applied
    }

    /// Make the current view visible to readers.
    pub fn publish(&self) {
        self.publisher.send_replace(Arc::clone(&self.view));
    }

    /// Drain the channel until every sender is gone.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        info!("Aggregator started");
        let mut batch = Vec::with_capacity(DRAIN_BATCH);
        loop {
            if self.events.recv_many(&mut batch, DRAIN_BATCH).await == 0 {
                break;
            }
            for event in batch.drain(..) {
                self.apply(event);
            }
            self.publish();
        }
        info!(version = self.view.version, "Aggregator stopped");
    }
}

fn apply_event(view: &mut MarketView, event: PriceEvent) -> bool {
    match event {
        PriceEvent::PollerAttached { exchange, session } => {
            debug!(exchange = %exchange, session, "Poller attached");
            if let Some(previous) = view.sessions.insert(exchange.clone(), session) {
                if previous != session {
                    // The old session's detach may arrive later and be ignored.
                    evict(view, &exchange);
                    info!(
                        exchange = %exchange,
                        previous,
                        session,
                        "Evicted entries of replaced session"
                    );
                }
            }
            true
        }
        PriceEvent::PollerDetached { exchange, session } => {
            if view.sessions.get(&exchange) != Some(&session) {
                debug!(exchange = %exchange, session, "Ignoring detach of stale session");
                return false;
            }
            view.sessions.remove(&exchange);
            evict(view, &exchange);
            info!(exchange = %exchange, session, "Exchange evicted from snapshot");
            true
        }
        PriceEvent::PriceUpdate {
            exchange,
            session,
            asset,
            quote,
        } => {
            if view.sessions.get(&exchange) != Some(&session) {
                debug!(exchange = %exchange, session, asset = %asset, "Dropping stale update");
                return false;
            }

            let prior_bid = view
                .snapshot
                .get(&asset)
                .and_then(|quotes| quotes.get(&exchange))
                .and_then(|quote| quote.bid);
            view.previous_bids
                .entry(exchange.clone())
                .or_default()
                .insert(asset.clone(), prior_bid);

            if let Some(latency_ms) = quote.latency_ms {
                view.latency
                    .entry(exchange.clone())
                    .or_default()
                    .record(latency_ms);
            }

            view.snapshot.entry(asset).or_default().insert(exchange, quote);
            true
        }
    }
}

fn evict(view: &mut MarketView, exchange: &ExchangeId) {
    view.snapshot.retain(|_, quotes| {
        quotes.remove(exchange);
        !quotes.is_empty()
    });
    view.previous_bids.remove(exchange);
    view.latency.remove(exchange);
}

/// Cloneable read access to the published view.
#[derive(Debug, Clone)]
pub struct MarketHandle {
    view: watch::Receiver<Arc<MarketView>>,
}

impl MarketHandle {
    /// Latest published view.
    pub fn view(&self) -> Arc<MarketView> {
        self.view.borrow().clone()
    }

    /// Owned copy of the latest snapshot.
    pub fn snapshot_copy(&self) -> Snapshot {
        self.view().snapshot.clone()
    }

    /// Bid movement for a pair.
    pub fn movement(&self, asset: &Asset, exchange: &ExchangeId) -> Option<Movement> {
        self.view().movement(asset, exchange)
    }

    /// Mean fetch latency for an exchange.
    pub fn average_latency(&self, exchange: &ExchangeId) -> Option<f64> {
        self.view().average_latency(exchange)
    }

    /// Spread table between `a` and `b` on the latest view.
    pub fn compute_spreads(
        &self,
        universe: &[Asset],
        a: &ExchangeId,
        b: &ExchangeId,
        order: SpreadOrder,
    ) -> Vec<SpreadRow> {
        compute_spreads(&self.view().snapshot, universe, a, b, order)
    }

    /// Wait for the next publish. Returns `false` once the aggregator is gone.
    pub async fn changed(&mut self) -> bool {
        self.view.changed().await.is_ok()
    }
}
