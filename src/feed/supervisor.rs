//! Owns the running pollers: at most one per exchange.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{SupervisorError, WatchError};
use crate::market::{Asset, ClientFactory, ExchangeId, FetchStrategy};
use crate::metrics;

use super::events::{EventSender, PriceEvent, SessionId};
use super::poller::{
    duration_ms, JoinOutcome, Poller, PollerHandle, PollerSettings, PollerState,
};

/// Cadence and shutdown settings applied to every poller.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Interval for exchanges without an override.
    pub default_interval: Duration,
    /// Per-exchange interval overrides.
    pub interval_overrides: HashMap<ExchangeId, Duration>,
    /// Stop-check granularity.
    pub tick: Duration,
    /// Join timeout per poller on removal.
    pub join_timeout: Duration,
    /// Exchanges forced onto single-symbol fetching.
    pub single_fetch: HashSet<ExchangeId>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(2),
            interval_overrides: HashMap::new(),
            tick: Duration::from_millis(100),
            join_timeout: Duration::from_secs(1),
            single_fetch: HashSet::new(),
        }
    }
}

impl SupervisorSettings {
    /// Build settings from validated configuration.
    pub fn from_config(config: &Config) -> Result<Self, WatchError> {
        Ok(Self {
            default_interval: config.poll_interval(),
            interval_overrides: config
                .interval_overrides()
                .map_err(WatchError::InvalidConfig)?,
            tick: config.stop_tick(),
            join_timeout: config.join_timeout(),
            single_fetch: config.single_fetch_set(),
        })
    }

    /// Cycle interval for `exchange`.
    pub fn interval_for(&self, exchange: &ExchangeId) -> Duration {
        self.interval_overrides
            .get(exchange)
            .copied()
            .unwrap_or(self.default_interval)
    }

    /// Fetch strategy for `exchange` given what its client supports.
    pub fn strategy_for(&self, exchange: &ExchangeId, capability: FetchStrategy) -> FetchStrategy {
        if self.single_fetch.contains(exchange) {
            FetchStrategy::Single
        } else {
            capability
        }
    }

    fn poller_settings(&self, exchange: &ExchangeId) -> PollerSettings {
        PollerSettings {
            interval: self.interval_for(exchange),
            tick: self.tick,
        }
    }
}

/// Starts and stops pollers.
pub struct Supervisor {
    factory: Arc<dyn ClientFactory>,
    settings: SupervisorSettings,
    assets: Arc<[Asset]>,
    events: EventSender,
    active: DashMap<ExchangeId, PollerHandle>,
    next_session: AtomicU64,
}

impl Supervisor {
    /// Create a supervisor polling `assets` and sending into `events`.
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        settings: SupervisorSettings,
        assets: Vec<Asset>,
        events: EventSender,
    ) -> Self {
        Self {
            factory,
            settings,
            assets: assets.into(),
            events,
            active: DashMap::new(),
            next_session: AtomicU64::new(0),
        }
    }

    /// Asset universe shared by all pollers.
    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    /// Start polling `exchange`.
    ///
    /// Returns `Ok(false)` without side effects when a poller for it is
    /// already running.
    pub fn add_exchange(&self, exchange: &ExchangeId) -> Result<bool, SupervisorError> {
        let slot = match self.active.entry(exchange.clone()) {
            Entry::Occupied(_) => {
                warn!(exchange = %exchange, "Poller already running; ignoring add");
                return Ok(false);
            }
            Entry::Vacant(slot) => slot,
        };

        let client = self
            .factory
            .create(exchange)
            .ok_or_else(|| SupervisorError::UnknownExchange(exchange.clone()))?;

        let session: SessionId = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        let strategy = self.settings.strategy_for(exchange, client.capability());

        self.events
            .send(PriceEvent::PollerAttached {
                exchange: exchange.clone(),
                session,
            })
            .map_err(|_| SupervisorError::EventChannelClosed)?;

        let poller = Poller::new(
            session,
            client,
            strategy,
            Arc::clone(&self.assets),
            self.settings.poller_settings(exchange),
            self.events.clone(),
        );
        slot.insert(poller.spawn());

        metrics::set_active_pollers(self.active.len());
        info!(exchange = %exchange, session, strategy = %strategy, "Exchange added");
        Ok(true)
    }

    /// Stop polling `exchange`, waiting up to the join timeout.
    ///
    /// Returns `None` when no poller was running for it.
    pub async fn remove_exchange(&self, exchange: &ExchangeId) -> Option<JoinOutcome> {
        let Some((_, handle)) = self.active.remove(exchange) else {
            warn!(exchange = %exchange, "No poller running; ignoring remove");
            return None;
        };
        metrics::set_active_pollers(self.active.len());

        handle.request_stop();
        let session = handle.session();
        let outcome = handle.join(self.settings.join_timeout).await;
        self.finish(exchange, session, &outcome);
        Some(outcome)
    }

    /// Stop every poller: signal all first, then join all concurrently.
    pub async fn stop_all(&self) -> Vec<(ExchangeId, JoinOutcome)> {
        let exchanges: Vec<ExchangeId> = self.active.iter().map(|e| e.key().clone()).collect();
        let handles: Vec<PollerHandle> = exchanges
            .iter()
            .filter_map(|exchange| self.active.remove(exchange).map(|(_, handle)| handle))
            .collect();
        metrics::set_active_pollers(self.active.len());

        for handle in &handles {
            handle.request_stop();
        }

        let timeout = self.settings.join_timeout;
        let joined = join_all(handles.into_iter().map(|handle| async move {
            let exchange = handle.exchange().clone();
            let session = handle.session();
            (exchange, session, handle.join(timeout).await)
        }))
        .await;

        joined
            .into_iter()
            .map(|(exchange, session, outcome)| {
                self.finish(&exchange, session, &outcome);
                (exchange, outcome)
            })
            .collect()
    }

    fn finish(&self, exchange: &ExchangeId, session: SessionId, outcome: &JoinOutcome) {
        match outcome {
            JoinOutcome::Stopped => info!(exchange = %exchange, session, "Poller joined"),
            JoinOutcome::Abandoned => {
                warn!(
                    exchange = %exchange,
                    session,
                    timeout_ms = duration_ms(self.settings.join_timeout),
                    "Poller did not stop in time; abandoning"
                );
                metrics::inc_pollers_abandoned(exchange);
            }
            JoinOutcome::Failed(reason) => {
                error!(exchange = %exchange, session, reason = %reason, "Poller task failed")
            }
        }

        // Eviction is keyed by session, so an abandoned poller's late events are dropped.
        if self
            .events
            .send(PriceEvent::PollerDetached {
                exchange: exchange.clone(),
                session,
            })
            .is_err()
        {
            warn!(exchange = %exchange, "Event channel closed; detach not delivered");
        }
    }

    /// Wake every poller so its next cycle starts immediately.
    pub fn force_refresh_all(&self) {
        for entry in self.active.iter() {
            entry.value().force_refresh();
        }
        info!(pollers = self.active.len(), "Forced refresh");
    }

    /// Exchanges with a running poller, sorted.
    pub fn active_exchanges(&self) -> Vec<ExchangeId> {
        let mut exchanges: Vec<ExchangeId> =
            self.active.iter().map(|e| e.key().clone()).collect();
        exchanges.sort();
        exchanges
    }

    /// Lifecycle state of the poller for `exchange`.
    pub fn state_of(&self, exchange: &ExchangeId) -> Option<PollerState> {
        self.active.get(exchange).map(|handle| handle.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::events::{event_channel, EventReceiver};
    use crate::market::{MockClientFactory, MockExchangeClient};
    use rust_decimal_macros::dec;

    fn supervisor(settings: SupervisorSettings) -> (Supervisor, EventReceiver) {
        let binance = MockExchangeClient::builder("binance")
            .quote("BTC", "USDT", dec!(1), dec!(2))
            .build();
        let kraken = MockExchangeClient::builder("kraken")
            .quote("BTC", "USD", dec!(1), dec!(2))
            .build();
        let factory = MockClientFactory::new()
            .with_client(Arc::new(binance))
            .with_client(Arc::new(kraken));
        let (tx, rx) = event_channel();
        let supervisor = Supervisor::new(Arc::new(factory), settings, vec![Asset::new("BTC")], tx);
        (supervisor, rx)
    }

    #[test]
    fn settings_resolve_overrides_and_forced_single() {
        let mut settings = SupervisorSettings::default();
        settings
            .interval_overrides
            .insert(ExchangeId::new("kraken"), Duration::from_secs(3));
        settings.single_fetch.insert(ExchangeId::new("bitfinex"));

        assert_eq!(
            settings.interval_for(&ExchangeId::new("kraken")),
            Duration::from_secs(3)
        );
        assert_eq!(
            settings.interval_for(&ExchangeId::new("binance")),
            Duration::from_secs(2)
        );
        assert_eq!(
            settings.strategy_for(&ExchangeId::new("bitfinex"), FetchStrategy::Batch),
            FetchStrategy::Single
        );
        assert_eq!(
            settings.strategy_for(&ExchangeId::new("binance"), FetchStrategy::Batch),
            FetchStrategy::Batch
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_add_is_a_no_op() {
        let (supervisor, mut rx) = supervisor(SupervisorSettings::default());
        let binance = ExchangeId::new("binance");

        assert_eq!(supervisor.add_exchange(&binance), Ok(true));
        assert_eq!(supervisor.add_exchange(&binance), Ok(false));
        assert_eq!(supervisor.active_exchanges(), vec![binance.clone()]);

        let attached = rx.recv().await;
        assert_eq!(
            attached,
            Some(PriceEvent::PollerAttached {
                exchange: binance,
                session: 1
            })
        );

        supervisor.stop_all().await;
    }

    #[tokio::test]
    async fn unknown_exchange_is_rejected() {
        let (supervisor, _rx) = supervisor(SupervisorSettings::default());
        let unknown = ExchangeId::new("nowhere");

        assert_eq!(
            supervisor.add_exchange(&unknown),
            Err(SupervisorError::UnknownExchange(unknown))
        );
        assert!(supervisor.active_exchanges().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn remove_emits_detach_with_session() {
        let (supervisor, mut rx) = supervisor(SupervisorSettings::default());
        let kraken = ExchangeId::new("kraken");
        supervisor.add_exchange(&kraken).unwrap();

        let outcome = supervisor.remove_exchange(&kraken).await;
        assert_eq!(outcome, Some(JoinOutcome::Stopped));
        assert!(supervisor.remove_exchange(&kraken).await.is_none());

        let mut detached = None;
        while let Ok(event) = rx.try_recv() {
            if let PriceEvent::PollerDetached { session, .. } = event {
                detached = Some(session);
            }
        }
        assert_eq!(detached, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_joins_every_poller() {
        let (supervisor, _rx) = supervisor(SupervisorSettings::default());
        supervisor.add_exchange(&ExchangeId::new("binance")).unwrap();
        supervisor.add_exchange(&ExchangeId::new("kraken")).unwrap();

        let outcomes = supervisor.stop_all().await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|(_, outcome)| *outcome == JoinOutcome::Stopped));
        assert!(supervisor.active_exchanges().is_empty());
    }
}
