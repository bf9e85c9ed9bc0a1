//! High-level client: `DojimaClient` with an explicit exchange registry.
//!
//! The client owns the shared pieces every adapter needs (the dispatcher and
//! the state store) and the poll scheduler of each registered exchange.
//! Exchanges are registered and removed explicitly; there is no global
//! registry.

use crate::adapter::ledger::{LedgerConfig, LedgerExchange, LedgerSession};
use crate::adapter::Exchange;
use crate::error::ExchangeError;
use crate::feed::{FeedConfig, Feeds, Transition};
use crate::http::{DispatcherConfig, DispatcherHandle};
use crate::request::ThrottleConfig;
use crate::shared::{FeedKind, HostId, MarketId};
use crate::state::{MarketStateStore, StateChange, DEFAULT_EVENT_CAPACITY};

use async_lock::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct Registered {
    exchange: Arc<dyn Exchange>,
    feeds: Feeds,
}

#[derive(Default)]
struct Registry {
    exchanges: HashMap<String, Registered>,
}

/// The primary entry point: one dispatcher, one state store, many exchanges.
///
/// Cloning is cheap; clones share everything.
#[derive(Clone)]
pub struct DojimaClient {
    dispatcher: DispatcherHandle,
    store: MarketStateStore,
    feed_config: Arc<RwLock<FeedConfig>>,
    throttles: Arc<HashMap<HostId, ThrottleConfig>>,
    registry: Arc<RwLock<Registry>>,
}

impl DojimaClient {
    pub fn builder() -> DojimaClientBuilder {
        DojimaClientBuilder::default()
    }

    pub fn store(&self) -> &MarketStateStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &DispatcherHandle {
        &self.dispatcher
    }

    /// Every state change and unsolicited failure from now on.
    pub fn events(&self) -> broadcast::Receiver<StateChange> {
        self.store.subscribe()
    }

    // ── Registry ─────────────────────────────────────────────────────────

    /// Add an exchange built on this client's dispatcher and store. Its
    /// markets start accepting state updates.
    pub async fn register(&self, exchange: Arc<dyn Exchange>) -> Result<(), ExchangeError> {
        let name = exchange.name().to_string();
        let mut registry = self.registry.write().await;
        if registry.exchanges.contains_key(&name) {
            return Err(ExchangeError::Validation(format!(
                "exchange {name} is already registered"
            )));
        }
        for market in exchange.markets() {
            self.store.track_market(market).await;
        }
        // Host overrides win over adapter defaults.
        for (host, config) in self.throttles.iter() {
            self.dispatcher.configure_host(host.clone(), config.clone());
        }
        let feeds = Feeds::new(
            Arc::clone(&exchange),
            self.store.clone(),
            self.feed_config.read().await.clone(),
        );
        tracing::info!(exchange = %name, markets = exchange.markets().len(), "Registered exchange");
        registry.exchanges.insert(name, Registered { exchange, feeds });
        Ok(())
    }

    /// Build, register, and return a ledger-protocol exchange.
    pub async fn add_ledger(
        &self,
        mut config: LedgerConfig,
        session: Arc<dyn LedgerSession>,
    ) -> Result<Arc<LedgerExchange>, ExchangeError> {
        if let Some(throttle) = self.throttles.get(&config.server_id) {
            config.throttle = throttle.clone();
        }
        let exchange = Arc::new(LedgerExchange::new(
            config,
            self.dispatcher.clone(),
            self.store.clone(),
            session,
        ));
        self.register(exchange.clone()).await?;
        Ok(exchange)
    }

    /// Build, register, and return a REST exchange over HTTP.
    #[cfg(feature = "http")]
    pub async fn add_rest(
        &self,
        mut config: crate::adapter::rest::RestConfig,
        credentials: Option<crate::auth::Credentials>,
    ) -> Result<Arc<crate::adapter::rest::RestExchange>, ExchangeError> {
        if let Some(throttle) = self.throttles.get(&config.host) {
            config.throttle = throttle.clone();
        }
        let exchange = Arc::new(crate::adapter::rest::RestExchange::connect(
            config,
            self.dispatcher.clone(),
            self.store.clone(),
            credentials,
        )?);
        self.register(exchange.clone()).await?;
        Ok(exchange)
    }

    /// Stop an exchange's polling and release its markets. State of a market
    /// no other exchange holds is dropped; replies still in flight for it are
    /// discarded when they land.
    pub async fn remove(&self, name: &str) -> Result<(), ExchangeError> {
        let removed = self.registry.write().await.exchanges.remove(name);
        let Some(registered) = removed else {
            return Err(ExchangeError::UnknownExchange(name.to_string()));
        };
        registered.feeds.stop_all();
        for market in registered.exchange.markets() {
            self.store.release_market(&market).await;
        }
        tracing::info!(exchange = %name, "Removed exchange");
        Ok(())
    }

    pub async fn exchange(&self, name: &str) -> Result<Arc<dyn Exchange>, ExchangeError> {
        self.registry
            .read()
            .await
            .exchanges
            .get(name)
            .map(|r| Arc::clone(&r.exchange))
            .ok_or_else(|| ExchangeError::UnknownExchange(name.to_string()))
    }

    /// Registered exchange names, sorted.
    pub async fn exchanges(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.read().await.exchanges.keys().cloned().collect();
        names.sort();
        names
    }

    // ── Feeds ────────────────────────────────────────────────────────────

    /// Register interest in a polled feed. The first subscriber starts the
    /// poll timer.
    pub async fn subscribe(
        &self,
        exchange: &str,
        market: &MarketId,
        feed: FeedKind,
    ) -> Result<Transition, ExchangeError> {
        let registry = self.registry.read().await;
        let registered = lookup(&registry, exchange)?;
        if !registered.exchange.markets().contains(market) {
            return Err(ExchangeError::UnknownMarket(market.clone()));
        }
        Ok(registered.feeds.subscribe(market, feed))
    }

    /// Drop interest in a polled feed. The last unsubscribe stops the timer;
    /// one more than there were subscribes is an error.
    pub async fn unsubscribe(
        &self,
        exchange: &str,
        market: &MarketId,
        feed: FeedKind,
    ) -> Result<Transition, ExchangeError> {
        let registry = self.registry.read().await;
        Ok(lookup(&registry, exchange)?.feeds.unsubscribe(market, feed)?)
    }

    pub async fn subscriber_count(&self, exchange: &str, market: &MarketId, feed: FeedKind) -> usize {
        let registry = self.registry.read().await;
        lookup(&registry, exchange)
            .map(|r| r.feeds.count(market, feed))
            .unwrap_or(0)
    }

    /// Whether a poll timer is running for the feed.
    pub async fn is_polling(&self, exchange: &str, market: &MarketId, feed: FeedKind) -> bool {
        let registry = self.registry.read().await;
        lookup(&registry, exchange)
            .map(|r| r.feeds.is_polling(market, feed))
            .unwrap_or(false)
    }

    /// Change a feed kind's poll interval for every exchange, now and later.
    /// Active timers are re-armed; subscriber counts are kept.
    pub async fn set_interval(&self, feed: FeedKind, every: Duration) {
        self.feed_config.write().await.set_interval(feed, every);
        for registered in self.registry.read().await.exchanges.values() {
            registered.feeds.set_interval(feed, every);
        }
    }

    pub async fn interval(&self, feed: FeedKind) -> Duration {
        self.feed_config.read().await.interval(feed)
    }

    /// Stop every feed and the dispatcher. Queued requests fail with
    /// `Shutdown`.
    pub async fn shutdown(&self) {
        let mut registry = self.registry.write().await;
        for (_, registered) in registry.exchanges.drain() {
            registered.feeds.stop_all();
        }
        self.dispatcher.shutdown();
    }
}

fn lookup<'a>(registry: &'a Registry, name: &str) -> Result<&'a Registered, ExchangeError> {
    registry
        .exchanges
        .get(name)
        .ok_or_else(|| ExchangeError::UnknownExchange(name.to_string()))
}

// ═════════════════════════════════════════════════════════════════════════════
// Builder
// ═════════════════════════════════════════════════════════════════════════════

pub struct DojimaClientBuilder {
    dispatcher: DispatcherConfig,
    throttles: HashMap<HostId, ThrottleConfig>,
    feeds: FeedConfig,
    event_capacity: usize,
}

impl Default for DojimaClientBuilder {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            throttles: HashMap::new(),
            feeds: FeedConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl DojimaClientBuilder {
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.dispatcher.request_timeout = timeout;
        self
    }

    /// Limits for hosts that bring none of their own.
    pub fn default_throttle(mut self, config: ThrottleConfig) -> Self {
        self.dispatcher.default_throttle = config;
        self
    }

    /// Limits for one host, overriding what its adapter asks for.
    pub fn throttle(mut self, host: impl Into<HostId>, config: ThrottleConfig) -> Self {
        self.throttles.insert(host.into(), config);
        self
    }

    pub fn feeds(mut self, config: FeedConfig) -> Self {
        self.feeds = config;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Spawn the dispatcher. Must be called inside a tokio runtime.
    pub fn build(self) -> DojimaClient {
        DojimaClient {
            dispatcher: DispatcherHandle::spawn(self.dispatcher),
            store: MarketStateStore::new(self.event_capacity),
            feed_config: Arc::new(RwLock::new(self.feeds)),
            throttles: Arc::new(self.throttles),
            registry: Arc::new(RwLock::new(Registry::default())),
        }
    }
}
