//! Reference-counted polling of recurring feeds.
//!
//! [`SubscriptionCounter`] is the pure bookkeeping: it reports when interest
//! in a `(market, feed)` pair crosses 0↔1 and rejects unbalanced
//! unsubscribes. [`Feeds`] acts on those transitions by starting and stopping
//! one poll task per active pair.

use crate::adapter::{refresh_feed, Exchange};
use crate::error::SubscriptionError;
use crate::network::{DEFAULT_DEPTH_INTERVAL, DEFAULT_TICKER_INTERVAL, DEFAULT_TRADES_INTERVAL};
use crate::shared::{millis, FeedKind, MarketId};
use crate::state::MarketStateStore;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

// ─── SubscriptionCounter ─────────────────────────────────────────────────────

/// Outcome of a subscribe or unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Count went 0 → 1: start polling.
    Started,
    /// Count went 1 → 0: stop polling.
    Stopped,
    Unchanged,
}

/// Interest counts per `(market, feed)`.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionCounter {
    counts: HashMap<(MarketId, FeedKind), usize>,
}

impl SubscriptionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, market: &MarketId, feed: FeedKind) -> Transition {
        let count = self.counts.entry((market.clone(), feed)).or_insert(0);
        *count += 1;
        if *count == 1 {
            Transition::Started
        } else {
            Transition::Unchanged
        }
    }

    /// Decrement. Unsubscribing with no active subscription is a caller bug
    /// and is rejected rather than clamped.
    pub fn unsubscribe(
        &mut self,
        market: &MarketId,
        feed: FeedKind,
    ) -> Result<Transition, SubscriptionError> {
        let key = (market.clone(), feed);
        match self.counts.get_mut(&key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                Ok(Transition::Unchanged)
            }
            Some(_) => {
                self.counts.remove(&key);
                Ok(Transition::Stopped)
            }
            None => Err(SubscriptionError::NotSubscribed {
                market: market.clone(),
                feed,
            }),
        }
    }

    pub fn count(&self, market: &MarketId, feed: FeedKind) -> usize {
        self.counts
            .get(&(market.clone(), feed))
            .copied()
            .unwrap_or(0)
    }

    pub fn is_active(&self, market: &MarketId, feed: FeedKind) -> bool {
        self.count(market, feed) > 0
    }

    /// Active pairs, sorted.
    pub fn active(&self) -> Vec<(MarketId, FeedKind)> {
        let mut out: Vec<_> = self.counts.keys().cloned().collect();
        out.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.as_str().cmp(b.1.as_str())));
        out
    }
}

// ─── FeedConfig ──────────────────────────────────────────────────────────────

/// Poll intervals per feed kind.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    #[serde(with = "crate::shared::serde_util::duration_ms")]
    pub ticker: Duration,
    #[serde(with = "crate::shared::serde_util::duration_ms")]
    pub depth: Duration,
    #[serde(with = "crate::shared::serde_util::duration_ms")]
    pub trades: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ticker: DEFAULT_TICKER_INTERVAL,
            depth: DEFAULT_DEPTH_INTERVAL,
            trades: DEFAULT_TRADES_INTERVAL,
        }
    }
}

impl FeedConfig {
    pub fn interval(&self, feed: FeedKind) -> Duration {
        match feed {
            FeedKind::Ticker => self.ticker,
            FeedKind::Depth => self.depth,
            FeedKind::Trades => self.trades,
        }
    }

    pub fn set_interval(&mut self, feed: FeedKind, every: Duration) {
        match feed {
            FeedKind::Ticker => self.ticker = every,
            FeedKind::Depth => self.depth = every,
            FeedKind::Trades => self.trades = every,
        }
    }
}

// ─── Feeds ───────────────────────────────────────────────────────────────────

struct FeedState {
    counter: SubscriptionCounter,
    config: FeedConfig,
    timers: HashMap<(MarketId, FeedKind), JoinHandle<()>>,
}

/// Poll scheduler for one exchange. Must be used inside a tokio runtime.
pub struct Feeds {
    exchange: Arc<dyn Exchange>,
    store: MarketStateStore,
    state: Mutex<FeedState>,
}

impl Feeds {
    pub fn new(exchange: Arc<dyn Exchange>, store: MarketStateStore, config: FeedConfig) -> Self {
        Self {
            exchange,
            store,
            state: Mutex::new(FeedState {
                counter: SubscriptionCounter::new(),
                config,
                timers: HashMap::new(),
            }),
        }
    }

    pub fn subscribe(&self, market: &MarketId, feed: FeedKind) -> Transition {
        let mut state = self.lock();
        let transition = state.counter.subscribe(market, feed);
        if transition == Transition::Started {
            let every = state.config.interval(feed);
            let handle = self.spawn_poll(market.clone(), feed, every);
            state.timers.insert((market.clone(), feed), handle);
        }
        transition
    }

    pub fn unsubscribe(
        &self,
        market: &MarketId,
        feed: FeedKind,
    ) -> Result<Transition, SubscriptionError> {
        let mut state = self.lock();
        let transition = state.counter.unsubscribe(market, feed)?;
        if transition == Transition::Stopped {
            if let Some(handle) = state.timers.remove(&(market.clone(), feed)) {
                handle.abort();
            }
            tracing::debug!(
                exchange = self.exchange.name(),
                market = %market,
                feed = %feed,
                "Stopped polling"
            );
        }
        Ok(transition)
    }

    /// Change a feed kind's interval. Running timers of that kind are
    /// re-armed at the new interval; subscriber counts are untouched.
    pub fn set_interval(&self, feed: FeedKind, every: Duration) {
        let mut state = self.lock();
        state.config.set_interval(feed, every);
        let rearm: Vec<MarketId> = state
            .timers
            .keys()
            .filter(|(_, f)| *f == feed)
            .map(|(m, _)| m.clone())
            .collect();
        for market in rearm {
            if let Some(old) = state.timers.remove(&(market.clone(), feed)) {
                old.abort();
            }
            let handle = self.spawn_poll(market.clone(), feed, every);
            state.timers.insert((market, feed), handle);
        }
    }

    pub fn interval(&self, feed: FeedKind) -> Duration {
        self.lock().config.interval(feed)
    }

    pub fn count(&self, market: &MarketId, feed: FeedKind) -> usize {
        self.lock().counter.count(market, feed)
    }

    /// Whether a poll task is running for the pair.
    pub fn is_polling(&self, market: &MarketId, feed: FeedKind) -> bool {
        self.lock()
            .timers
            .get(&(market.clone(), feed))
            .is_some_and(|h| !h.is_finished())
    }

    /// Abort every poll task and forget all counts.
    pub fn stop_all(&self) {
        let mut state = self.lock();
        for (_, handle) in state.timers.drain() {
            handle.abort();
        }
        state.counter = SubscriptionCounter::new();
    }

    fn spawn_poll(&self, market: MarketId, feed: FeedKind, every: Duration) -> JoinHandle<()> {
        let every = every.max(Duration::from_millis(1));
        tracing::debug!(
            exchange = self.exchange.name(),
            market = %market,
            feed = %feed,
            interval_ms = millis(every),
            "Polling started"
        );
        let exchange = Arc::clone(&self.exchange);
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = refresh_feed(exchange.as_ref(), &market, feed).await {
                    store.report_error(Some(&market), &e);
                }
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Feeds {
    fn drop(&mut self) {
        self.stop_all();
    }
}
