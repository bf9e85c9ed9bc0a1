//! Canonical per-market state and its change notifications.
//!
//! [`MarketStateStore`] is mutated only by adapters applying parsed replies.
//! Every mutation replaces one slice of one market under the write lock and
//! publishes a [`StateChange`] scoped to that slice, so readers never observe
//! a half-applied update and subscribers never need to poll.
//!
//! Markets must be [tracked](MarketStateStore::track_market) before they
//! accept updates. Several exchanges may hold the same market id; its state
//! lives until the last of them [releases](MarketStateStore::release_market)
//! it. Once discarded, late completions for that market are dropped.

use crate::domain::{Balance, DepthBook, DepthLevel, OpenOrder, OpenOrders, Ticker, Trade, TradeHistory};
use crate::error::{ErrorKind, ExchangeError};
use crate::shared::{AssetId, MarketId, OrderId};
use async_lock::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default capacity of the notification channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// A change to one slice of one market, or a failure report.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    TickerUpdated {
        market: MarketId,
        ticker: Ticker,
    },
    DepthReplaced {
        market: MarketId,
    },
    TradesReplaced {
        market: MarketId,
    },
    BalanceUpdated {
        market: MarketId,
        asset: AssetId,
        balance: Balance,
    },
    CommissionUpdated {
        market: MarketId,
        commission: Decimal,
    },
    OrderAdded {
        market: MarketId,
        order: OpenOrder,
    },
    OrderUpdated {
        market: MarketId,
        order: OpenOrder,
    },
    OrderRemoved {
        market: MarketId,
        order_id: OrderId,
    },
    MarketDiscarded {
        market: MarketId,
    },
    /// A failure nobody awaited directly (e.g. a periodic poll), or one
    /// mirrored here for general error views.
    Error {
        market: Option<MarketId>,
        kind: ErrorKind,
        message: String,
    },
}

impl StateChange {
    pub fn market(&self) -> Option<&MarketId> {
        match self {
            Self::TickerUpdated { market, .. }
            | Self::DepthReplaced { market }
            | Self::TradesReplaced { market }
            | Self::BalanceUpdated { market, .. }
            | Self::CommissionUpdated { market, .. }
            | Self::OrderAdded { market, .. }
            | Self::OrderUpdated { market, .. }
            | Self::OrderRemoved { market, .. }
            | Self::MarketDiscarded { market } => Some(market),
            Self::Error { market, .. } => market.as_ref(),
        }
    }
}

/// Everything known about one market.
#[derive(Debug, Clone, Default)]
pub struct MarketState {
    pub ticker: Option<Ticker>,
    pub depth: DepthBook,
    pub trades: TradeHistory,
    pub balances: HashMap<AssetId, Balance>,
    pub open_orders: OpenOrders,
    pub commission: Option<Decimal>,
}

/// A tracked market and the number of exchanges holding it.
#[derive(Default)]
struct Tracked {
    holders: usize,
    state: MarketState,
}

struct Inner {
    markets: RwLock<HashMap<MarketId, Tracked>>,
    events: broadcast::Sender<StateChange>,
}

/// Shared handle to the state store. Clones share the same data.
#[derive(Clone)]
pub struct MarketStateStore {
    inner: Arc<Inner>,
}

impl Default for MarketStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl MarketStateStore {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                markets: RwLock::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Receive every change published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.inner.events.subscribe()
    }

    fn emit(&self, change: StateChange) {
        // No receivers is fine.
        let _ = self.inner.events.send(change);
    }

    /// Run `f` on a tracked market under the write lock. Untracked markets
    /// drop the update.
    async fn mutate<F>(&self, market: &MarketId, f: F) -> bool
    where
        F: FnOnce(&mut MarketState) -> Vec<StateChange>,
    {
        let mut markets = self.inner.markets.write().await;
        let Some(tracked) = markets.get_mut(market) else {
            tracing::debug!(market = %market, "Dropping update for untracked market");
            return false;
        };
        for change in f(&mut tracked.state) {
            self.emit(change);
        }
        true
    }

    async fn read<F, R>(&self, market: &MarketId, f: F) -> Option<R>
    where
        F: FnOnce(&MarketState) -> Option<R>,
    {
        self.inner
            .markets
            .read()
            .await
            .get(market)
            .and_then(|tracked| f(&tracked.state))
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Start accepting updates for `market` and add one holder. Existing
    /// state is kept.
    pub async fn track_market(&self, market: MarketId) {
        self.inner
            .markets
            .write()
            .await
            .entry(market)
            .or_default()
            .holders += 1;
    }

    /// Drop one holder of `market`. The state is discarded when the last
    /// holder releases it; returns whether that happened.
    pub async fn release_market(&self, market: &MarketId) -> bool {
        let mut markets = self.inner.markets.write().await;
        let Some(tracked) = markets.get_mut(market) else {
            return false;
        };
        tracked.holders = tracked.holders.saturating_sub(1);
        if tracked.holders > 0 {
            tracing::debug!(market = %market, holders = tracked.holders, "Released market");
            return false;
        }
        markets.remove(market);
        drop(markets);
        tracing::debug!(market = %market, "Discarded market state");
        self.emit(StateChange::MarketDiscarded {
            market: market.clone(),
        });
        true
    }

    pub async fn is_tracked(&self, market: &MarketId) -> bool {
        self.inner.markets.read().await.contains_key(market)
    }

    /// Drop all state for `market` regardless of holders; later updates for
    /// it are ignored.
    pub async fn discard_market(&self, market: &MarketId) -> bool {
        let mut markets = self.inner.markets.write().await;
        let removed = markets.remove(market).is_some();
        if removed {
            tracing::debug!(market = %market, "Discarded market state");
            self.emit(StateChange::MarketDiscarded {
                market: market.clone(),
            });
        }
        removed
    }

    // ── Mutators ─────────────────────────────────────────────────────────

    pub async fn set_ticker(&self, market: &MarketId, ticker: Ticker) -> bool {
        self.mutate(market, |state| {
            state.ticker = Some(ticker.clone());
            vec![StateChange::TickerUpdated {
                market: market.clone(),
                ticker,
            }]
        })
        .await
    }

    /// Replace both depth sides. No incremental merging. A snapshot that
    /// cannot be aggregated leaves the previous depth in place.
    pub async fn apply_depth_snapshot(
        &self,
        market: &MarketId,
        asks: Vec<DepthLevel>,
        bids: Vec<DepthLevel>,
    ) -> Result<bool, ExchangeError> {
        let book = DepthBook::from_levels(asks, bids)?;
        let applied = self
            .mutate(market, |state| {
                state.depth.replace(book);
                vec![StateChange::DepthReplaced {
                    market: market.clone(),
                }]
            })
            .await;
        Ok(applied)
    }

    pub async fn replace_trades(&self, market: &MarketId, trades: Vec<Trade>) -> bool {
        self.mutate(market, |state| {
            state.trades.replace(trades);
            vec![StateChange::TradesReplaced {
                market: market.clone(),
            }]
        })
        .await
    }

    pub async fn set_balance(&self, market: &MarketId, asset: AssetId, balance: Balance) -> bool {
        self.mutate(market, |state| {
            state.balances.insert(asset.clone(), balance);
            vec![StateChange::BalanceUpdated {
                market: market.clone(),
                asset,
                balance,
            }]
        })
        .await
    }

    pub async fn set_commission(&self, market: &MarketId, commission: Decimal) -> bool {
        self.mutate(market, |state| {
            state.commission = Some(commission);
            vec![StateChange::CommissionUpdated {
                market: market.clone(),
                commission,
            }]
        })
        .await
    }

    /// Insert or update one order. Only call after the backend confirmed it.
    pub async fn upsert_order(&self, order: OpenOrder) -> bool {
        let market = order.market.clone();
        self.mutate(&market, |state| {
            let change = if state.open_orders.upsert(order.clone()) {
                StateChange::OrderAdded {
                    market: market.clone(),
                    order,
                }
            } else {
                StateChange::OrderUpdated {
                    market: market.clone(),
                    order,
                }
            };
            vec![change]
        })
        .await
    }

    /// Remove one order after confirmed cancellation. Returns whether an
    /// entry existed; removing an unknown id changes nothing.
    pub async fn remove_order(&self, market: &MarketId, order_id: &OrderId) -> bool {
        let mut removed = false;
        self.mutate(market, |state| {
            if state.open_orders.remove(order_id).is_none() {
                return Vec::new();
            }
            removed = true;
            vec![StateChange::OrderRemoved {
                market: market.clone(),
                order_id: order_id.clone(),
            }]
        })
        .await;
        removed
    }

    /// Reconcile open orders against a full snapshot: orders no longer listed
    /// are removed (one notification each), listed orders are upserted.
    pub async fn replace_open_orders(&self, market: &MarketId, orders: Vec<OpenOrder>) -> bool {
        self.mutate(market, |state| {
            let (removed, added) = state.open_orders.reconcile(orders);
            let mut changes: Vec<StateChange> = removed
                .into_iter()
                .map(|order_id| StateChange::OrderRemoved {
                    market: market.clone(),
                    order_id,
                })
                .collect();
            changes.extend(added.into_iter().filter_map(|id| {
                state.open_orders.get(&id).map(|order| StateChange::OrderAdded {
                    market: market.clone(),
                    order: order.clone(),
                })
            }));
            changes
        })
        .await
    }

    /// Publish a failure on the general error channel.
    pub fn report_error(&self, market: Option<&MarketId>, err: &ExchangeError) {
        tracing::warn!(
            market = market.map(|m| m.as_str()).unwrap_or("-"),
            kind = %err.kind(),
            "{}",
            err
        );
        self.emit(StateChange::Error {
            market: market.cloned(),
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    // ── Readers ──────────────────────────────────────────────────────────

    pub async fn markets(&self) -> Vec<MarketId> {
        let mut out: Vec<MarketId> = self.inner.markets.read().await.keys().cloned().collect();
        out.sort();
        out
    }

    /// Copy of everything held for `market`.
    pub async fn snapshot(&self, market: &MarketId) -> Option<MarketState> {
        self.read(market, |s| Some(s.clone())).await
    }

    pub async fn ticker(&self, market: &MarketId) -> Option<Ticker> {
        self.read(market, |s| s.ticker.clone()).await
    }

    /// `(asks ascending, bids descending)`.
    pub async fn depth(&self, market: &MarketId) -> Option<(Vec<DepthLevel>, Vec<DepthLevel>)> {
        self.read(market, |s| Some((s.depth.asks(), s.depth.bids())))
            .await
    }

    pub async fn trades(&self, market: &MarketId) -> Vec<Trade> {
        self.read(market, |s| Some(s.trades.trades().iter().cloned().collect()))
            .await
            .unwrap_or_default()
    }

    pub async fn balance(&self, market: &MarketId, asset: &AssetId) -> Option<Balance> {
        self.read(market, |s| s.balances.get(asset).copied()).await
    }

    pub async fn commission(&self, market: &MarketId) -> Option<Decimal> {
        self.read(market, |s| s.commission).await
    }

    pub async fn open_orders(&self, market: &MarketId) -> Vec<OpenOrder> {
        self.read(market, |s| Some(s.open_orders.to_vec()))
            .await
            .unwrap_or_default()
    }

    pub async fn open_order(&self, market: &MarketId, order_id: &OrderId) -> Option<OpenOrder> {
        self.read(market, |s| s.open_orders.get(order_id).cloned())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Side;

    fn lv(price: i64, qty: i64) -> DepthLevel {
        DepthLevel::new(Decimal::from(price), Decimal::from(qty))
    }

    fn order(id: &str) -> OpenOrder {
        OpenOrder::new(
            OrderId::from(id),
            MarketId::from("X"),
            Side::Ask,
            Decimal::new(9999, 2),
            Decimal::new(15, 1),
        )
    }

    async fn store_with(market: &str) -> (MarketStateStore, MarketId) {
        let store = MarketStateStore::default();
        let market = MarketId::from(market);
        store.track_market(market.clone()).await;
        (store, market)
    }

    #[tokio::test]
    async fn test_depth_snapshot_round_trip() {
        let (store, m) = store_with("X").await;
        store
            .apply_depth_snapshot(&m, vec![lv(101, 3), lv(100, 2)], vec![lv(99, 5)])
            .await
            .unwrap();
        let (asks, bids) = store.depth(&m).await.unwrap();
        assert_eq!(asks, vec![lv(100, 2), lv(101, 3)]);
        assert_eq!(bids, vec![lv(99, 5)]);
    }

    #[tokio::test]
    async fn test_untracked_market_drops_updates() {
        let store = MarketStateStore::default();
        let m = MarketId::from("ghost");
        assert!(!store.set_ticker(&m, Ticker::default()).await);
        assert!(store.ticker(&m).await.is_none());
    }

    #[tokio::test]
    async fn test_discard_then_late_update_is_dropped() {
        let (store, m) = store_with("X").await;
        store.upsert_order(order("1")).await;
        let mut rx = store.subscribe();

        assert!(store.discard_market(&m).await);
        assert!(!store.remove_order(&m, &OrderId::from("1")).await);
        assert!(!store.upsert_order(order("2")).await);

        assert_eq!(
            rx.recv().await.unwrap(),
            StateChange::MarketDiscarded { market: m.clone() }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_release_discards_after_last_holder() {
        let (store, m) = store_with("X").await;
        store.track_market(m.clone()).await;
        store.set_ticker(&m, Ticker::default()).await;

        assert!(!store.release_market(&m).await);
        assert!(store.ticker(&m).await.is_some());
        assert!(store.set_ticker(&m, Ticker::default()).await);

        assert!(store.release_market(&m).await);
        assert!(!store.is_tracked(&m).await);
        assert!(!store.release_market(&m).await);
    }

    #[tokio::test]
    async fn test_order_lifecycle_notifications() {
        let (store, m) = store_with("X").await;
        let mut rx = store.subscribe();

        store.upsert_order(order("1")).await;
        assert!(store.remove_order(&m, &OrderId::from("1")).await);
        assert!(!store.remove_order(&m, &OrderId::from("1")).await);

        assert!(matches!(rx.recv().await.unwrap(), StateChange::OrderAdded { .. }));
        assert_eq!(
            rx.recv().await.unwrap(),
            StateChange::OrderRemoved {
                market: m.clone(),
                order_id: OrderId::from("1")
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_replace_open_orders_emits_one_removal_each() {
        let (store, m) = store_with("X").await;
        store.upsert_order(order("1")).await;
        store.upsert_order(order("2")).await;
        let mut rx = store.subscribe();

        store.replace_open_orders(&m, vec![order("2")]).await;
        assert_eq!(
            rx.recv().await.unwrap(),
            StateChange::OrderRemoved {
                market: m.clone(),
                order_id: OrderId::from("1")
            }
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(store.open_orders(&m).await.len(), 1);
    }

    #[tokio::test]
    async fn test_report_error_is_published() {
        let store = MarketStateStore::default();
        let mut rx = store.subscribe();
        store.report_error(None, &ExchangeError::Validation("bad".into()));
        match rx.recv().await.unwrap() {
            StateChange::Error { kind, message, .. } => {
                assert_eq!(kind, ErrorKind::Validation);
                assert!(message.contains("bad"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
