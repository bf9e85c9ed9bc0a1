//! Ledger-protocol backend: a session-oriented server with per-session
//! request numbers and a pool of single-use transaction numbers.
//!
//! Every call goes through the server's host queue. A call the server
//! rejects as out of sequence is resequenced once (one `GetRequestNumber` at
//! priority 0) and retried once. A second consecutive sequence failure marks
//! the session lost: every later call fails with
//! [`ExchangeError::SequenceLost`] until [`LedgerExchange::reset_session`].
//!
//! Order placement additionally walks the state machine
//!
//! ```text
//! Idle -> CheckingNumberPool -> Replenishing? -> Submitting
//!      -> Confirmed | Resequencing -> Submitting (once) | Failed
//! ```
//!
//! so an offer is never issued while the transaction-number pool is below
//! the low-water mark.

pub mod convert;
pub mod session;
pub mod wire;

pub use session::{LedgerFault, LedgerSession, LedgerTransport};

use crate::adapter::{decode, Exchange, OrderRequest};
use crate::domain::{Balance, OpenOrder};
use crate::error::{ExchangeError, TransportError};
use crate::http::{DispatcherHandle, RetryPolicy};
use crate::request::{LedgerOp, RequestEnvelope, ThrottleConfig};
use crate::shared::{format_decimal, AssetId, HostId, MarketId, OrderId, Side};
use crate::state::MarketStateStore;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const PRIORITY_SEQUENCE: u8 = 0;
const PRIORITY_CANCEL: u8 = 0;
const PRIORITY_PLACE: u8 = 1;
const PRIORITY_ACCOUNT: u8 = 2;
const PRIORITY_MARKET: u8 = 3;

/// Offers are issued in whole increments of the market scale.
const MINIMUM_INCREMENT: Decimal = Decimal::ONE;

// ─── Configuration ───────────────────────────────────────────────────────────

/// One market on the ledger server and the accounts used to trade it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LedgerMarket {
    pub market_id: MarketId,
    /// Asset type id of the base asset.
    pub base_asset: AssetId,
    /// Asset type id of the counter currency.
    pub counter_asset: AssetId,
    pub base_account: String,
    pub counter_account: String,
    #[serde(default = "default_scale")]
    pub scale: u64,
}

fn default_scale() -> u64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Registry name.
    pub name: String,
    /// Server identity; also the throttle host.
    pub server_id: HostId,
    pub nym_id: String,
    pub markets: Vec<LedgerMarket>,
    /// Replenish transaction numbers before placing when the pool is below this.
    pub low_water_mark: usize,
    /// Offers requested per side when refreshing depth.
    pub max_depth: usize,
    pub throttle: ThrottleConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            name: "ledger".to_string(),
            server_id: HostId::from("ledger"),
            nym_id: String::new(),
            markets: Vec::new(),
            low_water_mark: 3,
            max_depth: 256,
            throttle: ThrottleConfig::default(),
        }
    }
}

// ─── Placement state machine ─────────────────────────────────────────────────

#[derive(Debug)]
enum Placement {
    Idle,
    CheckingNumberPool,
    Replenishing,
    Submitting { resequenced: bool },
    Resequencing,
    Confirmed(OrderId),
    Failed(ExchangeError),
}

impl Placement {
    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CheckingNumberPool => "checking_number_pool",
            Self::Replenishing => "replenishing",
            Self::Submitting { .. } => "submitting",
            Self::Resequencing => "resequencing",
            Self::Confirmed(_) => "confirmed",
            Self::Failed(_) => "failed",
        }
    }
}

fn is_out_of_sequence(err: &ExchangeError) -> bool {
    matches!(err.transport(), Some(TransportError::Sequence(_)))
}

// ─── LedgerExchange ──────────────────────────────────────────────────────────

/// Adapter for one nym on one ledger server.
pub struct LedgerExchange {
    config: LedgerConfig,
    dispatcher: DispatcherHandle,
    store: MarketStateStore,
    session: Arc<dyn LedgerSession>,
    lost: AtomicBool,
    /// Base account each tracked offer was issued from; cancels go there.
    offer_accounts: Mutex<HashMap<OrderId, String>>,
}

impl LedgerExchange {
    /// Build the adapter and register the server's host queue, driven by a
    /// [`LedgerTransport`] over `session`.
    pub fn new(
        config: LedgerConfig,
        dispatcher: DispatcherHandle,
        store: MarketStateStore,
        session: Arc<dyn LedgerSession>,
    ) -> Self {
        let transport = LedgerTransport::new(Arc::clone(&session));
        dispatcher.register_host(
            config.server_id.clone(),
            Arc::new(transport),
            Some(config.throttle.clone()),
        );
        Self {
            config,
            dispatcher,
            store,
            session,
            lost: AtomicBool::new(false),
            offer_accounts: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn market(&self, market: &MarketId) -> Result<&LedgerMarket, ExchangeError> {
        self.config
            .markets
            .iter()
            .find(|m| m.market_id == *market)
            .ok_or_else(|| ExchangeError::UnknownMarket(market.clone()))
    }

    fn accounts(&self) -> MutexGuard<'_, HashMap<OrderId, String>> {
        self.offer_accounts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_session_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Accept calls again after the application re-established the session.
    pub fn reset_session(&self) {
        if self.lost.swap(false, Ordering::SeqCst) {
            tracing::info!(server = %self.config.server_id, "Ledger session reset");
        }
    }

    // ── Calls ────────────────────────────────────────────────────────────

    fn envelope(&self, op: LedgerOp, priority: u8) -> RequestEnvelope {
        RequestEnvelope::ledger(self.config.server_id.clone(), op)
            .with_priority(priority)
            .param("server_id", self.config.server_id.as_str())
            .param("nym_id", self.config.nym_id.as_str())
    }

    fn offer_envelope(&self, market: &LedgerMarket, order: &OrderRequest) -> RequestEnvelope {
        self.envelope(LedgerOp::IssueMarketOffer, PRIORITY_PLACE)
            .param("asset_type_id", market.base_asset.as_str())
            .param("asset_account_id", market.base_account.as_str())
            .param("currency_type_id", market.counter_asset.as_str())
            .param("currency_account_id", market.counter_account.as_str())
            .param("scale", market.scale.to_string())
            .param("minimum_increment", format_decimal(MINIMUM_INCREMENT))
            .param("total_assets", format_decimal(order.amount))
            .param("price_limit", format_decimal(order.price))
            .param("selling", (order.side == Side::Ask).to_string())
    }

    /// One attempt, no resequencing.
    async fn dispatch(&self, envelope: RequestEnvelope) -> Result<Value, ExchangeError> {
        if self.is_session_lost() {
            return Err(ExchangeError::SequenceLost(format!(
                "session with {} is lost",
                self.config.server_id
            )));
        }
        Ok(self.dispatcher.execute(envelope).await?.body)
    }

    /// Dispatch, resequencing and retrying once on an out-of-sequence reply.
    async fn sequenced<F>(&self, build: F) -> Result<Value, ExchangeError>
    where
        F: Fn() -> RequestEnvelope + Send + Sync,
    {
        let mut resequenced = false;
        loop {
            match self.dispatch(build()).await {
                Err(e) if is_out_of_sequence(&e) => {
                    if resequenced {
                        return Err(self.lose_session(e));
                    }
                    self.resequence().await?;
                    resequenced = true;
                }
                other => return other,
            }
        }
    }

    async fn resequence(&self) -> Result<(), ExchangeError> {
        let env = self
            .envelope(LedgerOp::GetRequestNumber, PRIORITY_SEQUENCE)
            .with_retry(RetryPolicy::Idempotent);
        let body = match self.dispatch(env).await {
            Err(e) if is_out_of_sequence(&e) => return Err(self.lose_session(e)),
            other => other?,
        };
        let reply: wire::RequestNumberReply = decode("request number", body)?;
        tracing::info!(
            server = %self.config.server_id,
            request_number = reply.request_number,
            "Resequenced ledger session"
        );
        Ok(())
    }

    fn lose_session(&self, err: ExchangeError) -> ExchangeError {
        self.lost.store(true, Ordering::SeqCst);
        tracing::error!(server = %self.config.server_id, "Ledger session lost: {}", err);
        ExchangeError::SequenceLost(format!("{}: {err}", self.config.server_id))
    }

    async fn place(&self, market: &LedgerMarket, order: &OrderRequest) -> Result<OrderId, ExchangeError> {
        let mut step = Placement::Idle;
        loop {
            let from = step.name();
            let next = match step {
                Placement::Idle => Placement::CheckingNumberPool,
                Placement::CheckingNumberPool => {
                    let pool = self.session.transaction_number_count();
                    if pool < self.config.low_water_mark {
                        tracing::debug!(
                            server = %self.config.server_id,
                            pool,
                            low_water_mark = self.config.low_water_mark,
                            "Transaction numbers low"
                        );
                        Placement::Replenishing
                    } else {
                        Placement::Submitting { resequenced: false }
                    }
                }
                Placement::Replenishing => {
                    let replenished = self
                        .sequenced(|| self.envelope(LedgerOp::GetTransactionNumber, PRIORITY_PLACE))
                        .await;
                    match replenished {
                        Ok(_) => Placement::Submitting { resequenced: false },
                        Err(e) => Placement::Failed(e),
                    }
                }
                Placement::Submitting { resequenced } => {
                    match self.dispatch(self.offer_envelope(market, order)).await {
                        Ok(body) => match decode::<wire::IssuedOfferReply>("issued offer", body) {
                            Ok(reply) => Placement::Confirmed(OrderId::from(reply.transaction_id)),
                            Err(e) => Placement::Failed(e),
                        },
                        Err(e) if is_out_of_sequence(&e) && !resequenced => Placement::Resequencing,
                        Err(e) if is_out_of_sequence(&e) => Placement::Failed(self.lose_session(e)),
                        Err(e) => Placement::Failed(e),
                    }
                }
                Placement::Resequencing => match self.resequence().await {
                    Ok(()) => Placement::Submitting { resequenced: true },
                    Err(e) => Placement::Failed(e),
                },
                Placement::Confirmed(order_id) => return Ok(order_id),
                Placement::Failed(err) => return Err(err),
            };
            tracing::debug!(
                server = %self.config.server_id,
                market = %market.market_id,
                from,
                to = next.name(),
                "Offer placement"
            );
            step = next;
        }
    }
}

#[async_trait]
impl Exchange for LedgerExchange {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn markets(&self) -> Vec<MarketId> {
        self.config.markets.iter().map(|m| m.market_id.clone()).collect()
    }

    /// The market list carries best bid/ask and last sale for every market
    /// on the server, so one call refreshes all configured tickers.
    async fn refresh_ticker(&self, market: &MarketId) -> Result<(), ExchangeError> {
        self.market(market)?;
        let body = self
            .sequenced(|| {
                self.envelope(LedgerOp::GetMarketList, PRIORITY_MARKET)
                    .with_retry(RetryPolicy::Idempotent)
            })
            .await?;
        let list: wire::MarketListReply = decode("market list", body)?;
        for data in &list.markets {
            let Some(configured) = self
                .config
                .markets
                .iter()
                .find(|m| m.market_id.as_str() == data.market_id)
            else {
                continue;
            };
            self.store.set_ticker(&configured.market_id, data.into()).await;
        }
        Ok(())
    }

    async fn refresh_depth(&self, market: &MarketId) -> Result<(), ExchangeError> {
        self.market(market)?;
        let depth = self.config.max_depth.to_string();
        let body = self
            .sequenced(|| {
                self.envelope(LedgerOp::GetMarketOffers, PRIORITY_MARKET)
                    .with_retry(RetryPolicy::Idempotent)
                    .param("market_id", market.as_str())
                    .param("max_depth", depth.as_str())
            })
            .await?;
        let reply: wire::MarketOffersReply = decode("market offers", body)?;
        let (asks, bids) = convert::depth_levels(reply);
        self.store.apply_depth_snapshot(market, asks, bids).await?;
        Ok(())
    }

    async fn refresh_trades(&self, market: &MarketId) -> Result<(), ExchangeError> {
        self.market(market)?;
        let body = self
            .sequenced(|| {
                self.envelope(LedgerOp::GetMarketRecentTrades, PRIORITY_MARKET)
                    .with_retry(RetryPolicy::Idempotent)
                    .param("market_id", market.as_str())
            })
            .await?;
        let reply: wire::RecentTradesReply = decode("recent trades", body)?;
        self.store
            .replace_trades(market, reply.trades.into_iter().map(Into::into).collect())
            .await;
        Ok(())
    }

    async fn refresh_balance(&self, market: &MarketId) -> Result<(), ExchangeError> {
        let m = self.market(market)?;
        for (asset, account) in [
            (&m.base_asset, &m.base_account),
            (&m.counter_asset, &m.counter_account),
        ] {
            let body = self
                .sequenced(|| {
                    self.envelope(LedgerOp::GetAccountBalance, PRIORITY_ACCOUNT)
                        .with_retry(RetryPolicy::Idempotent)
                        .param("account_id", account.as_str())
                })
                .await?;
            let reply: wire::AccountReply = decode("account balance", body)?;
            // Ledger accounts report one figure; funds on offer stay in it.
            self.store
                .set_balance(market, asset.clone(), Balance::new(reply.balance, reply.balance))
                .await;
        }
        Ok(())
    }

    /// The nym's offer list spans all markets; every configured market's
    /// open orders are replaced from it.
    async fn refresh_open_orders(&self, market: &MarketId) -> Result<(), ExchangeError> {
        self.market(market)?;
        let body = self
            .sequenced(|| {
                self.envelope(LedgerOp::GetNymOpenOffers, PRIORITY_ACCOUNT)
                    .with_retry(RetryPolicy::Idempotent)
            })
            .await?;
        let reply: wire::NymOffersReply = decode("nym offers", body)?;
        let mut snapshot = Vec::with_capacity(self.config.markets.len());
        let mut accounts = HashMap::new();
        for m in &self.config.markets {
            let mut orders = Vec::new();
            for offer in reply.offers.iter().filter(|o| convert::offer_matches(m, o)) {
                let order = convert::open_order(m, offer)?;
                let account = offer.asset_acct_id.clone().unwrap_or_else(|| m.base_account.clone());
                accounts.insert(order.order_id.clone(), account);
                orders.push(order);
            }
            snapshot.push((&m.market_id, orders));
        }
        *self.accounts() = accounts;
        for (market_id, orders) in snapshot {
            self.store.replace_open_orders(market_id, orders).await;
        }
        Ok(())
    }

    async fn place_order(
        &self,
        market: &MarketId,
        side: Side,
        amount: &str,
        price: &str,
    ) -> Result<OrderId, ExchangeError> {
        let m = self.market(market)?;
        let order = OrderRequest::new(market, side, amount, price)?;
        let order_id = self.place(m, &order).await?;
        tracing::info!(
            server = %self.config.server_id,
            market = %market,
            order_id = %order_id,
            side = %side,
            "Offer placed"
        );
        let price = convert::offer_price(order.price, MINIMUM_INCREMENT, Decimal::from(m.scale))?;
        self.accounts().insert(order_id.clone(), m.base_account.clone());
        let open = OpenOrder::new(order_id.clone(), market.clone(), side, price, order.amount)
            .placed_at(Utc::now());
        self.store.upsert_order(open).await;
        Ok(order_id)
    }

    async fn cancel_order(&self, market: &MarketId, order_id: &OrderId) -> Result<(), ExchangeError> {
        let m = self.market(market)?;
        if self.store.open_order(market, order_id).await.is_none() {
            tracing::debug!(market = %market, order_id = %order_id, "Cancel of untracked offer ignored");
            return Ok(());
        }
        let account = self
            .accounts()
            .get(order_id)
            .cloned()
            .unwrap_or_else(|| m.base_account.clone());
        self.sequenced(|| {
            self.envelope(LedgerOp::CancelOffer, PRIORITY_CANCEL)
                .param("asset_account_id", account.as_str())
                .param("transaction_id", order_id.as_str())
        })
        .await?;
        self.accounts().remove(order_id);
        self.store.remove_order(market, order_id).await;
        Ok(())
    }
}
