//! REST-JSON backend: public GET endpoints and signed form-encoded POSTs.
//!
//! Request priorities on the backend's host queue (lower drains first):
//!
//! | Request                         | Priority | Retry               |
//! |---------------------------------|----------|---------------------|
//! | `cancel_order/`                 | 0        | none                |
//! | `buy/`, `sell/`                 | 1        | rate limit only     |
//! | `balance/`, `open_orders/`, ... | 2        | idempotent          |
//! | `bitcoin_withdrawal/`           | 2        | rate limit only     |
//! | `ticker/`, `order_book/`, ...   | 3        | idempotent          |

pub mod convert;
pub mod wire;

use crate::adapter::{decode, Exchange, OrderRequest};
use crate::auth::{Credentials, RequestSigner};
use crate::error::{DispatchError, ExchangeError};
use crate::http::{DispatcherHandle, RetryPolicy, Transport};
use crate::network::{DEFAULT_REST_HOST, DEFAULT_REST_URL, REST_MIN_INTERVAL};
use crate::request::{RequestEnvelope, ThrottleConfig};
use crate::shared::{format_decimal, parse_positive, AssetId, HostId, MarketId, OrderId, Side};
use crate::state::MarketStateStore;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

const PRIORITY_CANCEL: u8 = 0;
const PRIORITY_PLACE: u8 = 1;
const PRIORITY_ACCOUNT: u8 = 2;
const PRIORITY_PUBLIC: u8 = 3;

/// Settings for one REST account/market.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    /// Registry name.
    pub name: String,
    /// Throttle identity.
    pub host: HostId,
    pub base_url: String,
    pub market: MarketId,
    pub base_asset: AssetId,
    pub counter_asset: AssetId,
    pub throttle: ThrottleConfig,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            name: "bitstamp".to_string(),
            host: HostId::from(DEFAULT_REST_HOST),
            base_url: DEFAULT_REST_URL.to_string(),
            market: MarketId::from("BTCUSD"),
            base_asset: AssetId::from("btc"),
            counter_asset: AssetId::from("usd"),
            throttle: ThrottleConfig::default().min_interval(REST_MIN_INTERVAL),
        }
    }
}

/// Adapter for the REST-JSON backend.
pub struct RestExchange {
    config: RestConfig,
    dispatcher: DispatcherHandle,
    store: MarketStateStore,
    signer: Option<Arc<RequestSigner>>,
    deposit_address: async_lock::Mutex<Option<String>>,
}

impl RestExchange {
    /// Build the adapter and register its host on `dispatcher` with
    /// `transport`. Without credentials only public data is available.
    pub fn new(
        config: RestConfig,
        dispatcher: DispatcherHandle,
        store: MarketStateStore,
        transport: Arc<dyn Transport>,
        credentials: Option<Credentials>,
    ) -> Self {
        dispatcher.register_host(config.host.clone(), transport, Some(config.throttle.clone()));
        Self {
            signer: credentials.map(|c| Arc::new(RequestSigner::new(c))),
            config,
            dispatcher,
            store,
            deposit_address: async_lock::Mutex::new(None),
        }
    }

    /// Build with an HTTP transport against `config.base_url`.
    #[cfg(feature = "http")]
    pub fn connect(
        config: RestConfig,
        dispatcher: DispatcherHandle,
        store: MarketStateStore,
        credentials: Option<Credentials>,
    ) -> Result<Self, ExchangeError> {
        let transport = crate::http::HttpTransport::new(&config.base_url)
            .map_err(|e| ExchangeError::Dispatch(e.into()))?;
        Ok(Self::new(config, dispatcher, store, Arc::new(transport), credentials))
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    pub fn signer(&self) -> Option<&Arc<RequestSigner>> {
        self.signer.as_ref()
    }

    pub fn has_account(&self) -> bool {
        self.signer.is_some()
    }

    /// Bitcoin deposit address; fetched once then served from cache.
    pub async fn deposit_address(&self) -> Result<String, ExchangeError> {
        let mut cached = self.deposit_address.lock().await;
        if let Some(address) = cached.as_ref() {
            return Ok(address.clone());
        }
        let env = self
            .private("bitcoin_deposit_address/")?
            .with_priority(PRIORITY_ACCOUNT)
            .with_retry(RetryPolicy::Idempotent);
        let address: String = decode("deposit address", self.call(env).await?)?;
        *cached = Some(address.clone());
        Ok(address)
    }

    /// Withdraw to an external address.
    pub async fn withdraw(&self, address: &str, amount: &str) -> Result<(), ExchangeError> {
        if address.trim().is_empty() {
            return Err(ExchangeError::Validation("address is empty".into()));
        }
        let amount = parse_positive("amount", amount)?;
        let env = self
            .private("bitcoin_withdrawal/")?
            .with_priority(PRIORITY_ACCOUNT)
            .with_retry(RetryPolicy::NonIdempotent)
            .param("address", address.trim())
            .param("amount", format_decimal(amount));
        let reply = self.call(env).await?;
        tracing::info!(exchange = %self.config.name, amount = %amount, "Withdrawal accepted: {}", reply);
        Ok(())
    }

    // ── Envelope construction ────────────────────────────────────────────

    fn public(&self, path: &str) -> RequestEnvelope {
        RequestEnvelope::get(self.config.host.clone(), path)
            .with_priority(PRIORITY_PUBLIC)
            .with_retry(RetryPolicy::Idempotent)
    }

    fn private(&self, path: &str) -> Result<RequestEnvelope, ExchangeError> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            ExchangeError::Validation(format!("{} has no account credentials", self.config.name))
        })?;
        Ok(RequestEnvelope::post(self.config.host.clone(), path).private(Arc::clone(signer)))
    }

    fn check_market(&self, market: &MarketId) -> Result<(), ExchangeError> {
        if *market == self.config.market {
            Ok(())
        } else {
            Err(ExchangeError::UnknownMarket(market.clone()))
        }
    }

    /// Dispatch and unwrap `{"error": ...}` replies into classified failures.
    async fn call(&self, envelope: RequestEnvelope) -> Result<Value, ExchangeError> {
        let route = envelope.route().clone();
        let reply = self.dispatcher.execute(envelope).await?;
        tracing::trace!(exchange = %self.config.name, "{} -> {}", route, reply.body);
        if let Some(err) = convert::reply_error(&reply.body) {
            if let crate::error::TransportError::Auth(_) = &err {
                if let Some(signer) = &self.signer {
                    signer.invalidate();
                }
            }
            return Err(DispatchError::from(err).into());
        }
        Ok(reply.body)
    }
}

#[async_trait]
impl Exchange for RestExchange {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn markets(&self) -> Vec<MarketId> {
        vec![self.config.market.clone()]
    }

    async fn refresh_ticker(&self, market: &MarketId) -> Result<(), ExchangeError> {
        self.check_market(market)?;
        let body = self.call(self.public("ticker/")).await?;
        let ticker: wire::TickerResponse = decode("ticker", body)?;
        self.store.set_ticker(market, ticker.into()).await;
        Ok(())
    }

    async fn refresh_depth(&self, market: &MarketId) -> Result<(), ExchangeError> {
        self.check_market(market)?;
        let body = self.call(self.public("order_book/")).await?;
        let book: wire::OrderBookResponse = decode("order book", body)?;
        let (asks, bids) = convert::depth_levels(book);
        self.store.apply_depth_snapshot(market, asks, bids).await?;
        Ok(())
    }

    async fn refresh_trades(&self, market: &MarketId) -> Result<(), ExchangeError> {
        self.check_market(market)?;
        let body = self.call(self.public("transactions/")).await?;
        let trades: Vec<wire::TransactionResponse> = decode("transactions", body)?;
        self.store
            .replace_trades(market, trades.into_iter().map(Into::into).collect())
            .await;
        Ok(())
    }

    async fn refresh_balance(&self, market: &MarketId) -> Result<(), ExchangeError> {
        self.check_market(market)?;
        let env = self
            .private("balance/")?
            .with_priority(PRIORITY_ACCOUNT)
            .with_retry(RetryPolicy::Idempotent);
        let body = self.call(env).await?;

        for asset in [&self.config.base_asset, &self.config.counter_asset] {
            let balance = convert::asset_balance(&body, asset)?;
            self.store.set_balance(market, asset.clone(), balance).await;
        }
        self.store
            .set_commission(market, convert::commission(&body)?)
            .await;
        Ok(())
    }

    async fn refresh_open_orders(&self, market: &MarketId) -> Result<(), ExchangeError> {
        self.check_market(market)?;
        let env = self
            .private("open_orders/")?
            .with_priority(PRIORITY_ACCOUNT)
            .with_retry(RetryPolicy::Idempotent);
        let body = self.call(env).await?;
        // An account with no orders may answer `null` or `[]`.
        let orders: Vec<wire::OpenOrderResponse> = match body {
            Value::Null => Vec::new(),
            other => decode("open orders", other)?,
        };
        let orders = orders
            .into_iter()
            .map(|o| convert::open_order(market, o))
            .collect();
        self.store.replace_open_orders(market, orders).await;
        Ok(())
    }

    async fn place_order(
        &self,
        market: &MarketId,
        side: Side,
        amount: &str,
        price: &str,
    ) -> Result<OrderId, ExchangeError> {
        self.check_market(market)?;
        let order = OrderRequest::new(market, side, amount, price)?;
        let path = match order.side {
            Side::Bid => "buy/",
            Side::Ask => "sell/",
        };
        let env = self
            .private(path)?
            .with_priority(PRIORITY_PLACE)
            .with_retry(RetryPolicy::NonIdempotent)
            .param("amount", format_decimal(order.amount))
            .param("price", format_decimal(order.price));
        let body = self.call(env).await?;
        let confirmed: wire::OrderResponse = decode("order", body)?;
        let open = convert::placed_order(market, side, confirmed);
        let order_id = open.order_id.clone();
        tracing::info!(
            exchange = %self.config.name,
            market = %market,
            order_id = %order_id,
            side = %side,
            "Order placed"
        );
        self.store.upsert_order(open).await;
        Ok(order_id)
    }

    async fn cancel_order(&self, market: &MarketId, order_id: &OrderId) -> Result<(), ExchangeError> {
        self.check_market(market)?;
        if self.store.open_order(market, order_id).await.is_none() {
            tracing::debug!(market = %market, order_id = %order_id, "Cancel of untracked order ignored");
            return Ok(());
        }
        let env = self
            .private("cancel_order/")?
            .with_priority(PRIORITY_CANCEL)
            .param("id", order_id.as_str());
        let body = self.call(env).await?;
        if body != Value::Bool(true) {
            return Err(ExchangeError::Dispatch(DispatchError::Transport(
                crate::error::TransportError::protocol(format!("cancel not confirmed: {body}")),
            )));
        }
        self.store.remove_order(market, order_id).await;
        Ok(())
    }
}
