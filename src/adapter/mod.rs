//! Backend adapters behind a uniform exchange capability surface.
//!
//! Each adapter builds [`RequestEnvelope`](crate::request::RequestEnvelope)s,
//! submits them through the shared dispatcher, and applies parsed replies to
//! the [`MarketStateStore`](crate::state::MarketStateStore). Backends are
//! chosen at configuration time:
//!
//! - [`rest::RestExchange`]: stateless REST-JSON API with nonce/HMAC signing
//! - [`ledger::LedgerExchange`]: session-oriented ledger protocol with
//!   transaction-number pools and request sequencing

pub mod ledger;
pub mod rest;

use crate::error::ExchangeError;
use crate::shared::{parse_positive, FeedKind, MarketId, OrderId, Side};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;

/// Uniform capability surface over one backend account.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Registry key, unique per client.
    fn name(&self) -> &str;

    /// Markets this adapter serves.
    fn markets(&self) -> Vec<MarketId>;

    async fn refresh_ticker(&self, market: &MarketId) -> Result<(), ExchangeError>;

    async fn refresh_depth(&self, market: &MarketId) -> Result<(), ExchangeError>;

    async fn refresh_trades(&self, market: &MarketId) -> Result<(), ExchangeError>;

    async fn refresh_balance(&self, market: &MarketId) -> Result<(), ExchangeError>;

    async fn refresh_open_orders(&self, market: &MarketId) -> Result<(), ExchangeError>;

    /// Account refresh: balances, then open orders.
    async fn refresh(&self, market: &MarketId) -> Result<(), ExchangeError> {
        self.refresh_balance(market).await?;
        self.refresh_open_orders(market).await
    }

    /// Place a limit order. `amount` and `price` are decimal strings. The
    /// order appears in the store only once the backend assigned an id.
    async fn place_order(
        &self,
        market: &MarketId,
        side: Side,
        amount: &str,
        price: &str,
    ) -> Result<OrderId, ExchangeError>;

    /// Cancel an order. Cancelling an id the store does not track succeeds
    /// without contacting the backend.
    async fn cancel_order(&self, market: &MarketId, order_id: &OrderId) -> Result<(), ExchangeError>;
}

/// Run the refresh backing a polled feed.
pub async fn refresh_feed(
    exchange: &dyn Exchange,
    market: &MarketId,
    feed: FeedKind,
) -> Result<(), ExchangeError> {
    match feed {
        FeedKind::Ticker => exchange.refresh_ticker(market).await,
        FeedKind::Depth => exchange.refresh_depth(market).await,
        FeedKind::Trades => exchange.refresh_trades(market).await,
    }
}

/// A validated limit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub market: MarketId,
    pub side: Side,
    pub amount: Decimal,
    pub price: Decimal,
}

impl OrderRequest {
    /// Parse and check that amount and price are positive decimals.
    pub fn new(market: &MarketId, side: Side, amount: &str, price: &str) -> Result<Self, ExchangeError> {
        Ok(Self {
            market: market.clone(),
            side,
            amount: parse_positive("amount", amount)?,
            price: parse_positive("price", price)?,
        })
    }
}

/// Deserialize a reply body into a wire type.
pub(crate) fn decode<T: DeserializeOwned>(what: &str, body: serde_json::Value) -> Result<T, ExchangeError> {
    serde_json::from_value(body).map_err(|e| ExchangeError::Decode(format!("{what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_request_validates() {
        let m = MarketId::from("X");
        let ok = OrderRequest::new(&m, Side::Ask, "1.50000000", "99.99").unwrap();
        assert_eq!(ok.amount, Decimal::new(15, 1));
        assert_eq!(ok.price, Decimal::new(9999, 2));

        for (amount, price) in [("0", "1"), ("1", "-2"), ("x", "1"), ("1", "")] {
            assert!(matches!(
                OrderRequest::new(&m, Side::Bid, amount, price),
                Err(ExchangeError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_decode_reports_context() {
        let err = decode::<Vec<u8>>("ticker", serde_json::json!({"a": 1})).unwrap_err();
        assert!(err.to_string().contains("ticker"));
    }
}
