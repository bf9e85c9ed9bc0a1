//! Raw serde structs matching the REST backend's JSON replies.

use crate::shared::serde_util::{decimal_flex, id_flex, timestamp_secs};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

/// `ticker/`
#[derive(Debug, Clone, Deserialize)]
pub struct TickerResponse {
    #[serde(with = "decimal_flex")]
    pub last: Decimal,
    #[serde(with = "decimal_flex")]
    pub bid: Decimal,
    #[serde(with = "decimal_flex")]
    pub ask: Decimal,
}

/// One `[price, amount]` pair of `order_book/`.
#[derive(Debug, Clone, Deserialize)]
pub struct WireLevel(
    #[serde(with = "decimal_flex")] pub Decimal,
    #[serde(with = "decimal_flex")] pub Decimal,
);

/// `order_book/`
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookResponse {
    #[serde(default)]
    pub bids: Vec<WireLevel>,
    #[serde(default)]
    pub asks: Vec<WireLevel>,
}

/// One element of `transactions/`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionResponse {
    #[serde(with = "timestamp_secs")]
    pub date: DateTime<Utc>,
    #[serde(with = "id_flex")]
    pub tid: String,
    #[serde(with = "decimal_flex")]
    pub price: Decimal,
    #[serde(with = "decimal_flex")]
    pub amount: Decimal,
    /// 0 = buy, 1 = sell. Older API versions omit it.
    #[serde(rename = "type", default)]
    pub kind: Option<u8>,
}

/// `buy/` and `sell/` confirmation.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    #[serde(with = "id_flex")]
    pub id: String,
    #[serde(with = "decimal_flex")]
    pub price: Decimal,
    #[serde(with = "decimal_flex")]
    pub amount: Decimal,
    #[serde(rename = "type", default)]
    pub kind: Option<u8>,
    #[serde(default)]
    pub datetime: Option<String>,
}

/// One element of `open_orders/`.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrderResponse {
    #[serde(with = "id_flex")]
    pub id: String,
    #[serde(with = "decimal_flex")]
    pub price: Decimal,
    #[serde(with = "decimal_flex")]
    pub amount: Decimal,
    /// 0 = buy, 1 = sell.
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub datetime: Option<String>,
}

pub const ORDER_TYPE_BUY: u8 = 0;
