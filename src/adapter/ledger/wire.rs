//! Reply shapes returned by a ledger session, one struct per operation.
//!
//! Amounts are integers in the asset's smallest unit; they are carried as
//! [`Decimal`] so the domain layer never sees floats.

use crate::shared::serde_util::{decimal_flex, id_flex, timestamp_secs};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

/// `GetMarketList`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketListReply {
    #[serde(default)]
    pub markets: Vec<MarketData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketData {
    pub market_id: String,
    pub asset_type_id: String,
    pub currency_type_id: String,
    #[serde(with = "decimal_flex")]
    pub scale: Decimal,
    #[serde(with = "decimal_flex")]
    pub current_bid: Decimal,
    #[serde(with = "decimal_flex")]
    pub current_ask: Decimal,
    #[serde(with = "decimal_flex")]
    pub last_sale_price: Decimal,
}

/// `GetAccountBalance`
#[derive(Debug, Clone, Deserialize)]
pub struct AccountReply {
    pub account_id: String,
    #[serde(with = "decimal_flex")]
    pub balance: Decimal,
}

/// `GetNymOpenOffers`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NymOffersReply {
    #[serde(default)]
    pub offers: Vec<NymOffer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NymOffer {
    #[serde(with = "id_flex")]
    pub transaction_id: String,
    pub asset_type_id: String,
    pub currency_type_id: String,
    #[serde(with = "decimal_flex")]
    pub scale: Decimal,
    #[serde(with = "decimal_flex")]
    pub price_per_scale: Decimal,
    #[serde(with = "decimal_flex")]
    pub minimum_increment: Decimal,
    #[serde(with = "decimal_flex")]
    pub total_assets: Decimal,
    #[serde(with = "decimal_flex")]
    pub finished_so_far: Decimal,
    pub selling: bool,
    #[serde(default, with = "timestamp_secs::option")]
    pub date: Option<DateTime<Utc>>,
    /// Base-asset account the offer was issued from.
    #[serde(default)]
    pub asset_acct_id: Option<String>,
}

/// `GetMarketOffers`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketOffersReply {
    #[serde(default)]
    pub asks: Vec<OfferData>,
    #[serde(default)]
    pub bids: Vec<OfferData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfferData {
    #[serde(with = "decimal_flex")]
    pub price_per_scale: Decimal,
    #[serde(with = "decimal_flex")]
    pub available_assets: Decimal,
}

/// `GetMarketRecentTrades`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecentTradesReply {
    #[serde(default)]
    pub trades: Vec<TradeData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeData {
    #[serde(with = "id_flex")]
    pub transaction_id: String,
    #[serde(with = "timestamp_secs")]
    pub date: DateTime<Utc>,
    #[serde(with = "decimal_flex")]
    pub price: Decimal,
    #[serde(with = "decimal_flex")]
    pub amount_sold: Decimal,
}

/// `IssueMarketOffer`
#[derive(Debug, Clone, Deserialize)]
pub struct IssuedOfferReply {
    #[serde(with = "id_flex")]
    pub transaction_id: String,
}

/// `GetRequestNumber`
#[derive(Debug, Clone, Deserialize)]
pub struct RequestNumberReply {
    pub request_number: u64,
}
