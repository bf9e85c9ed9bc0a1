//! Conversions from ledger replies to domain types.

use super::wire::{MarketData, MarketOffersReply, NymOffer, OfferData, TradeData};
use super::LedgerMarket;
use crate::domain::{DepthLevel, OpenOrder, Ticker, Trade};
use crate::error::ExchangeError;
use crate::shared::{OrderId, Side};
use rust_decimal::Decimal;

impl From<&MarketData> for Ticker {
    fn from(m: &MarketData) -> Self {
        Ticker::new(Some(m.last_sale_price), Some(m.current_bid), Some(m.current_ask))
    }
}

impl From<OfferData> for DepthLevel {
    fn from(o: OfferData) -> Self {
        DepthLevel::new(o.price_per_scale, o.available_assets)
    }
}

/// `(asks, bids)`
pub fn depth_levels(reply: MarketOffersReply) -> (Vec<DepthLevel>, Vec<DepthLevel>) {
    (
        reply.asks.into_iter().map(Into::into).collect(),
        reply.bids.into_iter().map(Into::into).collect(),
    )
}

impl From<TradeData> for Trade {
    fn from(t: TradeData) -> Self {
        Trade {
            trade_id: t.transaction_id,
            timestamp: t.date,
            price: t.price,
            amount: t.amount_sold,
            side: None,
        }
    }
}

/// An offer belongs to a market when asset type, currency type and scale
/// all agree.
pub fn offer_matches(market: &LedgerMarket, offer: &NymOffer) -> bool {
    offer.asset_type_id == market.base_asset.as_str()
        && offer.currency_type_id == market.counter_asset.as_str()
        && offer.scale == Decimal::from(market.scale)
}

/// Price of an offer as shown to the user: `price_per_scale` units per
/// `minimum_increment × scale` of the asset.
pub fn offer_price(
    price_per_scale: Decimal,
    minimum_increment: Decimal,
    scale: Decimal,
) -> Result<Decimal, ExchangeError> {
    price_per_scale
        .checked_mul(minimum_increment)
        .and_then(|p| p.checked_mul(scale))
        .ok_or_else(|| ExchangeError::Decode(format!("offer price overflows: {price_per_scale}")))
}

pub fn open_order(market: &LedgerMarket, offer: &NymOffer) -> Result<OpenOrder, ExchangeError> {
    let outstanding = offer
        .total_assets
        .checked_sub(offer.finished_so_far)
        .ok_or_else(|| {
            ExchangeError::Decode(format!("offer {} outstanding overflows", offer.transaction_id))
        })?;
    Ok(OpenOrder {
        order_id: OrderId::from(offer.transaction_id.as_str()),
        market: market.market_id.clone(),
        side: if offer.selling { Side::Ask } else { Side::Bid },
        price: offer_price(offer.price_per_scale, offer.minimum_increment, offer.scale)?,
        outstanding,
        placed_at: offer.date,
    })
}
