//! Conversions from REST wire types to domain types.

use super::wire::{
    OpenOrderResponse, OrderBookResponse, OrderResponse, TickerResponse, TransactionResponse,
    WireLevel, ORDER_TYPE_BUY,
};
use crate::domain::{Balance, DepthLevel, OpenOrder, Ticker, Trade};
use crate::error::{ExchangeError, TransportError};
use crate::shared::{AssetId, MarketId, OrderId, Side};
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

impl From<TickerResponse> for Ticker {
    fn from(t: TickerResponse) -> Self {
        Ticker::new(Some(t.last), Some(t.bid), Some(t.ask))
    }
}

impl From<WireLevel> for DepthLevel {
    fn from(WireLevel(price, quantity): WireLevel) -> Self {
        DepthLevel::new(price, quantity)
    }
}

/// `(asks, bids)`
pub fn depth_levels(book: OrderBookResponse) -> (Vec<DepthLevel>, Vec<DepthLevel>) {
    (
        book.asks.into_iter().map(Into::into).collect(),
        book.bids.into_iter().map(Into::into).collect(),
    )
}

impl From<TransactionResponse> for Trade {
    fn from(t: TransactionResponse) -> Self {
        Trade {
            trade_id: t.tid,
            timestamp: t.date,
            price: t.price,
            amount: t.amount,
            side: t.kind.map(side_from_type),
        }
    }
}

fn side_from_type(kind: u8) -> Side {
    if kind == ORDER_TYPE_BUY {
        Side::Bid
    } else {
        Side::Ask
    }
}

fn parse_datetime(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn open_order(market: &MarketId, o: OpenOrderResponse) -> OpenOrder {
    let placed_at = parse_datetime(o.datetime.as_deref());
    OpenOrder {
        order_id: OrderId::from(o.id),
        market: market.clone(),
        side: side_from_type(o.kind),
        price: o.price,
        outstanding: o.amount,
        placed_at,
    }
}

pub fn placed_order(market: &MarketId, side: Side, o: OrderResponse) -> OpenOrder {
    let placed_at = parse_datetime(o.datetime.as_deref()).or_else(|| Some(Utc::now()));
    OpenOrder {
        order_id: OrderId::from(o.id),
        market: market.clone(),
        side: o.kind.map(side_from_type).unwrap_or(side),
        price: o.price,
        outstanding: o.amount,
        placed_at,
    }
}

fn decimal_field(body: &Value, key: &str) -> Result<Decimal, ExchangeError> {
    let text = match body.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(ExchangeError::Decode(format!("balance: missing {key}"))),
    };
    Decimal::from_str_exact(text.trim())
        .map_err(|e| ExchangeError::Decode(format!("balance: {key} {text:?}: {e}")))
}

/// Read `{asset}_balance` / `{asset}_available` from a `balance/` reply.
pub fn asset_balance(body: &Value, asset: &AssetId) -> Result<Balance, ExchangeError> {
    let prefix = asset.as_str().to_lowercase();
    Ok(Balance::new(
        decimal_field(body, &format!("{prefix}_balance"))?,
        decimal_field(body, &format!("{prefix}_available"))?,
    ))
}

/// Trading fee from a `balance/` reply, as a fraction (`"0.5000"` → 0.005).
pub fn commission(body: &Value) -> Result<Decimal, ExchangeError> {
    Ok(decimal_field(body, "fee")? / Decimal::ONE_HUNDRED)
}

/// Turn an `{"error": ...}` reply into a classified failure. Rejections that
/// mention the nonce, signature, or API key are authentication failures.
pub fn reply_error(body: &Value) -> Option<TransportError> {
    let err = body.as_object()?.get("error")?;
    let message = flatten_error(err);
    let lower = message.to_lowercase();
    if lower.contains("nonce") || lower.contains("signature") || lower.contains("api key") {
        Some(TransportError::Auth(message))
    } else {
        Some(TransportError::protocol(message))
    }
}

fn flatten_error(err: &Value) -> String {
    match err {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(flatten_error).collect::<Vec<_>>().join("; "),
        Value::Object(fields) => fields
            .values()
            .map(flatten_error)
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    }
}
