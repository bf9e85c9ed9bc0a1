//! Open order domain.

pub mod state;

use crate::shared::{MarketId, OrderId, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use state::OpenOrders;

/// A resting order the backend has acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: OrderId,
    pub market: MarketId,
    pub side: Side,
    pub price: Decimal,
    /// Quantity not yet filled.
    pub outstanding: Decimal,
    pub placed_at: Option<DateTime<Utc>>,
}

impl OpenOrder {
    pub fn new(
        order_id: OrderId,
        market: MarketId,
        side: Side,
        price: Decimal,
        outstanding: Decimal,
    ) -> Self {
        Self {
            order_id,
            market,
            side,
            price,
            outstanding,
            placed_at: None,
        }
    }

    pub fn placed_at(mut self, at: DateTime<Utc>) -> Self {
        self.placed_at = Some(at);
        self
    }
}
