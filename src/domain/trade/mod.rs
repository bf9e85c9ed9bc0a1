//! Trade domain: public trade records and history.

pub mod state;

use crate::shared::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use state::TradeHistory;

/// A public trade execution record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trade {
    pub trade_id: String,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub amount: Decimal,
    /// Taker side, when the backend reports it.
    pub side: Option<Side>,
}
