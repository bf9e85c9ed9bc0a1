//! Per-asset account balance.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Total and available (not reserved by open orders) quantity of one asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub total: Decimal,
    pub available: Decimal,
}

impl Balance {
    pub fn new(total: Decimal, available: Decimal) -> Self {
        Self { total, available }
    }

    /// Quantity held by open orders.
    pub fn reserved(&self) -> Decimal {
        self.total.saturating_sub(self.available)
    }
}
