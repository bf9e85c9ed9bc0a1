//! Ticker snapshot: last trade price and best bid / ask.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest prices for one market. A backend that does not report a field
/// leaves it `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub last: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Ticker {
    pub fn new(last: Option<Decimal>, bid: Option<Decimal>, ask: Option<Decimal>) -> Self {
        Self {
            last,
            bid,
            ask,
            updated_at: Some(Utc::now()),
        }
    }

    /// Spread between best ask and best bid.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => ask.checked_sub(bid),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spread() {
        let t = Ticker::new(None, Some(Decimal::new(99, 0)), Some(Decimal::new(100, 0)));
        assert_eq!(t.spread(), Some(Decimal::ONE));
        assert_eq!(Ticker::default().spread(), None);
    }
}
