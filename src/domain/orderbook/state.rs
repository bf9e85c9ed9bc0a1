//! Depth state container.

use super::DepthLevel;
use crate::error::ExchangeError;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Order book depth for one market, replaced wholesale by each snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepthBook {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

impl DepthBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from unsorted levels. Repeated prices are summed and empty
    /// levels dropped; a sum that overflows is a decode failure.
    pub fn from_levels(
        asks: impl IntoIterator<Item = DepthLevel>,
        bids: impl IntoIterator<Item = DepthLevel>,
    ) -> Result<Self, ExchangeError> {
        Ok(Self {
            asks: aggregate(asks)?,
            bids: aggregate(bids)?,
        })
    }

    /// Replace both sides with `snapshot`.
    pub fn replace(&mut self, snapshot: DepthBook) {
        *self = snapshot;
    }

    /// Asks sorted by price ascending.
    pub fn asks(&self) -> Vec<DepthLevel> {
        self.asks
            .iter()
            .map(|(p, q)| DepthLevel::new(*p, *q))
            .collect()
    }

    /// Bids sorted by price descending.
    pub fn bids(&self) -> Vec<DepthLevel> {
        self.bids
            .iter()
            .rev()
            .map(|(p, q)| DepthLevel::new(*p, *q))
            .collect()
    }

    /// Highest bid price.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    /// Lowest ask price.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// Mid price (average of best bid and best ask).
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.checked_add(ask).map(|sum| sum / Decimal::TWO),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }
}

fn aggregate(
    levels: impl IntoIterator<Item = DepthLevel>,
) -> Result<BTreeMap<Decimal, Decimal>, ExchangeError> {
    let mut side = BTreeMap::new();
    for level in levels {
        if level.quantity.is_zero() {
            continue;
        }
        let total = side.entry(level.price).or_insert(Decimal::ZERO);
        *total = total.checked_add(level.quantity).ok_or_else(|| {
            ExchangeError::Decode(format!("depth quantity overflows at price {}", level.price))
        })?;
    }
    Ok(side)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lv(price: i64, qty: i64) -> DepthLevel {
        DepthLevel::new(Decimal::from(price), Decimal::from(qty))
    }

    #[test]
    fn test_sides_are_sorted() {
        let book = DepthBook::from_levels(
            vec![lv(101, 3), lv(100, 2)],
            vec![lv(98, 1), lv(99, 5)],
        )
        .unwrap();
        assert_eq!(book.asks(), vec![lv(100, 2), lv(101, 3)]);
        assert_eq!(book.bids(), vec![lv(99, 5), lv(98, 1)]);
        assert_eq!(book.best_bid(), Some(Decimal::from(99)));
        assert_eq!(book.best_ask(), Some(Decimal::from(100)));
    }

    #[test]
    fn test_replace_discards_previous_levels() {
        let mut book = DepthBook::from_levels(vec![lv(200, 1)], vec![lv(150, 1)]).unwrap();
        book.replace(DepthBook::from_levels(vec![lv(100, 2)], vec![]).unwrap());
        assert_eq!(book.asks(), vec![lv(100, 2)]);
        assert!(book.bids().is_empty());
    }

    #[test]
    fn test_duplicate_prices_aggregate() {
        let book = DepthBook::from_levels(vec![lv(100, 2), lv(100, 3), lv(101, 0)], vec![]).unwrap();
        assert_eq!(book.asks(), vec![lv(100, 5)]);
    }

    #[test]
    fn test_overflowing_quantity_is_rejected() {
        let huge = DepthLevel::new(Decimal::from(100), Decimal::MAX);
        let res = DepthBook::from_levels(vec![huge, huge], vec![]);
        assert!(matches!(res, Err(ExchangeError::Decode(_))));

        let book = DepthBook::from_levels(
            vec![DepthLevel::new(Decimal::MAX, Decimal::ONE)],
            vec![DepthLevel::new(Decimal::MAX, Decimal::ONE)],
        )
        .unwrap();
        assert_eq!(book.mid_price(), None);
    }

    #[test]
    fn test_mid_price_and_clear() {
        let mut book = DepthBook::from_levels(vec![lv(52, 1)], vec![lv(50, 1)]).unwrap();
        assert_eq!(book.mid_price(), Some(Decimal::from(51)));
        book.clear();
        assert!(book.is_empty());
        assert_eq!(book.mid_price(), None);
    }
}
