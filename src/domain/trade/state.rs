//! Trade state containers.

use super::Trade;
use std::collections::VecDeque;

/// Default number of trades kept per market.
pub const DEFAULT_TRADE_HISTORY: usize = 128;

/// Rolling trade history buffer for a market, newest first.
#[derive(Debug, Clone)]
pub struct TradeHistory {
    trades: VecDeque<Trade>,
    max_size: usize,
}

impl Default for TradeHistory {
    fn default() -> Self {
        Self::new(DEFAULT_TRADE_HISTORY)
    }
}

impl TradeHistory {
    pub fn new(max_size: usize) -> Self {
        Self {
            trades: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    /// Push a new trade, evicting the oldest if at capacity.
    pub fn push(&mut self, trade: Trade) {
        if self.trades.len() >= self.max_size {
            self.trades.pop_back();
        }
        self.trades.push_front(trade);
    }

    /// Replace all trades from a polled snapshot. Trades are ordered newest
    /// first by timestamp regardless of the order the backend sent them in.
    pub fn replace(&mut self, mut trades: Vec<Trade>) {
        trades.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.trades.clear();
        self.trades.extend(trades.into_iter().take(self.max_size));
    }

    pub fn trades(&self) -> &VecDeque<Trade> {
        &self.trades
    }

    pub fn latest(&self) -> Option<&Trade> {
        self.trades.front()
    }

    pub fn clear(&mut self) {
        self.trades.clear();
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}
