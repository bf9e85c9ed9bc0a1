//! Domain modules organized as vertical slices.
//!
//! Each sub-module contains:
//! - `mod.rs`: App-facing types (decimal prices, typed identifiers)
//! - `state.rs`: State containers with update methods, owned by the
//!   [`MarketStateStore`](crate::state::MarketStateStore)
//!
//! Backend wire formats live with their adapter in [`crate::adapter`].

pub mod balance;
pub mod order;
pub mod orderbook;
pub mod ticker;
pub mod trade;

pub use balance::Balance;
pub use order::{OpenOrder, OpenOrders};
pub use orderbook::{DepthBook, DepthLevel};
pub use ticker::Ticker;
pub use trade::{Trade, TradeHistory};
