//! Shared newtypes and utilities used across all layers.
//!
//! Identifier newtypes serialize transparently as strings so they can be used
//! directly in wire types and as `HashMap` keys.

pub mod price;
pub mod serde_util;

pub use price::{format_decimal, parse_decimal, parse_positive};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Ok($name(s))
            }
        }
    };
}

// ─── Identifiers ─────────────────────────────────────────────────────────────

string_id!(
    /// Market identifier as the backend names it (e.g. `"BTCUSD"`, or a ledger market hash).
    MarketId
);

string_id!(
    /// Order identifier, unique per account.
    OrderId
);

string_id!(
    /// Remote endpoint identity, one per backend API surface (e.g. `"www.bitstamp.net"`).
    HostId
);

string_id!(
    /// Asset / commodity identifier within a backend (e.g. `"btc"`, `"usd"`).
    AssetId
);

// ─── Side ────────────────────────────────────────────────────────────────────

/// Order side: Bid (buy) or Ask (sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Side::Bid => write!(f, "Buy"),
            Side::Ask => write!(f, "Sell"),
        }
    }
}

// ─── FeedKind ────────────────────────────────────────────────────────────────

/// A recurring data stream serviced by periodic polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Ticker,
    Depth,
    Trades,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Depth => "depth",
            Self::Trades => "trades",
        }
    }
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── Utilities ───────────────────────────────────────────────────────────────

/// Milliseconds since the Unix epoch, used to seed nonces.
pub fn unix_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Clamp a `Duration` to whole milliseconds for logging fields.
pub(crate) fn millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}
