//! # Dojima
//!
//! Core of a markets client: per-host request scheduling, request signing,
//! and market-state synchronization across heterogeneous exchange backends.
//!
//! ## Architecture
//!
//! The crate is organized in layers:
//!
//! 1. **Core**: Newtypes, decimal helpers, domain state containers, errors
//! 2. **Auth**: Credentials and the per-account nonce/HMAC `RequestSigner`
//! 3. **Requests**: `RequestEnvelope` and the per-host `HostThrottle`
//! 4. **Dispatch**: Retry policies, transports (`HttpTransport` behind the
//!    `http` feature), and the scheduler task behind `DispatcherHandle`
//! 5. **State & Feeds**: `MarketStateStore` with change notifications and
//!    reference-counted poll timers
//! 6. **Adapters**: The `Exchange` capability trait with REST-JSON and
//!    ledger-protocol backends
//! 7. **High-Level Client**: `DojimaClient` with an explicit exchange registry
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dojima::prelude::*;
//!
//! let client = DojimaClient::builder().build();
//! let rest = client.add_rest(RestConfig::default(), Some(credentials)).await?;
//! let market = MarketId::from("BTCUSD");
//!
//! client.subscribe("bitstamp", &market, FeedKind::Ticker).await?;
//! rest.place_order(&market, Side::Bid, "0.5", "100.00").await?;
//!
//! let mut events = client.events();
//! while let Ok(change) = events.recv().await {
//!     println!("{change:?}");
//! }
//! ```

// ── Layer 1: Core ────────────────────────────────────────────────────────────

/// Shared newtypes used across all layers.
pub mod shared;

/// Domain modules: app-facing types and state containers.
pub mod domain;

/// Layered error types.
pub mod error;

/// Default endpoints and timing constants.
pub mod network;

// ── Layer 2: Auth ────────────────────────────────────────────────────────────

/// Credentials and request signing.
pub mod auth;

// ── Layer 3: Requests ────────────────────────────────────────────────────────

/// Request envelopes and per-host throttling.
pub mod request;

// ── Layer 4: Dispatch ────────────────────────────────────────────────────────

/// Retry policies, transports, and the request scheduler.
pub mod http;

// ── Layer 5: State & Feeds ───────────────────────────────────────────────────

/// Per-market state store and change notifications.
pub mod state;

/// Subscription counting and poll timers.
pub mod feed;

// ── Layer 6: Adapters ────────────────────────────────────────────────────────

/// The exchange capability trait and its backends.
pub mod adapter;

// ── Layer 7: High-Level Client ───────────────────────────────────────────────

/// `DojimaClient`: the primary entry point.
pub mod client;

// ── Prelude ──────────────────────────────────────────────────────────────────

pub mod prelude {
    // Shared newtypes
    pub use crate::shared::{AssetId, FeedKind, HostId, MarketId, OrderId, Side};

    // Domain types
    pub use crate::domain::{Balance, DepthLevel, OpenOrder, Ticker, Trade};

    // Errors
    pub use crate::error::{
        DispatchError, ErrorKind, ExchangeError, SignerError, SubscriptionError, TransportError,
    };

    // Auth
    pub use crate::auth::{Credentials, RequestSigner};

    // Requests + dispatch
    pub use crate::http::{DispatcherConfig, DispatcherHandle, RetryConfig, RetryPolicy, Transport};
    pub use crate::request::{RequestEnvelope, ThrottleConfig};

    // State + feeds
    pub use crate::feed::{FeedConfig, Transition};
    pub use crate::state::{MarketStateStore, StateChange};

    // Adapters
    pub use crate::adapter::ledger::{
        LedgerConfig, LedgerExchange, LedgerFault, LedgerMarket, LedgerSession,
    };
    pub use crate::adapter::rest::{RestConfig, RestExchange};
    pub use crate::adapter::Exchange;

    // Client
    pub use crate::client::{DojimaClient, DojimaClientBuilder};
}
