//! Error taxonomy for transport, dispatch, and exchange operations.

use crate::shared::{FeedKind, HostId, MarketId};
use thiserror::Error;

/// Top-level error returned by exchange operations.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("Unknown market: {0}")]
    UnknownMarket(MarketId),

    #[error("Unknown exchange: {0}")]
    UnknownExchange(String),

    #[error("Request sequence lost after resync: {0}")]
    SequenceLost(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ExchangeError {
    /// Flat classification carried by error notifications.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Dispatch(e) => e.kind(),
            Self::Validation(_) => ErrorKind::Validation,
            Self::Decode(_) | Self::Serde(_) => ErrorKind::Decode,
            Self::Signer(_) => ErrorKind::Auth,
            Self::SequenceLost(_) => ErrorKind::Sequence,
            Self::Subscription(_) | Self::UnknownMarket(_) | Self::UnknownExchange(_) => {
                ErrorKind::Other
            }
        }
    }

    /// The transport failure underneath this error, if any.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Dispatch(DispatchError::Transport(e)) => Some(e),
            _ => None,
        }
    }
}

/// Classified failure of one network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connectivity failure or timeout.
    #[error("Network error: {0}")]
    Network(String),

    /// Backend returned a structured failure or a malformed body.
    #[error("Protocol error{}: {message}", status_suffix(.status))]
    Protocol {
        status: Option<u16>,
        message: String,
    },

    #[error("Rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Nonce or signature rejected. Fatal to the signing session.
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// Ledger request number out of sequence.
    #[error("Request out of sequence: {0}")]
    Sequence(String),
}

impl TransportError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            status: None,
            message: message.into(),
        }
    }

    /// Network and rate-limit failures may be retried after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Sequence(_) => ErrorKind::Sequence,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" {s}")).unwrap_or_default()
}

/// Failure to schedule or complete an envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Host {host} queue full ({capacity} pending)")]
    Backpressure { host: HostId, capacity: usize },

    #[error("Unknown host: {0}")]
    UnknownHost(HostId),

    #[error("Request cancelled before dispatch")]
    Cancelled,

    #[error("Dispatcher shut down")]
    Shutdown,
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(e) => e.kind(),
            Self::Backpressure { .. } => ErrorKind::Backpressure,
            Self::UnknownHost(_) | Self::Cancelled | Self::Shutdown => ErrorKind::Other,
        }
    }
}

/// Reference-count misuse on a feed subscription.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("No active {feed} subscription for {market}")]
    NotSubscribed { market: MarketId, feed: FeedKind },
}

/// Request signing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("Invalid signing key")]
    InvalidKey,

    #[error("Signing session invalidated; resync the nonce before signing")]
    SessionInvalidated,
}

/// Flat error classification for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Protocol,
    RateLimited,
    Auth,
    Sequence,
    Backpressure,
    Validation,
    Decode,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Protocol => "protocol",
            Self::RateLimited => "rate_limited",
            Self::Auth => "auth",
            Self::Sequence => "sequence",
            Self::Backpressure => "backpressure",
            Self::Validation => "validation",
            Self::Decode => "decode",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TransportError::Network("reset".into()).is_retryable());
        assert!(TransportError::RateLimited { retry_after_ms: None }.is_retryable());
        assert!(!TransportError::protocol("insufficient funds").is_retryable());
        assert!(!TransportError::Auth("bad nonce".into()).is_retryable());
        assert!(!TransportError::Sequence("stale".into()).is_retryable());
    }

    #[test]
    fn test_kind_passes_through_layers() {
        let err = ExchangeError::from(DispatchError::from(TransportError::Auth("x".into())));
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(err.transport().is_some());

        let err = ExchangeError::from(DispatchError::Backpressure {
            host: HostId::from("h"),
            capacity: 4,
        });
        assert_eq!(err.kind(), ErrorKind::Backpressure);
        assert!(err.transport().is_none());
    }

    #[test]
    fn test_protocol_display() {
        let e = TransportError::Protocol {
            status: Some(400),
            message: "bad".into(),
        };
        assert_eq!(e.to_string(), "Protocol error 400: bad");
        assert_eq!(TransportError::protocol("bad").to_string(), "Protocol error: bad");
    }
}
