//! The ledger session seam and the transport that drives it.
//!
//! A [`LedgerSession`] wraps whatever client library talks to the ledger
//! server. It is stateful (request numbers, transaction-number pool), so the
//! dispatcher reaches it only through [`LedgerTransport`] and the backend's
//! host throttle.

use crate::error::TransportError;
use crate::http::Transport;
use crate::request::{LedgerOp, Payload, RawReply, Route};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a ledger session call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerFault {
    /// The server rejected the request number.
    #[error("Request out of sequence")]
    OutOfSequence,

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl From<LedgerFault> for TransportError {
    fn from(fault: LedgerFault) -> Self {
        match fault {
            LedgerFault::OutOfSequence => TransportError::Sequence(fault.to_string()),
            LedgerFault::Rejected(message) => TransportError::protocol(message),
            LedgerFault::Unavailable(message) => TransportError::Network(message),
        }
    }
}

/// Call surface of a ledger-protocol client.
#[async_trait]
pub trait LedgerSession: Send + Sync {
    /// Perform one server round trip.
    async fn call(&self, op: LedgerOp, args: &Payload) -> Result<Value, LedgerFault>;

    /// Unused transaction numbers held by the local wallet.
    fn transaction_number_count(&self) -> usize;
}

/// [`Transport`] over a [`LedgerSession`]. Only `Route::Ledger` is accepted.
#[derive(Clone)]
pub struct LedgerTransport {
    session: Arc<dyn LedgerSession>,
}

impl LedgerTransport {
    pub fn new(session: Arc<dyn LedgerSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Transport for LedgerTransport {
    async fn send(&self, route: &Route, params: &Payload) -> Result<RawReply, TransportError> {
        match route {
            Route::Ledger(op) => self
                .session
                .call(*op, params)
                .await
                .map(RawReply::ok)
                .map_err(Into::into),
            other => Err(TransportError::protocol(format!(
                "ledger transport cannot send {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl LedgerSession for Echo {
        async fn call(&self, op: LedgerOp, _args: &Payload) -> Result<Value, LedgerFault> {
            match op {
                LedgerOp::GetRequestNumber => Ok(json!({"request_number": 7})),
                LedgerOp::CancelOffer => Err(LedgerFault::OutOfSequence),
                LedgerOp::IssueMarketOffer => Err(LedgerFault::Rejected("no funds".into())),
                _ => Err(LedgerFault::Unavailable("down".into())),
            }
        }

        fn transaction_number_count(&self) -> usize {
            0
        }
    }

    #[tokio::test]
    async fn test_faults_map_to_transport_errors() {
        let t = LedgerTransport::new(Arc::new(Echo));
        let args = Payload::new();

        let ok = t.send(&Route::Ledger(LedgerOp::GetRequestNumber), &args).await.unwrap();
        assert_eq!(ok.body["request_number"], 7);

        let seq = t.send(&Route::Ledger(LedgerOp::CancelOffer), &args).await.unwrap_err();
        assert!(matches!(seq, TransportError::Sequence(_)));
        assert!(!seq.is_retryable());

        let rejected = t.send(&Route::Ledger(LedgerOp::IssueMarketOffer), &args).await.unwrap_err();
        assert_eq!(rejected, TransportError::protocol("no funds"));

        let down = t.send(&Route::Ledger(LedgerOp::GetMarketList), &args).await.unwrap_err();
        assert!(down.is_retryable());
    }

    #[tokio::test]
    async fn test_http_routes_refused() {
        let t = LedgerTransport::new(Arc::new(Echo));
        let err = t.send(&Route::Get("ticker/".into()), &Payload::new()).await.unwrap_err();
        assert!(matches!(err, TransportError::Protocol { status: None, .. }));
    }
}
