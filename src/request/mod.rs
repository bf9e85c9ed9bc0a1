//! Outbound request envelopes and the per-host throttle that orders them.
//!
//! A [`RequestEnvelope`] describes one call: target host, priority, route,
//! parameters, retry policy, and the completion handle its result is delivered
//! on. Envelopes are moved, never shared: a throttle queue owns an envelope
//! until it is released to the transport, and a retry consumes the envelope
//! to build its successor.

pub mod throttle;

pub use throttle::{HostStats, HostThrottle, ThrottleConfig};

use crate::auth::RequestSigner;
use crate::error::DispatchError;
use crate::http::retry::RetryPolicy;
use crate::shared::HostId;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Request parameters, sorted by key so encoded bodies are stable.
pub type Payload = BTreeMap<String, String>;

/// Result delivered on an envelope's completion handle.
pub type Completion = Result<RawReply, DispatchError>;

// ─── EnvelopeId ──────────────────────────────────────────────────────────────

/// Process-unique envelope identity, allocated in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvelopeId(u64);

static NEXT_ENVELOPE_ID: AtomicU64 = AtomicU64::new(1);

impl EnvelopeId {
    pub fn next() -> Self {
        Self(NEXT_ENVELOPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ─── Route ───────────────────────────────────────────────────────────────────

/// Operations exposed by a ledger-protocol session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    GetMarketList,
    GetAccountBalance,
    GetNymOpenOffers,
    IssueMarketOffer,
    CancelOffer,
    GetTransactionNumber,
    GetRequestNumber,
    GetMarketOffers,
    GetMarketRecentTrades,
}

impl LedgerOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetMarketList => "get_market_list",
            Self::GetAccountBalance => "get_account_balance",
            Self::GetNymOpenOffers => "get_nym_open_offers",
            Self::IssueMarketOffer => "issue_market_offer",
            Self::CancelOffer => "cancel_offer",
            Self::GetTransactionNumber => "get_transaction_number",
            Self::GetRequestNumber => "get_request_number",
            Self::GetMarketOffers => "get_market_offers",
            Self::GetMarketRecentTrades => "get_market_recent_trades",
        }
    }
}

impl std::fmt::Display for LedgerOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an envelope goes once released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// HTTP GET, parameters in the query string.
    Get(String),
    /// HTTP POST, parameters form-encoded in the body.
    Post(String),
    /// Call on a ledger session.
    Ledger(LedgerOp),
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get(path) => write!(f, "GET {path}"),
            Self::Post(path) => write!(f, "POST {path}"),
            Self::Ledger(op) => write!(f, "LEDGER {op}"),
        }
    }
}

/// Unparsed successful reply. Adapters interpret the body.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReply {
    pub status: u16,
    pub body: serde_json::Value,
}

impl RawReply {
    pub fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }
}

// ─── RequestKind ─────────────────────────────────────────────────────────────

/// Public requests go out as-is; private ones are signed at dispatch.
#[derive(Clone)]
pub enum RequestKind {
    Public,
    Private(Arc<RequestSigner>),
}

impl RequestKind {
    pub fn is_private(&self) -> bool {
        matches!(self, Self::Private(_))
    }

    pub fn signer(&self) -> Option<&Arc<RequestSigner>> {
        match self {
            Self::Public => None,
            Self::Private(signer) => Some(signer),
        }
    }
}

impl std::fmt::Debug for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "Public"),
            Self::Private(_) => write!(f, "Private"),
        }
    }
}

// ─── RequestEnvelope ─────────────────────────────────────────────────────────

/// One outbound call and its completion handle.
#[derive(Debug)]
pub struct RequestEnvelope {
    id: EnvelopeId,
    host: HostId,
    priority: u8,
    kind: RequestKind,
    route: Route,
    payload: Payload,
    retry: RetryPolicy,
    attempt: u32,
    reply: Option<oneshot::Sender<Completion>>,
}

impl RequestEnvelope {
    pub fn new(host: impl Into<HostId>, route: Route) -> Self {
        Self {
            id: EnvelopeId::next(),
            host: host.into(),
            priority: 0,
            kind: RequestKind::Public,
            route,
            payload: Payload::new(),
            retry: RetryPolicy::None,
            attempt: 0,
            reply: None,
        }
    }

    pub fn get(host: impl Into<HostId>, path: impl Into<String>) -> Self {
        Self::new(host, Route::Get(path.into()))
    }

    pub fn post(host: impl Into<HostId>, path: impl Into<String>) -> Self {
        Self::new(host, Route::Post(path.into()))
    }

    pub fn ledger(host: impl Into<HostId>, op: LedgerOp) -> Self {
        Self::new(host, Route::Ledger(op))
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn private(mut self, signer: Arc<RequestSigner>) -> Self {
        self.kind = RequestKind::Private(signer);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub(crate) fn attach(&mut self, reply: oneshot::Sender<Completion>) {
        self.reply = Some(reply);
    }

    /// Consume this envelope and build its retry: same request, `attempt + 1`,
    /// fresh id. The completion handle moves with it.
    pub fn retry(self) -> Self {
        Self {
            id: EnvelopeId::next(),
            attempt: self.attempt + 1,
            ..self
        }
    }

    /// Deliver the result. Consumes the envelope so it can complete only once.
    pub fn complete(self, result: Completion) {
        if let Some(reply) = self.reply {
            // Receiver gone means the caller stopped waiting.
            let _ = reply.send(result);
        }
    }

    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    pub fn host(&self) -> &HostId {
        &self.host
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn params(&self) -> &Payload {
        &self.payload
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_ids_increase() {
        let a = EnvelopeId::next();
        let b = EnvelopeId::next();
        assert!(b > a);
    }

    #[test]
    fn test_retry_copies_request_with_new_identity() {
        let env = RequestEnvelope::post("h", "buy/")
            .with_priority(1)
            .param("amount", "1.5")
            .with_retry(RetryPolicy::Idempotent);
        let first = env.id();
        let retried = env.retry();
        assert_ne!(retried.id(), first);
        assert_eq!(retried.attempt(), 1);
        assert_eq!(retried.priority(), 1);
        assert_eq!(retried.params().get("amount").map(String::as_str), Some("1.5"));
        assert_eq!(retried.route(), &Route::Post("buy/".into()));
    }

    #[tokio::test]
    async fn test_completion_moves_with_retry() {
        let (tx, rx) = oneshot::channel();
        let mut env = RequestEnvelope::get("h", "ticker/");
        env.attach(tx);
        let env = env.retry().retry();
        env.complete(Ok(RawReply::ok(serde_json::json!({"last": "1"}))));
        let reply = rx.await.unwrap().unwrap();
        assert_eq!(reply.body["last"], "1");
    }

    #[test]
    fn test_route_display() {
        assert_eq!(Route::Get("ticker/".into()).to_string(), "GET ticker/");
        assert_eq!(
            Route::Ledger(LedgerOp::CancelOffer).to_string(),
            "LEDGER cancel_offer"
        );
    }
}
