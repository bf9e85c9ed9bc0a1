//! Shared fixtures: a scripted transport and an in-memory ledger session.

#![allow(dead_code)]

use async_trait::async_trait;
use dojima::adapter::ledger::{LedgerFault, LedgerSession};
use dojima::error::TransportError;
use dojima::http::Transport;
use dojima::request::{LedgerOp, Payload, RawReply, Route};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

// ─── MockTransport ───────────────────────────────────────────────────────────

/// Records every call and answers `{}` unless a reply was scripted for the
/// path. When gated, each call waits for a permit before answering.
pub struct MockTransport {
    calls: Mutex<Vec<(Route, Payload)>>,
    replies: Mutex<HashMap<String, VecDeque<Result<Value, TransportError>>>>,
    gate: Option<Semaphore>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(HashMap::new()),
            gate: None,
        })
    }

    /// Calls block until [`release`](Self::release) hands out permits.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(HashMap::new()),
            gate: Some(Semaphore::new(0)),
        })
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn script(&self, path: &str, reply: Result<Value, TransportError>) {
        self.replies
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<(Route, Payload)> {
        self.calls.lock().unwrap().clone()
    }

    /// Value of `key` in each call's parameters, in call order.
    pub fn param_values(&self, key: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|(_, params)| params.get(key).cloned())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, route: &Route, params: &Payload) -> Result<RawReply, TransportError> {
        self.calls.lock().unwrap().push((route.clone(), params.clone()));
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let path = match route {
            Route::Get(p) | Route::Post(p) => p.clone(),
            Route::Ledger(op) => op.as_str().to_string(),
        };
        let scripted = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&path)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Ok(json!({}))).map(RawReply::ok)
    }
}

// ─── MockLedger ──────────────────────────────────────────────────────────────

/// In-memory ledger server. Queued faults for an op are returned first;
/// `GetTransactionNumber` adds ten numbers, each issued offer uses one.
pub struct MockLedger {
    pool: AtomicUsize,
    next_offer: AtomicUsize,
    ops: Mutex<Vec<(LedgerOp, Payload)>>,
    faults: Mutex<HashMap<LedgerOp, VecDeque<LedgerFault>>>,
    replies: Mutex<HashMap<LedgerOp, Value>>,
}

impl MockLedger {
    pub fn new(pool: usize) -> Arc<Self> {
        Arc::new(Self {
            pool: AtomicUsize::new(pool),
            next_offer: AtomicUsize::new(1000),
            ops: Mutex::new(Vec::new()),
            faults: Mutex::new(HashMap::new()),
            replies: Mutex::new(HashMap::new()),
        })
    }

    pub fn fail(&self, op: LedgerOp, fault: LedgerFault) {
        self.faults.lock().unwrap().entry(op).or_default().push_back(fault);
    }

    pub fn reply(&self, op: LedgerOp, body: Value) {
        self.replies.lock().unwrap().insert(op, body);
    }

    pub fn ops(&self) -> Vec<LedgerOp> {
        self.ops.lock().unwrap().iter().map(|(op, _)| *op).collect()
    }

    pub fn args(&self, op: LedgerOp) -> Option<Payload> {
        self.ops
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(o, _)| *o == op)
            .map(|(_, args)| args.clone())
    }

    pub fn pool(&self) -> usize {
        self.pool.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerSession for MockLedger {
    async fn call(&self, op: LedgerOp, args: &Payload) -> Result<Value, LedgerFault> {
        self.ops.lock().unwrap().push((op, args.clone()));
        let fault = self.faults.lock().unwrap().get_mut(&op).and_then(VecDeque::pop_front);
        if let Some(fault) = fault {
            return Err(fault);
        }
        match op {
            LedgerOp::GetTransactionNumber => {
                self.pool.fetch_add(10, Ordering::SeqCst);
                Ok(json!({}))
            }
            LedgerOp::GetRequestNumber => Ok(json!({"request_number": 1})),
            LedgerOp::IssueMarketOffer => {
                self.pool.fetch_sub(1, Ordering::SeqCst);
                let id = self.next_offer.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"transaction_id": id}))
            }
            other => Ok(self
                .replies
                .lock()
                .unwrap()
                .get(&other)
                .cloned()
                .unwrap_or_else(|| json!({}))),
        }
    }

    fn transaction_number_count(&self) -> usize {
        self.pool.load(Ordering::SeqCst)
    }
}
