//! Per-host admission gate and priority queue.

use super::{EnvelopeId, RequestEnvelope};
use crate::error::DispatchError;
use crate::network::DEFAULT_HOST_CAPACITY;
use crate::shared::HostId;
use priority_queue::PriorityQueue;
use serde::Deserialize;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Limits applied to one host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Envelopes allowed in flight at once.
    pub max_outstanding: usize,
    /// Minimum spacing between two releases. Zero disables spacing.
    #[serde(with = "crate::shared::serde_util::duration_ms")]
    pub min_interval: Duration,
    /// Pending envelopes accepted before `submit` reports backpressure.
    pub capacity: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_outstanding: 1,
            min_interval: Duration::ZERO,
            capacity: DEFAULT_HOST_CAPACITY,
        }
    }
}

impl ThrottleConfig {
    pub fn max_outstanding(mut self, n: usize) -> Self {
        self.max_outstanding = n.max(1);
        self
    }

    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

/// Point-in-time counters for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStats {
    pub host: HostId,
    pub pending: usize,
    pub in_flight: usize,
    pub max_outstanding: usize,
}

/// Queue of pending envelopes for one host, released in `(priority, sequence)`
/// order while fewer than `max_outstanding` are in flight.
pub struct HostThrottle {
    host: HostId,
    config: ThrottleConfig,
    in_flight: usize,
    next_seq: u64,
    order: PriorityQueue<EnvelopeId, Reverse<(u8, u64)>>,
    pending: HashMap<EnvelopeId, RequestEnvelope>,
    last_release: Option<Instant>,
}

impl HostThrottle {
    pub fn new(host: HostId, config: ThrottleConfig) -> Self {
        Self {
            host,
            config,
            in_flight: 0,
            next_seq: 0,
            order: PriorityQueue::new(),
            pending: HashMap::new(),
            last_release: None,
        }
    }

    pub fn host(&self) -> &HostId {
        &self.host
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Replace limits. Envelopes already in flight are unaffected.
    pub fn configure(&mut self, config: ThrottleConfig) {
        self.config = config;
    }

    /// Enqueue an envelope. On a full queue the envelope is handed back with
    /// `Backpressure` so the caller can complete it.
    pub fn submit(
        &mut self,
        envelope: RequestEnvelope,
    ) -> Result<EnvelopeId, (RequestEnvelope, DispatchError)> {
        if self.pending.len() >= self.config.capacity {
            let err = DispatchError::Backpressure {
                host: self.host.clone(),
                capacity: self.config.capacity,
            };
            return Err((envelope, err));
        }
        let id = envelope.id();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push(id, Reverse((envelope.priority(), seq)));
        self.pending.insert(id, envelope);
        Ok(id)
    }

    /// Release the next envelope if the concurrency and spacing gates allow.
    /// The caller must report its completion with [`complete`](Self::complete).
    pub fn try_dispatch(&mut self, now: Instant) -> Option<RequestEnvelope> {
        if self.in_flight >= self.config.max_outstanding.max(1) {
            return None;
        }
        if let Some(ready_at) = self.interval_gate() {
            if now < ready_at {
                return None;
            }
        }
        let (id, _) = self.order.pop()?;
        let envelope = self.pending.remove(&id)?;
        self.in_flight += 1;
        self.last_release = Some(now);
        Some(envelope)
    }

    /// One in-flight envelope finished, successfully or not.
    pub fn complete(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Remove a pending envelope. In-flight envelopes cannot be cancelled.
    pub fn cancel(&mut self, id: EnvelopeId) -> Option<RequestEnvelope> {
        self.order.remove(&id)?;
        self.pending.remove(&id)
    }

    /// When the spacing gate next opens, if it is what holds the queue back.
    pub fn next_ready_at(&self) -> Option<Instant> {
        if self.pending.is_empty() || self.in_flight >= self.config.max_outstanding.max(1) {
            return None;
        }
        self.interval_gate()
    }

    /// Drain every pending envelope, in release order.
    pub fn drain(&mut self) -> Vec<RequestEnvelope> {
        let mut out = Vec::with_capacity(self.pending.len());
        while let Some((id, _)) = self.order.pop() {
            if let Some(envelope) = self.pending.remove(&id) {
                out.push(envelope);
            }
        }
        out
    }

    pub fn stats(&self) -> HostStats {
        HostStats {
            host: self.host.clone(),
            pending: self.pending.len(),
            in_flight: self.in_flight,
            max_outstanding: self.config.max_outstanding.max(1),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight == 0
    }

    fn interval_gate(&self) -> Option<Instant> {
        if self.config.min_interval.is_zero() {
            return None;
        }
        self.last_release.map(|t| t + self.config.min_interval)
    }
}

impl std::fmt::Debug for HostThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostThrottle")
            .field("host", &self.host)
            .field("pending", &self.pending.len())
            .field("in_flight", &self.in_flight)
            .field("config", &self.config)
            .finish()
    }
}
