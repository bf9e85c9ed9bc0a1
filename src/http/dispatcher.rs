//! Request scheduler: a background tokio task that owns every host throttle.
//!
//! The task is the only writer of throttle state. Callers talk to it through
//! a cloneable [`DispatcherHandle`]; each envelope carries a oneshot sender
//! and is completed exactly once, with its reply or a classified error.
//!
//! Network calls run in spawned tasks, bounded by `request_timeout`, and post
//! their outcome back to the scheduler. Retryable failures are resubmitted as
//! a fresh envelope (`attempt + 1`) through the normal host queue after the
//! policy's backoff delay.

use crate::error::{DispatchError, TransportError};
use crate::http::transport::Transport;
use crate::network::DEFAULT_REQUEST_TIMEOUT;
use crate::request::{
    Completion, EnvelopeId, HostStats, HostThrottle, Payload, RawReply, RequestEnvelope,
    RequestKind, ThrottleConfig,
};
use crate::shared::{millis, HostId};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Scheduler settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Upper bound on one transport call. Elapsed calls fail as `Network`.
    #[serde(with = "crate::shared::serde_util::duration_ms")]
    pub request_timeout: Duration,
    /// Limits for hosts registered without their own.
    pub default_throttle: ThrottleConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            default_throttle: ThrottleConfig::default(),
        }
    }
}

// ─── Commands from handles to the scheduler task ─────────────────────────────

enum Command {
    RegisterHost {
        host: HostId,
        transport: Arc<dyn Transport>,
        config: Option<ThrottleConfig>,
    },
    Configure {
        host: HostId,
        config: ThrottleConfig,
    },
    Submit(RequestEnvelope),
    Cancel {
        host: HostId,
        id: EnvelopeId,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        host: HostId,
        reply: oneshot::Sender<Option<HostStats>>,
    },
    Shutdown,
}

// ─── Events posted back by I/O and backoff tasks ─────────────────────────────

enum Internal {
    Completed {
        host: HostId,
        envelope: RequestEnvelope,
        result: Result<RawReply, TransportError>,
    },
    Resubmit(RequestEnvelope),
}

// ─── Public handle ───────────────────────────────────────────────────────────

/// Cloneable handle to the scheduler task.
#[derive(Clone)]
pub struct DispatcherHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

/// An envelope accepted for scheduling; await [`wait`](Self::wait) for its result.
pub struct PendingReply {
    id: EnvelopeId,
    host: HostId,
    rx: oneshot::Receiver<Completion>,
}

impl PendingReply {
    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    pub fn host(&self) -> &HostId {
        &self.host
    }

    pub async fn wait(self) -> Completion {
        // A dropped sender means the scheduler went away with the envelope.
        self.rx.await.unwrap_or(Err(DispatchError::Shutdown))
    }
}

impl DispatcherHandle {
    /// Spawn the scheduler task on the current tokio runtime.
    pub fn spawn(config: DispatcherConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let task = Dispatcher {
            config,
            hosts: HashMap::new(),
            cmd_rx,
            internal_tx,
            internal_rx,
        };
        tokio::spawn(run_task(task));
        Self { cmd_tx }
    }

    /// Register a host and the transport its envelopes go out on. Registering
    /// an existing host swaps its transport and keeps its queue.
    pub fn register_host(
        &self,
        host: impl Into<HostId>,
        transport: Arc<dyn Transport>,
        config: Option<ThrottleConfig>,
    ) {
        let _ = self.cmd_tx.send(Command::RegisterHost {
            host: host.into(),
            transport,
            config,
        });
    }

    pub fn configure_host(&self, host: impl Into<HostId>, config: ThrottleConfig) {
        let _ = self.cmd_tx.send(Command::Configure {
            host: host.into(),
            config,
        });
    }

    /// Queue an envelope. Returns immediately; the result arrives on the
    /// returned [`PendingReply`].
    pub fn submit(&self, mut envelope: RequestEnvelope) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        envelope.attach(tx);
        let pending = PendingReply {
            id: envelope.id(),
            host: envelope.host().clone(),
            rx,
        };
        if let Err(mpsc::error::SendError(Command::Submit(envelope))) =
            self.cmd_tx.send(Command::Submit(envelope))
        {
            envelope.complete(Err(DispatchError::Shutdown));
        }
        pending
    }

    /// Submit and wait for the result.
    pub async fn execute(&self, envelope: RequestEnvelope) -> Completion {
        self.submit(envelope).wait().await
    }

    /// Remove a not-yet-dispatched envelope. Its caller sees `Cancelled`.
    /// Returns `false` when the envelope is in flight or already finished.
    pub async fn cancel(&self, host: &HostId, id: EnvelopeId) -> bool {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Cancel {
            host: host.clone(),
            id,
            reply,
        };
        if self.cmd_tx.send(cmd).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn stats(&self, host: &HostId) -> Option<HostStats> {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Stats {
            host: host.clone(),
            reply,
        };
        self.cmd_tx.send(cmd).ok()?;
        rx.await.ok().flatten()
    }

    /// Stop the scheduler. Queued envelopes complete with `Shutdown`.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

// ─── Scheduler task state ────────────────────────────────────────────────────

struct HostSlot {
    throttle: HostThrottle,
    transport: Arc<dyn Transport>,
}

struct Dispatcher {
    config: DispatcherConfig,
    hosts: HashMap<HostId, HostSlot>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

async fn run_task(mut state: Dispatcher) {
    let far_future = Instant::now() + Duration::from_secs(86400);
    let wake = tokio::time::sleep_until(far_future);
    tokio::pin!(wake);

    loop {
        state.pump_all();
        let next_wake = state.next_wake();
        wake.as_mut().reset(next_wake.unwrap_or(far_future));

        tokio::select! {
            cmd = state.cmd_rx.recv() => {
                match cmd {
                    Some(Command::Shutdown) | None => {
                        state.shutdown();
                        return;
                    }
                    Some(cmd) => state.handle_command(cmd),
                }
            }
            Some(event) = state.internal_rx.recv() => state.handle_internal(event),
            () = &mut wake, if next_wake.is_some() => {}
        }
    }
}

impl Dispatcher {
    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::RegisterHost {
                host,
                transport,
                config,
            } => match self.hosts.get_mut(&host) {
                Some(slot) => {
                    slot.transport = transport;
                    if let Some(config) = config {
                        slot.throttle.configure(config);
                    }
                }
                None => {
                    let config = config.unwrap_or_else(|| self.config.default_throttle.clone());
                    tracing::debug!(
                        host = %host,
                        max_outstanding = config.max_outstanding,
                        min_interval_ms = millis(config.min_interval),
                        "Registered host"
                    );
                    let throttle = HostThrottle::new(host.clone(), config);
                    self.hosts.insert(host, HostSlot { throttle, transport });
                }
            },
            Command::Configure { host, config } => {
                if let Some(slot) = self.hosts.get_mut(&host) {
                    slot.throttle.configure(config);
                }
            }
            Command::Submit(envelope) => self.enqueue(envelope),
            Command::Cancel { host, id, reply } => {
                let cancelled = self
                    .hosts
                    .get_mut(&host)
                    .and_then(|slot| slot.throttle.cancel(id));
                let found = cancelled.is_some();
                if let Some(envelope) = cancelled {
                    tracing::debug!(host = %host, id = %id, "Cancelled pending request");
                    envelope.complete(Err(DispatchError::Cancelled));
                }
                let _ = reply.send(found);
            }
            Command::Stats { host, reply } => {
                let _ = reply.send(self.hosts.get(&host).map(|s| s.throttle.stats()));
            }
            // Handled by the task loop.
            Command::Shutdown => {}
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Resubmit(envelope) => self.enqueue(envelope),
            Internal::Completed {
                host,
                envelope,
                result,
            } => {
                if let Some(slot) = self.hosts.get_mut(&host) {
                    slot.throttle.complete();
                }
                match result {
                    Ok(reply) => envelope.complete(Ok(reply)),
                    Err(err) => self.on_failure(envelope, err),
                }
            }
        }
    }

    fn enqueue(&mut self, envelope: RequestEnvelope) {
        let Some(slot) = self.hosts.get_mut(envelope.host()) else {
            let host = envelope.host().clone();
            tracing::warn!(host = %host, "Request for unregistered host");
            envelope.complete(Err(DispatchError::UnknownHost(host)));
            return;
        };
        if let Err((envelope, err)) = slot.throttle.submit(envelope) {
            tracing::warn!(host = %envelope.host(), id = %envelope.id(), "{}", err);
            envelope.complete(Err(err));
        }
    }

    fn on_failure(&mut self, envelope: RequestEnvelope, err: TransportError) {
        if let TransportError::Auth(reason) = &err {
            if let Some(signer) = envelope.kind().signer() {
                tracing::error!(
                    host = %envelope.host(),
                    client_id = %signer.client_id(),
                    "Authentication rejected: {}",
                    reason
                );
                signer.invalidate();
            }
        }

        let Some(delay) = envelope.retry_policy().backoff(&err, envelope.attempt()) else {
            envelope.complete(Err(err.into()));
            return;
        };

        tracing::debug!(
            host = %envelope.host(),
            attempt = envelope.attempt() + 1,
            delay_ms = millis(delay),
            error = %err,
            "Retrying request {}",
            envelope.route()
        );
        let retry = envelope.retry();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means shutdown; dropping the envelope resolves
            // its caller with `Shutdown`.
            let _ = tx.send(Internal::Resubmit(retry));
        });
    }

    fn pump_all(&mut self) {
        let now = Instant::now();
        let timeout = self.config.request_timeout;
        for slot in self.hosts.values_mut() {
            while let Some(envelope) = slot.throttle.try_dispatch(now) {
                let params = match sign(&envelope) {
                    Ok(params) => params,
                    Err(err) => {
                        slot.throttle.complete();
                        envelope.complete(Err(err));
                        continue;
                    }
                };
                tracing::debug!(
                    host = %envelope.host(),
                    id = %envelope.id(),
                    priority = envelope.priority(),
                    attempt = envelope.attempt(),
                    "Dispatching {}",
                    envelope.route()
                );
                let transport = Arc::clone(&slot.transport);
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let result =
                        match tokio::time::timeout(timeout, transport.send(envelope.route(), &params))
                            .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(TransportError::Network(format!(
                                "timed out after {}ms",
                                millis(timeout)
                            ))),
                        };
                    let host = envelope.host().clone();
                    let _ = tx.send(Internal::Completed {
                        host,
                        envelope,
                        result,
                    });
                });
            }
        }
    }

    fn next_wake(&self) -> Option<Instant> {
        self.hosts
            .values()
            .filter_map(|slot| slot.throttle.next_ready_at())
            .min()
    }

    fn shutdown(&mut self) {
        let mut dropped = 0usize;
        for slot in self.hosts.values_mut() {
            for envelope in slot.throttle.drain() {
                envelope.complete(Err(DispatchError::Shutdown));
                dropped += 1;
            }
        }
        tracing::debug!(dropped, "Dispatcher shut down");
    }
}

/// Parameters to put on the wire: private envelopes are signed now, so nonces
/// reach the backend in dispatch order.
fn sign(envelope: &RequestEnvelope) -> Result<Payload, DispatchError> {
    match envelope.kind() {
        RequestKind::Public => Ok(envelope.params().clone()),
        RequestKind::Private(signer) => signer
            .sign(envelope.params())
            .map_err(|e| TransportError::Auth(e.to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credentials, RequestSigner};
    use crate::http::retry::{RetryConfig, RetryPolicy};
    use crate::request::Route;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies with scripted results in order, recording every call.
    struct Scripted {
        replies: Mutex<Vec<Result<RawReply, TransportError>>>,
        calls: Mutex<Vec<Payload>>,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<RawReply, TransportError>>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Payload> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, _route: &Route, params: &Payload) -> Result<RawReply, TransportError> {
            self.calls.lock().unwrap().push(params.clone());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(RawReply::ok(serde_json::json!({}))))
        }
    }

    struct Stalled;

    #[async_trait]
    impl Transport for Stalled {
        async fn send(&self, _: &Route, _: &Payload) -> Result<RawReply, TransportError> {
            std::future::pending().await
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::Custom(RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            backoff_factor: 1.0,
            jitter: false,
            retry_network: true,
        })
    }

    #[tokio::test]
    async fn test_unknown_host_rejected() {
        let d = DispatcherHandle::spawn(DispatcherConfig::default());
        let err = d
            .execute(RequestEnvelope::get("nowhere", "ticker/"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownHost(_)));
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let t = Scripted::new(vec![
            Err(TransportError::Network("reset".into())),
            Ok(RawReply::ok(serde_json::json!({"ok": true}))),
        ]);
        let d = DispatcherHandle::spawn(DispatcherConfig::default());
        d.register_host("h", t.clone(), None);

        let reply = d
            .execute(RequestEnvelope::get("h", "ticker/").with_retry(fast_retry()))
            .await
            .unwrap();
        assert_eq!(reply.body["ok"], true);
        assert_eq!(t.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_protocol_error_not_retried() {
        let t = Scripted::new(vec![Err(TransportError::protocol("no funds"))]);
        let d = DispatcherHandle::spawn(DispatcherConfig::default());
        d.register_host("h", t.clone(), None);

        let err = d
            .execute(RequestEnvelope::post("h", "buy/").with_retry(fast_retry()))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Transport(TransportError::Protocol { .. })));
        assert_eq!(t.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_invalidates_signer() {
        let t = Scripted::new(vec![Err(TransportError::Auth("invalid nonce".into()))]);
        let d = DispatcherHandle::spawn(DispatcherConfig::default());
        d.register_host("h", t.clone(), None);
        let signer = Arc::new(RequestSigner::with_nonce(Credentials::new("1", "k", "s"), 5));

        let err = d
            .execute(RequestEnvelope::post("h", "balance/").private(signer.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Auth);
        assert!(signer.is_invalidated());
        assert_eq!(t.calls()[0]["nonce"], "5");

        // Further private requests fail without reaching the wire.
        let err = d
            .execute(RequestEnvelope::post("h", "balance/").private(signer))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Auth);
        assert_eq!(t.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_frees_slot() {
        let d = DispatcherHandle::spawn(DispatcherConfig {
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        });
        d.register_host("h", Arc::new(Stalled), None);

        let err = d
            .execute(RequestEnvelope::get("h", "ticker/"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Transport(TransportError::Network(_))));
        let stats = d.stats(&HostId::from("h")).await.unwrap();
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_cancel_pending_envelope() {
        let d = DispatcherHandle::spawn(DispatcherConfig::default());
        d.register_host("h", Arc::new(Stalled), None);

        let first = d.submit(RequestEnvelope::get("h", "a"));
        let second = d.submit(RequestEnvelope::get("h", "b"));
        let host = HostId::from("h");

        assert!(d.cancel(&host, second.id()).await);
        assert!(matches!(second.wait().await, Err(DispatchError::Cancelled)));
        // In flight: cannot be cancelled.
        assert!(!d.cancel(&host, first.id()).await);
    }

    #[tokio::test]
    async fn test_shutdown_completes_queued() {
        let d = DispatcherHandle::spawn(DispatcherConfig::default());
        d.register_host("h", Arc::new(Stalled), None);
        let _in_flight = d.submit(RequestEnvelope::get("h", "a"));
        let queued = d.submit(RequestEnvelope::get("h", "b"));
        d.shutdown();
        assert!(matches!(queued.wait().await, Err(DispatchError::Shutdown)));
    }
}
