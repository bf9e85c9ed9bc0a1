//! Dispatcher ordering, limits, cancellation, and signing under load.

mod common;

use common::MockTransport;
use dojima::auth::{Credentials, RequestSigner};
use dojima::error::DispatchError;
use dojima::http::{DispatcherConfig, DispatcherHandle};
use dojima::request::{RequestEnvelope, ThrottleConfig};
use dojima::shared::HostId;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_test::assert_ok;

fn host() -> HostId {
    HostId::from("api.test")
}

fn envelope(name: &str, priority: u8) -> RequestEnvelope {
    RequestEnvelope::get(host(), "ticker/")
        .with_priority(priority)
        .param("name", name)
}

#[tokio::test]
async fn test_dispatch_follows_priority_then_fifo() {
    let transport = MockTransport::gated();
    let dispatcher = DispatcherHandle::spawn(DispatcherConfig::default());
    dispatcher.register_host(host(), transport.clone(), Some(ThrottleConfig::default()));

    // Occupies the only slot so the rest queue up behind it.
    let blocker = dispatcher.submit(envelope("x", 0));
    let queued: Vec<_> = [("a", 2), ("b", 0), ("c", 2), ("d", 1)]
        .into_iter()
        .map(|(name, priority)| dispatcher.submit(envelope(name, priority)))
        .collect();

    let stats = dispatcher.stats(&host()).await.unwrap();
    assert_eq!(stats.in_flight, 1);
    assert_eq!(stats.pending, 4);
    assert_eq!(stats.max_outstanding, 1);

    transport.release(5);
    assert_ok!(blocker.wait().await);
    for pending in queued {
        assert_ok!(pending.wait().await);
    }
    assert_eq!(transport.param_values("name"), ["x", "b", "d", "a", "c"]);
}

#[tokio::test]
async fn test_in_flight_never_exceeds_limit() {
    let transport = MockTransport::gated();
    let dispatcher = DispatcherHandle::spawn(DispatcherConfig::default());
    dispatcher.register_host(
        host(),
        transport.clone(),
        Some(ThrottleConfig::default().max_outstanding(2)),
    );

    let pending: Vec<_> = (0..6)
        .map(|i| dispatcher.submit(envelope(&i.to_string(), 1)))
        .collect();
    let stats = dispatcher.stats(&host()).await.unwrap();
    assert_eq!(stats.in_flight, 2);
    assert_eq!(stats.pending, 4);

    transport.release(6);
    for p in pending {
        p.wait().await.unwrap();
    }
    let stats = dispatcher.stats(&host()).await.unwrap();
    assert_eq!((stats.in_flight, stats.pending), (0, 0));
}

#[tokio::test]
async fn test_full_queue_reports_backpressure() {
    let transport = MockTransport::gated();
    let dispatcher = DispatcherHandle::spawn(DispatcherConfig::default());
    dispatcher.register_host(
        host(),
        transport.clone(),
        Some(ThrottleConfig::default().capacity(2)),
    );

    let first = dispatcher.submit(envelope("in-flight", 0));
    let second = dispatcher.submit(envelope("queued-1", 0));
    let third = dispatcher.submit(envelope("queued-2", 0));
    let rejected = dispatcher.submit(envelope("over", 0));

    assert!(matches!(
        rejected.wait().await,
        Err(DispatchError::Backpressure { capacity: 2, .. })
    ));
    transport.release(3);
    for p in [first, second, third] {
        p.wait().await.unwrap();
    }
}

#[tokio::test]
async fn test_cancel_pending_and_unknown() {
    let transport = MockTransport::gated();
    let dispatcher = DispatcherHandle::spawn(DispatcherConfig::default());
    dispatcher.register_host(host(), transport.clone(), None);

    let running = dispatcher.submit(envelope("running", 0));
    let waiting = dispatcher.submit(envelope("waiting", 1));
    let waiting_id = waiting.id();

    assert!(dispatcher.cancel(&host(), waiting_id).await);
    assert!(matches!(waiting.wait().await, Err(DispatchError::Cancelled)));

    // Unknown ids and in-flight envelopes are left alone.
    assert!(!dispatcher.cancel(&host(), waiting_id).await);
    assert!(!dispatcher.cancel(&host(), running.id()).await);

    transport.release(1);
    running.wait().await.unwrap();
    assert_eq!(transport.param_values("name"), ["running"]);
}

#[tokio::test]
async fn test_signed_nonces_are_unique_and_consecutive() {
    let transport = MockTransport::new();
    let dispatcher = DispatcherHandle::spawn(DispatcherConfig::default());
    dispatcher.register_host(
        host(),
        transport.clone(),
        Some(ThrottleConfig::default().max_outstanding(8)),
    );
    let signer = Arc::new(RequestSigner::with_nonce(
        Credentials::new("client", "key", "secret"),
        5_000,
    ));

    let mut tasks = Vec::new();
    for i in 0..50u8 {
        let dispatcher = dispatcher.clone();
        let signer = Arc::clone(&signer);
        tasks.push(tokio::spawn(async move {
            let env = RequestEnvelope::post(host(), "balance/")
                .with_priority(i % 4)
                .private(signer);
            dispatcher.execute(env).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let nonces: BTreeSet<u64> = transport
        .param_values("nonce")
        .iter()
        .map(|n| n.parse().unwrap())
        .collect();
    assert_eq!(nonces.len(), 50);
    assert_eq!(nonces.iter().copied().collect::<Vec<_>>(), (5_000..5_050).collect::<Vec<_>>());
    assert_eq!(signer.next_nonce(), 5_050);
}
