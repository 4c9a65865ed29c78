//! Event notification tests against the mock server.
//!
//! Exercises the auxiliary event channel end to end: channel setup through
//! `op_connect_request`, event delivery and counting, cancellation, and
//! each way the channel can be torn down.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use fb_client::{AsynchronousChannel, CancelKind, ChannelListener, DatabaseState, Error, EventNotification};
use fb_wire::Operation;

use common::{attached, wait_until};

/// Counts `channel_closing` callbacks.
#[derive(Default)]
struct ClosingCounter {
    closing: AtomicUsize,
}

impl ChannelListener for ClosingCounter {
    fn channel_closing(&self, _channel: &AsynchronousChannel) {
        self.closing.fetch_add(1, Ordering::SeqCst);
    }
}

impl ClosingCounter {
    fn count(&self) -> usize {
        self.closing.load(Ordering::SeqCst)
    }
}

fn watch(channel: &AsynchronousChannel) -> Arc<ClosingCounter> {
    let counter = Arc::new(ClosingCounter::default());
    channel.add_channel_listener(Arc::downgrade(&counter) as Weak<dyn ChannelListener>);
    counter
}

type Received = Arc<Mutex<Vec<EventNotification>>>;

fn recorder() -> (Received, impl Fn(&EventNotification) + Send + Sync + 'static) {
    let received: Received = Arc::default();
    let sink = Arc::clone(&received);
    (received, move |event: &EventNotification| sink.lock().unwrap().push(event.clone()))
}

// =============================================================================
// Delivery
// =============================================================================

#[tokio::test]
async fn test_queue_and_receive() {
    let (server, db) = attached().await;
    let (received, handler) = recorder();
    let handle = db.create_event_handle("ORDER_PLACED", handler).unwrap();
    assert_eq!(handle.event_id(), 0);

    db.queue_event(&handle).await.unwrap();
    assert!(handle.event_id() > 0);
    assert!(server.received(Operation::ConnectRequest));
    assert_eq!(server.registration_count(), 1);
    assert_eq!(server.event_channel_count(), 1);

    assert_eq!(server.post_event("ORDER_PLACED").await.unwrap(), 1);
    assert_eq!(server.post_event("SOMETHING_ELSE").await.unwrap(), 0);
    wait_until(|| received.lock().unwrap().len() == 1).await;

    let event = received.lock().unwrap()[0].clone();
    assert_eq!(event.name, "ORDER_PLACED");
    assert_eq!(event.event_id, handle.event_id());
    assert_eq!(event.event_count, 1);
    assert_eq!(db.count_events(&handle), 1);
    assert_eq!(db.count_events(&handle), 0);
}

#[tokio::test]
async fn test_pending_event_delivered_before_queue_response() {
    let (server, db) = attached().await;
    // Posted before anyone listens: the server reports it as soon as the
    // event is queued, ahead of the op_que_events response.
    assert_eq!(server.post_event("BACKLOG").await.unwrap(), 0);
    assert_eq!(server.post_event("BACKLOG").await.unwrap(), 0);

    let (received, handler) = recorder();
    let handle = db.create_event_handle("BACKLOG", handler).unwrap();
    db.queue_event(&handle).await.unwrap();
    wait_until(|| received.lock().unwrap().len() == 1).await;

    let event = received.lock().unwrap()[0].clone();
    assert_eq!(event.name, "BACKLOG");
    assert_eq!(event.event_count, 2);
    assert_eq!(handle.event_count(), 2);
    assert_eq!(db.count_events(&handle), 2);

    // Later posts keep routing to the same registration.
    assert_eq!(server.post_event("BACKLOG").await.unwrap(), 1);
    wait_until(|| received.lock().unwrap().len() == 2).await;
    assert_eq!(received.lock().unwrap()[1].event_count, 3);
    assert_eq!(received.lock().unwrap()[1].event_id, handle.event_id());
    assert_eq!(db.count_events(&handle), 1);
}

#[tokio::test]
async fn test_counter_monotonic_over_1024_frames() {
    let (server, db) = attached().await;
    let (received, handler) = recorder();
    let handle = db.create_event_handle("TICK", handler).unwrap();
    db.queue_event(&handle).await.unwrap();

    for _ in 0..1024 {
        assert_eq!(server.post_event("TICK").await.unwrap(), 1);
    }
    wait_until(|| received.lock().unwrap().len() == 1024).await;

    let counts: Vec<i32> = received.lock().unwrap().iter().map(|e| e.event_count).collect();
    assert!(counts.windows(2).all(|w| w[0] < w[1]), "counts not increasing");
    assert_eq!(counts.first(), Some(&1));
    assert_eq!(counts.last(), Some(&1024));
    assert_eq!(db.count_events(&handle), 1024);
}

#[tokio::test]
async fn test_two_handles_share_one_channel() {
    let (server, db) = attached().await;
    let (first_received, first) = recorder();
    let (second_received, second) = recorder();
    let a = db.create_event_handle("A", first).unwrap();
    let b = db.create_event_handle("B", second).unwrap();

    db.queue_event(&a).await.unwrap();
    db.queue_event(&b).await.unwrap();
    assert_ne!(a.event_id(), b.event_id());
    assert_ne!(a.local_id(), b.local_id());
    assert_eq!(server.event_channel_count(), 1);
    let channel = db.event_channel().unwrap();
    assert_eq!(channel.listener_count(), 2);

    server.post_event("B").await.unwrap();
    server.post_event("B").await.unwrap();
    server.post_event("A").await.unwrap();
    wait_until(|| first_received.lock().unwrap().len() == 1 && second_received.lock().unwrap().len() == 2).await;
    assert_eq!(db.count_events(&a), 1);
    assert_eq!(db.count_events(&b), 2);
}

#[tokio::test]
async fn test_cancel_event_stops_delivery() {
    let (server, db) = attached().await;
    let (received, handler) = recorder();
    let handle = db.create_event_handle("GONE", handler).unwrap();
    db.queue_event(&handle).await.unwrap();

    db.cancel_event(&handle).await.unwrap();
    assert_eq!(server.registration_count(), 0);
    assert_eq!(db.event_channel().unwrap().listener_count(), 0);
    assert_eq!(server.post_event("GONE").await.unwrap(), 0);
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_event_names() {
    let (_server, db) = attached().await;
    assert!(matches!(
        db.create_event_handle("", |_: &EventNotification| {}),
        Err(Error::InvalidArgument(_))
    ));
    let long = "E".repeat(256);
    assert!(matches!(
        db.create_event_handle(&long, |_: &EventNotification| {}),
        Err(Error::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_queue_requires_attachment() {
    let (_server, db) = attached().await;
    let handle = db.create_event_handle("LATE", |_: &EventNotification| {}).unwrap();
    db.close().await.unwrap();
    assert!(matches!(db.queue_event(&handle).await, Err(Error::NotAttached)));
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn test_server_exit_closes_channel_once() {
    let (server, db) = attached().await;
    let (received, handler) = recorder();
    let handle = db.create_event_handle("RESTART", handler).unwrap();
    db.queue_event(&handle).await.unwrap();
    let channel = db.event_channel().unwrap();
    let counter = watch(&channel);

    assert_eq!(server.close_event_channels().await, 1);
    wait_until(|| counter.count() == 1).await;
    assert!(channel.is_closed());
    assert!(db.is_attached());
    wait_until(|| db.event_channel().is_none()).await;

    // Queueing again sets up a fresh channel.
    db.queue_event(&handle).await.unwrap();
    let fresh = db.event_channel().unwrap();
    assert_ne!(fresh.id(), channel.id());
    server.post_event("RESTART").await.unwrap();
    wait_until(|| received.lock().unwrap().len() == 1).await;
    assert_eq!(counter.count(), 1);
}

#[tokio::test]
async fn test_explicit_close_fires_once() {
    let (_server, db) = attached().await;
    let handle = db.create_event_handle("X", |_: &EventNotification| {}).unwrap();
    db.queue_event(&handle).await.unwrap();
    let channel = db.event_channel().unwrap();
    let counter = watch(&channel);

    channel.close();
    channel.close();
    assert!(channel.is_closed());
    assert_eq!(counter.count(), 1);
    assert_eq!(channel.listener_count(), 0);
}

#[tokio::test]
async fn test_detach_closes_channel_once() {
    let (_server, db) = attached().await;
    let handle = db.create_event_handle("X", |_: &EventNotification| {}).unwrap();
    db.queue_event(&handle).await.unwrap();
    let channel = db.event_channel().unwrap();
    let counter = watch(&channel);

    db.close().await.unwrap();
    assert!(channel.is_closed());
    assert!(db.event_channel().is_none());
    // Give the reader task time to observe the closed socket as well.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(counter.count(), 1);
}

#[tokio::test]
async fn test_abort_closes_channel_once() {
    let (server, db) = attached().await;
    let handle = db.create_event_handle("X", |_: &EventNotification| {}).unwrap();
    db.queue_event(&handle).await.unwrap();
    let channel = db.event_channel().unwrap();
    let counter = watch(&channel);

    db.cancel_operation(CancelKind::Abort).await.unwrap();
    assert_eq!(db.state(), DatabaseState::Closed);
    assert!(channel.is_closed());
    wait_until(|| server.event_channel_count() == 0).await;
    assert_eq!(counter.count(), 1);
}
