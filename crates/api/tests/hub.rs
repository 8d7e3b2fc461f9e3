//! Unit tests for `WsHub`.
//!
//! These tests exercise the WebSocket connection hub directly, without
//! performing any HTTP upgrades. They verify add/remove semantics,
//! broadcast delivery, direct replies, and graceful shutdown behaviour.

use axum::extract::ws::Message;
use kiln_api::ws::WsHub;

// ---------------------------------------------------------------------------
// Test: new hub starts with zero connections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_hub_has_zero_connections() {
    let hub = WsHub::new();

    assert_eq!(hub.connection_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: add() increments the connection count
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_increments_connection_count() {
    let hub = WsHub::new();

    let _rx = hub.add("conn-1".to_string()).await;

    assert_eq!(hub.connection_count().await, 1);
}

// ---------------------------------------------------------------------------
// Test: remove() decrements the connection count
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remove_decrements_connection_count() {
    let hub = WsHub::new();

    let _rx = hub.add("conn-1".to_string()).await;
    assert_eq!(hub.connection_count().await, 1);

    hub.remove("conn-1").await;
    assert_eq!(hub.connection_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: remove() with unknown ID is a no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remove_unknown_id_is_noop() {
    let hub = WsHub::new();

    let _rx = hub.add("conn-1".to_string()).await;
    hub.remove("nonexistent").await;

    assert_eq!(hub.connection_count().await, 1);
}

// ---------------------------------------------------------------------------
// Test: broadcast() sends message to all connected clients
// ---------------------------------------------------------------------------

#[tokio::test]
async fn broadcast_sends_to_all_connections() {
    let hub = WsHub::new();

    let mut rx1 = hub.add("conn-1".to_string()).await;
    let mut rx2 = hub.add("conn-2".to_string()).await;

    hub.broadcast(Message::Text("hello everyone".into())).await;

    let msg1 = rx1.recv().await.expect("rx1 should receive broadcast");
    let msg2 = rx2.recv().await.expect("rx2 should receive broadcast");

    assert!(matches!(&msg1, Message::Text(t) if *t == "hello everyone"));
    assert!(matches!(&msg2, Message::Text(t) if *t == "hello everyone"));
}

// ---------------------------------------------------------------------------
// Test: broadcast() drops subscribers whose channels have closed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn broadcast_drops_closed_subscribers() {
    let hub = WsHub::new();

    let rx1 = hub.add("conn-1".to_string()).await;
    let mut rx2 = hub.add("conn-2".to_string()).await;

    // Drop one receiver; its channel closes and the next broadcast
    // evicts the dead entry while still reaching the live one.
    drop(rx1);

    hub.broadcast(Message::Text("hello".into())).await;

    let msg2 = rx2.recv().await.expect("rx2 should receive broadcast");
    assert!(matches!(&msg2, Message::Text(t) if *t == "hello"));
    assert_eq!(hub.connection_count().await, 1);
}

// ---------------------------------------------------------------------------
// Test: send_to() targets one connection only
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_to_targets_one_connection() {
    let hub = WsHub::new();

    let mut rx1 = hub.add("conn-1".to_string()).await;
    let mut rx2 = hub.add("conn-2".to_string()).await;

    assert!(hub.send_to("conn-1", Message::Text("direct".into())).await);

    let msg1 = rx1.recv().await.expect("rx1 should receive reply");
    assert!(matches!(&msg1, Message::Text(t) if *t == "direct"));
    assert!(rx2.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Test: send_to() an unknown connection reports false
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_to_unknown_connection_reports_false() {
    let hub = WsHub::new();

    assert!(!hub.send_to("ghost", Message::Text("direct".into())).await);
}

// ---------------------------------------------------------------------------
// Test: shutdown_all() sends Close and clears all connections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_all_sends_close_and_clears() {
    let hub = WsHub::new();

    let mut rx1 = hub.add("conn-1".to_string()).await;
    let mut rx2 = hub.add("conn-2".to_string()).await;
    assert_eq!(hub.connection_count().await, 2);

    hub.shutdown_all().await;

    assert_eq!(hub.connection_count().await, 0);

    let msg1 = rx1.recv().await.expect("rx1 should receive Close");
    assert!(
        matches!(msg1, Message::Close(None)),
        "Expected Close(None), got: {msg1:?}"
    );

    let msg2 = rx2.recv().await.expect("rx2 should receive Close");
    assert!(
        matches!(msg2, Message::Close(None)),
        "Expected Close(None), got: {msg2:?}"
    );

    // After Close, the channel should be closed (no more messages).
    assert!(
        rx1.recv().await.is_none(),
        "Channel should be closed after shutdown"
    );
}

// ---------------------------------------------------------------------------
// Test: ping_all() delivers a Ping frame to every connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_all_delivers_ping_frames() {
    let hub = WsHub::new();

    let mut rx = hub.add("conn-1".to_string()).await;

    hub.ping_all().await;

    let msg = rx.recv().await.expect("rx should receive ping");
    assert!(matches!(msg, Message::Ping(_)), "Expected Ping, got: {msg:?}");
}
