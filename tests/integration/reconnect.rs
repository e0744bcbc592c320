//! Integration tests for push-channel reconnects
//!
//! Tests that every reconnect bumps the generation, forces a resync, and that
//! data tagged with an older generation is discarded.

use std::time::Duration;

use retrace::engine::{Effect, Engine};
use retrace::protocol::{ClientMessage, SyncPayload};
use retrace::transport::{self, ConnectionState, ReconnectPolicy, TransportError, TransportEvent};
use serde_json::json;

use super::common::{line_step, recv_within, sync_payload, MockBackend};

fn fast_reconnect() -> ReconnectPolicy {
    ReconnectPolicy::fixed(Duration::from_millis(50))
}

/// Server-side close leads to a new generation and a new resync request
#[tokio::test]
async fn test_reconnect_bumps_generation_and_resyncs() {
    let mock = MockBackend::start().await;
    let (mut channel, mut events) = transport::connect(mock.ws_url(), fast_reconnect());
    let mut engine = Engine::default();

    let first = recv_within(&mut events).await.expect("connected");
    assert_eq!(engine.handle_transport(first), vec![Effect::FetchSync { generation: 1 }]);
    mock.wait_for_connections(1).await;

    mock.disconnect_all();
    let dropped = recv_within(&mut events).await.expect("disconnected");
    assert!(matches!(dropped, TransportEvent::Disconnected { generation: 1, .. }));
    engine.handle_transport(dropped);
    assert_eq!(engine.connection(), &ConnectionState::Disconnected);

    let second = recv_within(&mut events).await.expect("reconnected");
    assert_eq!(second, TransportEvent::Connected { generation: 2 });
    assert_eq!(engine.handle_transport(second), vec![Effect::FetchSync { generation: 2 }]);

    // A sync requested on the first connection lands late and is ignored
    let stale: SyncPayload =
        serde_json::from_value(sync_payload(vec![line_step(1, 1, json!({}))], Some(1))).unwrap();
    engine.apply_sync_response(1, stale.clone());
    assert!(engine.timeline().is_empty());
    engine.apply_sync_response(2, stale);
    assert_eq!(engine.timeline().len(), 1);

    channel.shutdown().await;
}

/// The channel keeps retrying until a backend shows up
#[tokio::test]
async fn test_connect_retries_until_backend_is_up() {
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let url = format!("ws://{addr}/api/ws");
    let (mut channel, mut events) = transport::connect(url, fast_reconnect());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!channel.is_connected());

    let _mock = MockBackend::start_on(addr).await;
    let event = recv_within(&mut events).await.expect("connected");
    assert_eq!(event, TransportEvent::Connected { generation: 1 });
    assert_eq!(channel.generation(), Some(1));

    channel.shutdown().await;
}

/// Teardown ends the event stream and rejects further sends
#[tokio::test]
async fn test_shutdown_releases_everything() {
    let mock = MockBackend::start().await;
    let (mut channel, mut events) = transport::connect(mock.ws_url(), fast_reconnect());
    recv_within(&mut events).await.expect("connected");
    let mut state = channel.subscribe();

    channel.shutdown().await;
    channel.shutdown().await;

    assert_eq!(recv_within(&mut events).await, None);
    assert_eq!(*state.borrow_and_update(), ConnectionState::Closed);
    assert!(matches!(
        channel.send(&ClientMessage::Continue),
        Err(TransportError::NotConnected)
    ));
}
