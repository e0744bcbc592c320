//! Integration tests for a live session
//!
//! Tests the flow: mock backend -> push channel / HTTP -> Engine state

use std::time::Duration;

use retrace::engine::{Effect, Engine};
use retrace::protocol::{ClientMessage, StreamName};
use retrace::transport::{self, Backend, HttpBackend, ReconnectPolicy, TransportError, TransportEvent};
use serde_json::json;

use super::common::{event_frame, line_step, recv_within, sync_payload, MockBackend};

fn fast_reconnect() -> ReconnectPolicy {
    ReconnectPolicy::fixed(Duration::from_millis(50))
}

fn http(mock: &MockBackend) -> HttpBackend {
    HttpBackend::new(mock.http_url(), Duration::from_secs(5)).expect("http client")
}

/// Connect, resync over HTTP, then follow live events pushed by the backend
#[tokio::test]
async fn test_engine_resyncs_then_follows_live_events() {
    let mock = MockBackend::start().await;
    mock.set_sync(sync_payload(
        vec![
            line_step(1, 1, json!({"x": 1})),
            line_step(2, 2, json!("{\"y\": 2}")),
        ],
        Some(2),
    ))
    .await;

    let (mut channel, mut events) = transport::connect(mock.ws_url(), fast_reconnect());
    let mut engine = Engine::default();

    let connected = recv_within(&mut events).await.expect("connected event");
    assert_eq!(connected, TransportEvent::Connected { generation: 1 });
    let effects = engine.handle_transport(connected);
    assert_eq!(effects, vec![Effect::FetchSync { generation: 1 }]);

    let payload = http(&mock).fetch_sync().await.expect("sync");
    engine.apply_sync_response(1, payload);
    assert_eq!(engine.timeline().len(), 2);
    assert_eq!(engine.cursor(), Some(2));
    assert_eq!(engine.nodes().len(), 5);

    mock.wait_for_connections(1).await;
    mock.push(event_frame(line_step(3, 4, json!({"x": "<deleted>"}))));
    mock.push(json!({"type": "stdout", "data": "hello "}));
    mock.push(json!({"type": "stdout", "data": "world\n"}));
    mock.push(json!({"type": "flush", "data": "stdout"}));

    for _ in 0..4 {
        let event = recv_within(&mut events).await.expect("frame");
        assert!(matches!(event, TransportEvent::Frame { generation: 1, .. }));
        engine.handle_transport(event);
    }

    assert_eq!(engine.cursor(), Some(3));
    assert_eq!(engine.highlighted_line(), Some(4));
    let scope = engine.scope().expect("scope at cursor");
    assert!(!scope.globals.contains_key("x"));
    assert_eq!(scope.globals.get("y"), Some(&json!(2)));

    let entries: Vec<_> = engine.streams().entries().collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].stream, StreamName::Stdout);
    assert_eq!(entries[0].text, "hello world\n");
    assert!(entries[0].flushed);

    channel.shutdown().await;
}

/// Malformed frames are dropped without disturbing the channel
#[tokio::test]
async fn test_malformed_frames_do_not_break_the_channel() {
    let mock = MockBackend::start().await;
    let (mut channel, mut events) = transport::connect(mock.ws_url(), fast_reconnect());
    let mut engine = Engine::default();
    engine.handle_transport(recv_within(&mut events).await.expect("connected"));
    mock.wait_for_connections(1).await;

    mock.push_raw("{not json");
    mock.push(json!({"type": "telemetry", "data": {}}));
    mock.push(event_frame(line_step(1, 1, json!({}))));

    for _ in 0..3 {
        engine.handle_transport(recv_within(&mut events).await.expect("frame"));
    }
    assert_eq!(engine.timeline().len(), 1);
    assert!(channel.is_connected());

    channel.shutdown().await;
}

/// Outbound commands arrive at the backend in the documented wire format
#[tokio::test]
async fn test_outbound_messages_reach_backend() {
    let mut mock = MockBackend::start().await;
    let (mut channel, mut events) = transport::connect(mock.ws_url(), fast_reconnect());
    recv_within(&mut events).await.expect("connected");

    channel.send(&ClientMessage::Continue).expect("send continue");
    channel
        .send(&ClientMessage::NewTimelineId { new_timeline_id: 7 })
        .expect("send seek");
    channel
        .send(&ClientMessage::UpdateNodeCode {
            lineno: 2,
            code_segment: "y = 3".to_string(),
        })
        .expect("send edit");

    assert_eq!(mock.next_message().await, json!({"type": "continue"}));
    assert_eq!(
        mock.next_message().await,
        json!({"type": "new_timeline_id", "new_timeline_id": 7})
    );
    assert_eq!(
        mock.next_message().await,
        json!({"type": "update_node_code", "lineno": 2, "code_segment": "y = 3"})
    );

    channel.shutdown().await;
}

/// Restart posts to the backend and the engine asks for a fresh sync
#[tokio::test]
async fn test_restart_posts_app_start() {
    let mock = MockBackend::start().await;
    let backend = http(&mock);
    let mut engine = Engine::default();
    engine.handle_transport(TransportEvent::Connected { generation: 1 });

    assert_eq!(engine.restart_backend(), vec![Effect::StartBackend]);
    backend.start_app().await.expect("app start");
    assert_eq!(mock.app_starts(), 1);
    assert_eq!(
        engine.backend_restarted(),
        vec![Effect::FetchSync { generation: 1 }]
    );
}

/// A failing sync endpoint surfaces as a status error
#[tokio::test]
async fn test_sync_failure_reports_status() {
    let mock = MockBackend::start().await;
    mock.fail_sync(true);
    let err = http(&mock).fetch_sync().await.expect_err("sync should fail");
    match err {
        TransportError::Status { status, body } => {
            assert_eq!(status.as_u16(), 500);
            assert_eq!(body, "sync unavailable");
        }
        other => panic!("Expected status error, got {:?}", other),
    }
}
