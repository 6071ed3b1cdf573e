//! Integration tests for WebSocket real-time event streaming.
//!
//! These tests validate the WebSocket server functionality including
//! connection handling, event broadcasting, and concurrent client support.

mod support;

use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use serde_json::json;
use support::TutorServer;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;
use tutor_orchestrator::{Config, RequestType, ServiceId, SkillLevel, TutorEvent};

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects a WebSocket client to the given URL.
async fn connect_client(url: &str) -> WsClient {
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Receives the next text message from the WebSocket and parses it as a `TutorEvent`.
/// Automatically handles ping frames by responding with pong.
async fn receive_event(client: &mut WsClient) -> TutorEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

async fn explain(server: &TutorServer, user_id: &str) -> reqwest::StatusCode {
    reqwest::Client::new()
        .post(server.api("/explain"))
        .json(&json!({"concept": "gas", "userId": user_id}))
        .send()
        .await
        .expect("Failed to send HTTP request")
        .status()
}

// ============================================================================
// Connection Tests
// ============================================================================

/// Tests that a client receives health and metrics on connection.
#[tokio::test]
async fn test_client_receives_connected_snapshot() {
    let server = TutorServer::spawn(Config::default()).await;

    let mut client = connect_client(&server.ws_url()).await;
    let event = receive_event(&mut client).await;

    let TutorEvent::Connected(payload) = event else {
        panic!("Expected Connected event, got: {event:?}");
    };
    assert_eq!(payload.health.len(), 2);
    assert!(payload.health.iter().all(|r| r.healthy));
    assert_eq!(payload.metrics.total_requests, 0);
}

/// Tests that the connected snapshot reflects earlier traffic.
#[tokio::test]
async fn test_connected_snapshot_reflects_metrics() {
    let server = TutorServer::spawn(Config::default()).await;
    assert_eq!(explain(&server, "u1").await, 200);

    let mut client = connect_client(&server.ws_url()).await;
    let TutorEvent::Connected(payload) = receive_event(&mut client).await else {
        panic!("Expected Connected event");
    };
    assert_eq!(payload.metrics.total_requests, 1);
    assert_eq!(payload.metrics.active_users, 1);
}

/// Tests that multiple clients can connect concurrently.
#[tokio::test]
async fn test_multiple_clients_can_connect() {
    let server = TutorServer::spawn(Config::default()).await;

    let mut client1 = connect_client(&server.ws_url()).await;
    let mut client2 = connect_client(&server.ws_url()).await;
    let mut client3 = connect_client(&server.ws_url()).await;

    assert!(matches!(receive_event(&mut client1).await, TutorEvent::Connected(_)));
    assert!(matches!(receive_event(&mut client2).await, TutorEvent::Connected(_)));
    assert!(matches!(receive_event(&mut client3).await, TutorEvent::Connected(_)));
}

// ============================================================================
// Event Broadcast Tests
// ============================================================================

/// Tests that a completed request is broadcast to every client.
#[tokio::test]
async fn test_request_completed_broadcast_to_all_clients() {
    let server = TutorServer::spawn(Config::default()).await;

    let mut client1 = connect_client(&server.ws_url()).await;
    let mut client2 = connect_client(&server.ws_url()).await;
    receive_event(&mut client1).await;
    receive_event(&mut client2).await;

    assert_eq!(explain(&server, "u1").await, 200);

    for client in [&mut client1, &mut client2] {
        let event = receive_event(client).await;
        let TutorEvent::RequestCompleted(payload) = event else {
            panic!("Expected RequestCompleted event, got: {event:?}");
        };
        assert_eq!(payload.user_id, "u1");
        assert_eq!(payload.request_type, RequestType::Explanation);
        assert_eq!(payload.service, ServiceId::Cloud);
        assert!(payload.success);
        assert!(!payload.used_fallback);
    }
}

/// Tests that failover is visible on the event stream.
#[tokio::test]
async fn test_fallback_visible_in_events() {
    let server = TutorServer::spawn(Config::default()).await;
    server.cloud.set_up(false);

    let mut client = connect_client(&server.ws_url()).await;
    receive_event(&mut client).await;

    assert_eq!(explain(&server, "u1").await, 200);

    let event = receive_event(&mut client).await;
    let TutorEvent::RequestCompleted(payload) = event else {
        panic!("Expected RequestCompleted event, got: {event:?}");
    };
    assert_eq!(payload.service, ServiceId::Local);
    assert!(payload.used_fallback);
}

/// Tests that health transitions are broadcast.
#[tokio::test]
async fn test_health_change_broadcast() {
    let mut config = Config::default();
    config.health.failure_threshold = 2;
    let server = TutorServer::spawn(config).await;
    server.cloud.set_up(false);

    let mut client = connect_client(&server.ws_url()).await;
    receive_event(&mut client).await;

    // Two failed cloud attempts reach the threshold
    assert_eq!(explain(&server, "u1").await, 200);
    assert_eq!(explain(&server, "u1").await, 200);

    let mut saw_unhealthy = false;
    for _ in 0..3 {
        if let TutorEvent::ServiceHealthChanged(payload) = receive_event(&mut client).await {
            assert_eq!(payload.service, ServiceId::Cloud);
            assert!(!payload.healthy);
            assert_eq!(payload.consecutive_failures, 2);
            saw_unhealthy = true;
            break;
        }
    }
    assert!(saw_unhealthy, "Expected a service_health_changed event");
}

/// Tests that quota denials are broadcast.
#[tokio::test]
async fn test_rate_limited_broadcast() {
    let mut config = Config::default();
    config.rate_limits.explanation = 1;
    let server = TutorServer::spawn(config).await;

    let mut client = connect_client(&server.ws_url()).await;
    receive_event(&mut client).await;

    assert_eq!(explain(&server, "u1").await, 200);
    assert!(matches!(
        receive_event(&mut client).await,
        TutorEvent::RequestCompleted(_)
    ));

    assert_eq!(explain(&server, "u1").await, 429);
    let event = receive_event(&mut client).await;
    let TutorEvent::RateLimited(payload) = event else {
        panic!("Expected RateLimited event, got: {event:?}");
    };
    assert_eq!(payload.user_id, "u1");
    assert_eq!(payload.request_type, RequestType::Explanation);
}

/// Tests that progress updates are broadcast.
#[tokio::test]
async fn test_context_updated_broadcast() {
    let server = TutorServer::spawn(Config::default()).await;

    let mut client = connect_client(&server.ws_url()).await;
    receive_event(&mut client).await;

    let response = reqwest::Client::new()
        .post(server.api("/users/u7/challenges/complete"))
        .json(&json!({"topic": "gas", "difficulty": 10, "success": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let event = receive_event(&mut client).await;
    let TutorEvent::ContextUpdated(payload) = event else {
        panic!("Expected ContextUpdated event, got: {event:?}");
    };
    assert_eq!(payload.user_id, "u7");
    assert_eq!(payload.total_xp, 250);
    assert_eq!(payload.skill_level, SkillLevel::Beginner);
}

// ============================================================================
// Disconnection Tests
// ============================================================================

/// Tests that client can cleanly disconnect.
#[tokio::test]
async fn test_client_can_disconnect() {
    let server = TutorServer::spawn(Config::default()).await;

    let mut client = connect_client(&server.ws_url()).await;
    receive_event(&mut client).await;

    client
        .close(None)
        .await
        .expect("Failed to close connection");
}

/// Tests that server continues after client disconnects.
#[tokio::test]
async fn test_server_continues_after_client_disconnect() {
    let server = TutorServer::spawn(Config::default()).await;

    let mut client1 = connect_client(&server.ws_url()).await;
    receive_event(&mut client1).await;
    client1.close(None).await.ok();
    drop(client1);

    // Give server time to process disconnect
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client2 = connect_client(&server.ws_url()).await;
    assert!(matches!(receive_event(&mut client2).await, TutorEvent::Connected(_)));

    assert_eq!(explain(&server, "u1").await, 200);
    assert!(matches!(
        receive_event(&mut client2).await,
        TutorEvent::RequestCompleted(_)
    ));
}
