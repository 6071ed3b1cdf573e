//! End-to-end tests for the HTTP API.
//!
//! Each test runs a real tutor server whose backends are HTTP adapters
//! pointed at stub model services, and drives it with `reqwest`.

mod support;

use std::time::Duration;

use serde_json::{json, Value};
use support::TutorServer;
use tutor_orchestrator::{Config, ServiceId};

async fn post(server: &TutorServer, path: &str, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(server.api(path))
        .json(&body)
        .send()
        .await
        .expect("Failed to send HTTP request")
}

async fn get_json(server: &TutorServer, path: &str) -> Value {
    reqwest::get(server.api(path))
        .await
        .expect("Failed to send HTTP request")
        .json()
        .await
        .expect("Failed to parse body")
}

// ============================================================================
// Tutoring
// ============================================================================

#[tokio::test]
async fn test_explanation_served_by_preferred_backend() {
    let server = TutorServer::spawn(Config::default()).await;

    let response = post(&server, "/explain", json!({"concept": "gas", "userId": "u1"})).await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["content"], "cloud explains it");
    assert_eq!(body["model"], "cloud");
    assert_eq!(server.local.calls(), 0);
}

#[tokio::test]
async fn test_explanation_fails_over_to_local() {
    let server = TutorServer::spawn(Config::default()).await;
    server.cloud.set_up(false);

    let response = post(&server, "/explain", json!({"concept": "gas", "userId": "u1"})).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["content"], "local explains it");

    let metrics = get_json(&server, "/metrics").await;
    assert_eq!(metrics["totalRequests"], 1);
    assert_eq!(metrics["fallbackCount"], 1);
    assert_eq!(metrics["successfulRequests"], 1);
}

#[tokio::test]
async fn test_both_backends_down_returns_503() {
    let server = TutorServer::spawn(Config::default()).await;
    server.local.set_up(false);
    server.cloud.set_up(false);

    let response = post(&server, "/explain", json!({"concept": "gas", "userId": "u1"})).await;
    assert_eq!(response.status(), 503);
    assert_eq!(response.headers()["retry-after"], "60");

    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("unavailable"));
    assert!(body["suggestion"].is_string());

    let metrics = get_json(&server, "/metrics").await;
    assert_eq!(metrics["failedRequests"], 1);
}

#[tokio::test]
async fn test_challenge_difficulty_is_clamped() {
    let server = TutorServer::spawn(Config::default()).await;

    let response = post(
        &server,
        "/challenge",
        json!({"userId": "u1", "topic": "reentrancy"}),
    )
    .await;
    assert_eq!(response.status(), 200);

    let challenge: Value = response.json().await.unwrap();
    assert_eq!(challenge["difficulty"], 10);
    assert_eq!(challenge["title"], "Guard the vault");
    assert_eq!(server.local.calls(), 1);
}

#[tokio::test]
async fn test_security_analysis_is_normalised() {
    let server = TutorServer::spawn(Config::default()).await;

    let response = post(
        &server,
        "/security/analyze",
        json!({"code": "contract Vault {}", "userId": "u1"}),
    )
    .await;
    assert_eq!(response.status(), 200);

    let analysis: Value = response.json().await.unwrap();
    assert_eq!(analysis["overallScore"], 100);
    assert_eq!(analysis["vulnerabilities"][0]["severity"], "high");
    assert_eq!(analysis["vulnerabilities"][0]["line"], 12);
}

#[tokio::test]
async fn test_contract_and_multi_modal() {
    let server = TutorServer::spawn(Config::default()).await;

    let response = post(
        &server,
        "/contracts/generate",
        json!({"description": "a token", "requirements": ["fixed supply"], "userId": "u1"}),
    )
    .await;
    assert_eq!(response.status(), 200);
    let contract: Value = response.json().await.unwrap();
    assert!(contract["code"].as_str().unwrap().contains("contract Token"));

    let response = post(
        &server,
        "/explain/multimodal",
        json!({"concept": "gas", "userId": "u1"}),
    )
    .await;
    assert_eq!(response.status(), 200);
    let explanation: Value = response.json().await.unwrap();
    assert_eq!(explanation["diagram"], "graph LR; Tx-->Gas");
}

#[tokio::test]
async fn test_voice_command_round_trip() {
    let server = TutorServer::spawn(Config::default()).await;

    let response = reqwest::Client::new()
        .post(server.api("/voice?userId=u1"))
        .body(vec![0_u8, 1, 2, 3])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let result: Value = response.json().await.unwrap();
    assert_eq!(result["command"], "Explain gas refunds?");
    assert_eq!(result["action"], "explain");
    assert_eq!(result["response"], "cloud explains it");

    let context = get_json(&server, "/users/u1/context").await;
    assert_eq!(context["recentTopics"][0], "gas refunds");
}

// ============================================================================
// Quotas
// ============================================================================

#[tokio::test]
async fn test_quota_boundary() {
    let mut config = Config::default();
    config.rate_limits.explanation = 2;
    let server = TutorServer::spawn(config).await;
    let body = json!({"concept": "gas", "userId": "u1"});

    assert_eq!(post(&server, "/explain", body.clone()).await.status(), 200);
    assert_eq!(post(&server, "/explain", body.clone()).await.status(), 200);

    let denied = post(&server, "/explain", body).await;
    assert_eq!(denied.status(), 429);
    assert!(denied.headers().contains_key("retry-after"));

    // A different request type has its own budget
    let challenge = post(&server, "/challenge", json!({"userId": "u1", "topic": "gas"})).await;
    assert_eq!(challenge.status(), 200);

    let metrics = get_json(&server, "/metrics").await;
    assert_eq!(metrics["rateLimitedRequests"], 1);
    assert_eq!(metrics["totalRequests"], 3);
}

// ============================================================================
// Learner state
// ============================================================================

#[tokio::test]
async fn test_progress_flow() {
    let server = TutorServer::spawn(Config::default()).await;

    let context = get_json(&server, "/users/u1/context").await;
    assert_eq!(context["skillLevel"], "BEGINNER");
    assert_eq!(context["totalXP"], 150);

    let response = post(
        &server,
        "/users/u1/challenges/complete",
        json!({"topic": "events-and-logging", "difficulty": 4, "success": false, "timeSpentSecs": 60}),
    )
    .await;
    assert_eq!(response.status(), 200);

    let path: Value = post(&server, "/users/u1/path", json!({}))
        .await
        .json()
        .await
        .unwrap();
    let topics = path["learningPath"].as_array().unwrap();
    assert!(topics.len() <= 8);
    // Recently studied, so not repeated immediately even though weak
    assert!(!topics.iter().any(|t| t == "events-and-logging"));

    let response = reqwest::Client::new()
        .patch(server.api("/users/u1/context"))
        .json(&json!({"recentTopics": [], "totalXP": 5200}))
        .send()
        .await
        .unwrap();
    let context: Value = response.json().await.unwrap();
    assert_eq!(context["skillLevel"], "ADVANCED");

    let path: Value = post(&server, "/users/u1/path", json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(path["learningPath"][0], "events-and-logging");
    let context = get_json(&server, "/users/u1/context").await;
    assert_eq!(context["learningPath"], path["learningPath"]);

    let analytics = get_json(&server, "/users/u1/analytics").await;
    assert_eq!(analytics["timeSpentPerTopic"]["events-and-logging"], 60);
    assert!(analytics["recommendedNextTopics"].is_array());
}

#[tokio::test]
async fn test_invalid_difficulty_returns_400() {
    let server = TutorServer::spawn(Config::default()).await;

    let response = post(
        &server,
        "/users/u1/challenges/complete",
        json!({"topic": "gas", "difficulty": 0, "success": true}),
    )
    .await;
    assert_eq!(response.status(), 400);
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_probes_mark_down_backend_unhealthy_and_reroute() {
    let mut config = Config::default();
    config.health.failure_threshold = 1;
    let server = TutorServer::spawn(config).await;
    server.local.set_up(false);

    let probes = server.orchestrator.spawn_health_probes();
    // The first probe fires immediately
    tokio::time::sleep(Duration::from_millis(300)).await;

    let health = get_json(&server, "/health").await;
    assert_eq!(health["healthy"], true);
    let local = health["services"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["serviceId"] == ServiceId::Local.as_str())
        .unwrap();
    assert_eq!(local["healthy"], false);

    // Code requests prefer local, but now go straight to cloud
    server.local.set_up(true);
    let response = post(&server, "/challenge", json!({"userId": "u1", "topic": "gas"})).await;
    assert_eq!(response.status(), 200);
    assert_eq!(server.cloud.calls(), 1);
    assert_eq!(server.local.calls(), 0);

    for probe in probes {
        probe.abort();
    }
}

#[tokio::test]
async fn test_feature_flags_endpoint() {
    let mut config = Config::default();
    config
        .feature_flags
        .insert("voiceCommands".to_string(), false);
    let server = TutorServer::spawn(config).await;

    let flag = get_json(&server, "/features/voiceCommands").await;
    assert_eq!(flag["enabled"], false);

    let response = reqwest::Client::new()
        .post(server.api("/voice?userId=u1"))
        .body(vec![1_u8])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}
