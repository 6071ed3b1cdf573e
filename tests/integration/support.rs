//! Shared helpers: stub model services and an in-process tutor server.

#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tutor_orchestrator::{
    create_router, AppState, Backends, Config, EventBroadcaster, HttpBackend, HttpTranscriber,
    InMemoryRepository, ServiceId, Transcriber, TutorOrchestrator,
};

/// Helper to find an available port for testing.
pub fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

async fn serve(router: Router) -> String {
    let addr = format!("127.0.0.1:{}", find_available_port());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("http://{addr}")
}

// ============================================================================
// Stub model service
// ============================================================================

/// A fake inference service speaking the HTTP adapter's protocol.
#[derive(Clone)]
pub struct StubModel {
    /// Base URL.
    pub url: String,
    name: &'static str,
    up: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl StubModel {
    /// Starts a healthy stub.
    pub async fn spawn(name: &'static str) -> Self {
        let mut stub = Self {
            url: String::new(),
            name,
            up: Arc::new(AtomicBool::new(true)),
            calls: Arc::new(AtomicUsize::new(0)),
        };

        let router = Router::new()
            .route("/generate", post(generate))
            .route("/health", get(health))
            .route("/transcribe", post(transcribe))
            .with_state(stub.clone());
        stub.url = serve(router).await;
        stub
    }

    /// Makes the stub fail or recover.
    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    /// Number of generate calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Canned output per request type, shaped the way a model would answer.
fn reply_for(name: &str, request_type: &str) -> String {
    match request_type {
        "challenge" => r#"Here you go:
```json
{"title":"Guard the vault","description":"Add a reentrancy guard to withdraw()","difficulty":42,"starterCode":"contract Vault {}","hints":["Checks-effects-interactions"],"learningObjectives":["Reentrancy"]}
```"#
            .to_string(),
        "security_analysis" => r#"{"overallScore":140,"vulnerabilities":[{"severity":"low","title":"Floating pragma","description":"Pin the compiler"},{"severity":"high","title":"Reentrancy","description":"External call before state update","line":12,"recommendation":"Use a guard"}],"gasOptimizations":["Cache storage reads"],"bestPractices":["Emit events"]}"#
            .to_string(),
        "contract_generation" => "```solidity\ncontract Token {\n    uint256 public totalSupply;\n}\n```".to_string(),
        "multi_modal" => r#"{"text":"Gas meters computation","diagram":"graph LR; Tx-->Gas","interactiveExample":"Change the loop bound","codeExample":"uint256 x = 1;"}"#
            .to_string(),
        _ => format!("{name} explains it"),
    }
}

async fn generate(
    State(stub): State<StubModel>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    stub.calls.fetch_add(1, Ordering::SeqCst);
    if !stub.up.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let request_type = body["requestType"].as_str().unwrap_or_default();
    Json(serde_json::json!({ "text": reply_for(stub.name, request_type) })).into_response()
}

async fn health(State(stub): State<StubModel>) -> StatusCode {
    if stub.up.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn transcribe() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "text": "Explain gas refunds?" }))
}

// ============================================================================
// Tutor server
// ============================================================================

/// A tutor server wired to two stub models.
pub struct TutorServer {
    /// Base HTTP URL.
    pub url: String,
    /// The orchestrator behind the server.
    pub orchestrator: TutorOrchestrator,
    /// The local stub.
    pub local: StubModel,
    /// The cloud stub.
    pub cloud: StubModel,
}

impl TutorServer {
    /// Starts stubs and a tutor server using `config`.
    pub async fn spawn(config: Config) -> Self {
        let local = StubModel::spawn("local").await;
        let cloud = StubModel::spawn("cloud").await;
        let timeout = config.backend_timeout();

        let backends = Backends::new(
            Arc::new(HttpBackend::new(ServiceId::Local, &local.url, timeout).expect("local adapter")),
            Arc::new(HttpBackend::new(ServiceId::Cloud, &cloud.url, timeout).expect("cloud adapter")),
        );
        let transcriber: Arc<dyn Transcriber> = Arc::new(HttpTranscriber::new(&local.url));

        let orchestrator = TutorOrchestrator::new(
            config,
            backends,
            Arc::new(InMemoryRepository::new()),
            Some(transcriber),
            EventBroadcaster::default(),
        );
        let url = serve(create_router(AppState::new(orchestrator.clone()))).await;

        Self {
            url,
            orchestrator,
            local,
            cloud,
        }
    }

    /// Returns the URL for an API path.
    pub fn api(&self, path: &str) -> String {
        format!("{}/api{path}", self.url)
    }

    /// Returns the WebSocket URL.
    pub fn ws_url(&self) -> String {
        format!("{}/api/ws", self.url.replace("http://", "ws://"))
    }
}
