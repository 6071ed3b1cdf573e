//! HTTP API for the tutoring orchestrator.
//!
//! A thin JSON layer over [`TutorOrchestrator`]. Every handler delegates to
//! one orchestrator operation and maps its error to a status code.
//!
//! # Endpoints
//!
//! - `POST /api/explain` - Explain a concept
//! - `POST /api/explain/multimodal` - Explain a concept four ways
//! - `POST /api/challenge` - Generate a personalised challenge
//! - `POST /api/security/analyze` - Audit Solidity code
//! - `POST /api/contracts/generate` - Generate a contract
//! - `POST /api/voice?userId=...` - Serve a voice command (raw audio body)
//! - `GET|PATCH /api/users/:id/context` - Read or merge a learning context
//! - `POST /api/users/:id/path` - Build and store the adaptive learning path
//! - `GET /api/users/:id/analytics` - Learning analytics
//! - `POST /api/users/:id/challenges/complete` - Record a challenge attempt
//! - `POST /api/feedback` - Record a satisfaction score
//! - `GET /api/health` - Backend health
//! - `GET /api/metrics` - Aggregate metrics
//! - `GET /api/features/:name` - Feature flag lookup
//! - `GET /api/ws` - WebSocket event stream
//!
//! # Example
//!
//! ```no_run
//! use tutor_orchestrator::{create_router, AppState, TutorOrchestrator};
//!
//! # async fn example(orchestrator: TutorOrchestrator) {
//! let router = create_router(AppState::new(orchestrator));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::analytics::LearningAnalytics;
use crate::context::{ContextUpdate, UserLearningContext};
use crate::error::TutorError;
use crate::health::ServiceHealthRecord;
use crate::metrics::MetricsSnapshot;
use crate::orchestrator::{
    ChallengeCompletion, ChallengeOutcome, TutorOrchestrator, VoiceCommandResult,
};
use crate::parsing::{
    Challenge, ContractGenerationResult, MultiModalExplanation, SecurityAnalysis, TutorResponse,
};
use crate::websocket::ws_handler;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for the explanation endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainRequest {
    /// The concept to explain.
    pub concept: String,
    /// The requesting learner.
    pub user_id: String,
}

/// Request body for the challenge endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    /// The requesting learner.
    pub user_id: String,
    /// The challenge topic.
    pub topic: String,
}

/// Request body for the security analysis endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRequest {
    /// Solidity source to audit.
    pub code: String,
    /// The requesting learner.
    pub user_id: String,
}

/// Request body for the contract generation endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRequest {
    /// What the contract should do.
    pub description: String,
    /// Extra requirements.
    #[serde(default)]
    pub requirements: Vec<String>,
    /// The requesting learner.
    pub user_id: String,
}

/// Query string for the voice endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceQuery {
    /// The requesting learner.
    pub user_id: String,
}

/// Request body for the feedback endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackRequest {
    /// Satisfaction score, 1 to 5.
    pub score: u8,
}

/// Response body for the feedback endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackResponse {
    /// Whether the score was recorded.
    pub recorded: bool,
    /// Mean satisfaction after this score.
    pub user_satisfaction: f64,
}

/// Response body for the learning path endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPathResponse {
    /// The learner.
    pub user_id: String,
    /// Topics in study order.
    pub learning_path: Vec<String>,
}

/// Response body for the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `true` when at least one backend is healthy.
    pub healthy: bool,
    /// Per-backend health.
    pub services: Vec<ServiceHealthRecord>,
}

/// Response body for the feature flag endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureResponse {
    /// The flag name.
    pub name: String,
    /// Whether it is enabled.
    pub enabled: bool,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
    /// What the caller can do about it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The orchestrator every handler delegates to.
    pub orchestrator: TutorOrchestrator,
}

impl AppState {
    /// Creates a new `AppState`.
    #[must_use]
    pub const fn new(orchestrator: TutorOrchestrator) -> Self {
        Self { orchestrator }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
struct ApiError(TutorError);

impl From<TutorError> for ApiError {
    fn from(error: TutorError) -> Self {
        Self(error)
    }
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match &self.0 {
            TutorError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            TutorError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            TutorError::MalformedBackendOutput { .. } | TutorError::Transcription { .. } => {
                StatusCode::BAD_GATEWAY
            }
            TutorError::FeatureDisabled { .. } => StatusCode::FORBIDDEN,
            TutorError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self.0.retry_after_secs();

        let message = self.0.to_string();
        let (error, suggestion) = match message.split_once("\n\nSuggestion: ") {
            Some((error, suggestion)) => (error.to_string(), Some(suggestion.to_string())),
            None => (message, None),
        };

        if status.is_server_error() {
            warn!(%status, %error, "Request failed");
        } else {
            info!(%status, %error, "Request rejected");
        }

        let mut response = (status, Json(ErrorResponse { error, suggestion })).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all API endpoints.
///
/// All routes live under `/api`, with CORS open for browser clients and
/// request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/explain", post(handle_explain))
        .route("/explain/multimodal", post(handle_multi_modal))
        .route("/challenge", post(handle_challenge))
        .route("/security/analyze", post(handle_security))
        .route("/contracts/generate", post(handle_contract))
        .route("/voice", post(handle_voice))
        .route(
            "/users/:id/context",
            get(handle_get_context).patch(handle_update_context),
        )
        .route("/users/:id/path", post(handle_learning_path))
        .route("/users/:id/analytics", get(handle_analytics))
        .route("/users/:id/challenges/complete", post(handle_complete_challenge))
        .route("/feedback", post(handle_feedback))
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route("/features/:name", get(handle_feature))
        .route("/ws", get(ws_handler));

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_explain(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExplainRequest>,
) -> ApiResult<TutorResponse> {
    let response = state
        .orchestrator
        .explain_concept(&request.concept, &request.user_id)
        .await?;
    Ok(Json(response))
}

async fn handle_multi_modal(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExplainRequest>,
) -> ApiResult<MultiModalExplanation> {
    let explanation = state
        .orchestrator
        .generate_multi_modal_explanation(&request.concept, &request.user_id)
        .await?;
    Ok(Json(explanation))
}

async fn handle_challenge(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChallengeRequest>,
) -> ApiResult<Challenge> {
    let challenge = state
        .orchestrator
        .generate_personalized_challenge(&request.user_id, &request.topic)
        .await?;
    Ok(Json(challenge))
}

async fn handle_security(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SecurityRequest>,
) -> ApiResult<SecurityAnalysis> {
    let analysis = state
        .orchestrator
        .analyze_code_security(&request.code, &request.user_id)
        .await?;
    Ok(Json(analysis))
}

async fn handle_contract(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ContractRequest>,
) -> ApiResult<ContractGenerationResult> {
    let result = state
        .orchestrator
        .generate_smart_contract(&request.description, &request.requirements, &request.user_id)
        .await?;
    Ok(Json(result))
}

/// Handler for `POST /api/voice`. The body is the raw audio.
async fn handle_voice(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VoiceQuery>,
    audio: Bytes,
) -> ApiResult<VoiceCommandResult> {
    let result = state
        .orchestrator
        .process_voice_command(&audio, &query.user_id)
        .await?;
    Ok(Json(result))
}

async fn handle_get_context(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Json<UserLearningContext> {
    Json(state.orchestrator.user_context(&user_id).await)
}

async fn handle_update_context(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(update): Json<ContextUpdate>,
) -> ApiResult<UserLearningContext> {
    let context = state
        .orchestrator
        .update_user_context(&user_id, update)
        .await?;
    Ok(Json(context))
}

async fn handle_learning_path(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<LearningPathResponse> {
    let learning_path = state
        .orchestrator
        .generate_adaptive_learning_path(&user_id)
        .await?;
    Ok(Json(LearningPathResponse {
        user_id,
        learning_path,
    }))
}

async fn handle_analytics(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<LearningAnalytics> {
    Ok(Json(state.orchestrator.learning_analytics(&user_id).await?))
}

async fn handle_complete_challenge(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(completion): Json<ChallengeCompletion>,
) -> ApiResult<ChallengeOutcome> {
    let outcome = state
        .orchestrator
        .complete_challenge(&user_id, completion)
        .await?;
    Ok(Json(outcome))
}

async fn handle_feedback(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FeedbackRequest>,
) -> ApiResult<FeedbackResponse> {
    state.orchestrator.record_feedback(request.score)?;
    Ok(Json(FeedbackResponse {
        recorded: true,
        user_satisfaction: state.orchestrator.metrics().user_satisfaction,
    }))
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let services = state.orchestrator.service_health();
    Json(HealthResponse {
        healthy: services.iter().any(|s| s.healthy),
        services,
    })
}

async fn handle_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.orchestrator.metrics())
}

async fn handle_feature(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Json<FeatureResponse> {
    let enabled = state.orchestrator.is_feature_enabled(&name);
    Json(FeatureResponse { name, enabled })
}

// ============================================================================
// Tests
// ============================================================================
