//! Tutoring Orchestrator
//!
//! Routes learning-assistant requests between a local and a cloud backend,
//! tracks backend health, enforces per-user quotas, aggregates metrics and
//! keeps each learner's adaptive state. Served over HTTP and WebSocket.

pub mod analytics;
pub mod api;
pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod learning_path;
pub mod metrics;
pub mod orchestrator;
pub mod parsing;
pub mod prompts;
pub mod rate_limiter;
pub mod repository;
pub mod request;
pub mod router;
pub mod websocket;

pub use analytics::LearningAnalytics;
pub use api::{create_router, AppState, ErrorResponse};
pub use backend::{
    Backend, BackendError, Backends, GenerateOptions, Generation, HttpBackend, HttpTranscriber,
    ServiceId, Transcriber,
};
pub use config::{Config, LearningConfig, RateLimitConfig, RoutingConfig};
pub use context::{ContextUpdate, LearningStyle, SkillLevel, UserLearningContext};
pub use error::{Result, TutorError};
pub use health::{HealthMonitor, ServiceHealthRecord};
pub use metrics::{MetricsCollector, MetricsSnapshot, RequestOutcome};
pub use orchestrator::{
    ChallengeCompletion, ChallengeOutcome, TutorOrchestrator, VoiceAction, VoiceCommandResult,
};
pub use parsing::{
    Challenge, ContractGenerationResult, MultiModalExplanation, SecurityAnalysis, Severity,
    TutorResponse, Vulnerability,
};
pub use rate_limiter::RateLimiter;
pub use repository::{InMemoryRepository, InteractionRecord, LearningRepository};
pub use request::{RequestCategory, RequestPhase, RequestTrace, RequestType};
pub use router::ServiceRouter;
pub use websocket::{EventBroadcaster, TutorEvent};
