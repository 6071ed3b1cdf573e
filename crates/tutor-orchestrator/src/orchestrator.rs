//! The tutoring façade.
//!
//! Every backend-calling operation runs the same pipeline: quota check,
//! context load, routing, a backend call with one fallback attempt, output
//! parsing, learning-context update, and exactly one metrics record.
//!
//! The backend call, parsing and accounting run in a spawned task, so a caller
//! that goes away mid-request does not leave health or metrics half-updated.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tutor_orchestrator::{
//!     Backends, Config, EventBroadcaster, HttpBackend, InMemoryRepository, ServiceId,
//!     TutorOrchestrator,
//! };
//!
//! # async fn example() -> tutor_orchestrator::Result<()> {
//! let timeout = Duration::from_secs(30);
//! let backends = Backends::new(
//!     Arc::new(HttpBackend::new(ServiceId::Local, "http://localhost:8001", timeout)?),
//!     Arc::new(HttpBackend::new(ServiceId::Cloud, "http://localhost:8002", timeout)?),
//! );
//! let tutor = TutorOrchestrator::new(
//!     Config::default(),
//!     backends,
//!     Arc::new(InMemoryRepository::new()),
//!     None,
//!     EventBroadcaster::default(),
//! );
//!
//! let answer = tutor.explain_concept("reentrancy", "user-1").await?;
//! println!("{}", answer.content);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::analytics::{compute_analytics, LearningAnalytics};
use crate::backend::{
    BackendError, Backends, GenerateOptions, Generation, ServiceId, Transcriber,
};
use crate::config::{
    Config, FEATURE_ADAPTIVE_PATH, FEATURE_ANALYTICS, FEATURE_MULTI_MODAL, FEATURE_VOICE_COMMANDS,
};
use crate::context::{ContextUpdate, LearningContextStore, UserLearningContext};
use crate::error::{Result, TutorError};
use crate::health::{HealthMonitor, ServiceHealthRecord};
use crate::learning_path::{adaptive_learning_path, challenge_difficulty, challenge_xp};
use crate::metrics::{MetricsCollector, MetricsSnapshot, RequestOutcome};
use crate::parsing::{
    self, Challenge, ContractGenerationResult, MultiModalExplanation, SecurityAnalysis,
    TutorResponse,
};
use crate::prompts;
use crate::rate_limiter::RateLimiter;
use crate::repository::{InteractionRecord, LearningRepository};
use crate::request::{RequestCategory, RequestPhase, RequestTrace, RequestType};
use crate::router::ServiceRouter;
use crate::websocket::{EventBroadcaster, TutorEvent};

/// Difficulty at or above which a passed challenge marks its topic strong.
const STRONG_AREA_DIFFICULTY: u8 = 7;

/// Confidence deducted when a request was served by the fallback backend.
const FALLBACK_CONFIDENCE_PENALTY: f64 = 0.1;

// ============================================================================
// Result Types
// ============================================================================

/// What a voice command was turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceAction {
    /// The command asked for an explanation.
    Explain,
    /// The command asked for a challenge.
    Challenge,
}

/// Result of a voice command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceCommandResult {
    /// The transcribed command.
    pub command: String,
    /// The tutor's answer.
    pub response: String,
    /// The action taken.
    pub action: VoiceAction,
}

/// A learner's attempt at a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeCompletion {
    /// The challenge topic.
    pub topic: String,
    /// The challenge difficulty, 1 to 10.
    pub difficulty: u8,
    /// Whether the learner passed.
    pub success: bool,
    /// Time the learner spent, in seconds.
    #[serde(default)]
    pub time_spent_secs: u64,
}

/// Effect of recording a challenge attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeOutcome {
    /// XP awarded for the attempt.
    pub xp_awarded: u64,
    /// The learner's context after the attempt.
    pub context: UserLearningContext,
}

/// A parsed backend result and how it was obtained.
#[derive(Debug)]
struct Dispatched<T> {
    value: T,
    served_by: ServiceId,
    used_fallback: bool,
    response_time_ms: u64,
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TutorError::invalid_request(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Splits a transcribed command into an action and its subject.
fn classify_command(command: &str) -> Option<(VoiceAction, String)> {
    const PREFIXES: [(&str, VoiceAction); 8] = [
        ("give me a challenge on ", VoiceAction::Challenge),
        ("give me a challenge about ", VoiceAction::Challenge),
        ("challenge me on ", VoiceAction::Challenge),
        ("challenge ", VoiceAction::Challenge),
        ("explain ", VoiceAction::Explain),
        ("what is ", VoiceAction::Explain),
        ("what are ", VoiceAction::Explain),
        ("tell me about ", VoiceAction::Explain),
    ];

    let trimmed = command.trim().trim_end_matches(['.', '?', '!']).trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();

    for (prefix, action) in PREFIXES {
        if lower.starts_with(prefix) {
            let subject = trimmed.get(prefix.len()..).unwrap_or_default().trim();
            if subject.is_empty() {
                return None;
            }
            return Some((action, subject.to_string()));
        }
    }

    Some((VoiceAction::Explain, trimmed.to_string()))
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Shared services, owned once per process.
struct Inner {
    config: Config,
    backends: Backends,
    limiter: RateLimiter,
    health: Arc<HealthMonitor>,
    router: ServiceRouter,
    metrics: Arc<MetricsCollector>,
    contexts: LearningContextStore,
    repository: Arc<dyn LearningRepository>,
    transcriber: Option<Arc<dyn Transcriber>>,
    events: EventBroadcaster,
}

/// Routes tutoring requests between backends and keeps learners' state.
///
/// Cloning is cheap; clones share every service.
#[derive(Clone)]
pub struct TutorOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TutorOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TutorOrchestrator")
            .field("backends", &self.inner.backends)
            .field("contexts", &self.inner.contexts)
            .field("transcriber", &self.inner.transcriber.is_some())
            .finish_non_exhaustive()
    }
}

impl TutorOrchestrator {
    /// Wires up every service from `config`.
    #[must_use]
    pub fn new(
        config: Config,
        backends: Backends,
        repository: Arc<dyn LearningRepository>,
        transcriber: Option<Arc<dyn Transcriber>>,
        events: EventBroadcaster,
    ) -> Self {
        let health = Arc::new(HealthMonitor::new(
            config.health.failure_threshold,
            events.clone(),
        ));
        let metrics = Arc::new(MetricsCollector::new(&config));
        let contexts = LearningContextStore::new(
            config.learning.clone(),
            Arc::clone(&repository),
            Arc::clone(&metrics),
        );

        Self {
            inner: Arc::new(Inner {
                limiter: RateLimiter::new(config.rate_limits.clone()),
                router: ServiceRouter::new(config.routing.clone(), Arc::clone(&health)),
                health,
                metrics,
                contexts,
                repository,
                transcriber,
                events,
                backends,
                config,
            }),
        }
    }

    /// Returns the configuration the orchestrator was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the event broadcaster.
    #[must_use]
    pub fn events(&self) -> &EventBroadcaster {
        &self.inner.events
    }

    /// Returns the health monitor.
    #[must_use]
    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.inner.health
    }

    /// Starts a liveness probe loop for every backend.
    ///
    /// Each service is probed on its own configured interval. Abort the
    /// returned handles to stop probing.
    pub fn spawn_health_probes(&self) -> Vec<JoinHandle<()>> {
        ServiceId::ALL
            .into_iter()
            .map(|id| {
                self.inner.health.spawn_probe_loop(
                    id,
                    self.inner.backends.get(id),
                    self.inner.config.services.get(id).probe_interval(),
                )
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------------

    /// Consumes one unit of the user's quota for `request_type`.
    fn check_quota(&self, user_id: &str, request_type: RequestType) -> Result<()> {
        require_non_empty("userId", user_id)?;
        if self.inner.limiter.check_rate_limit(user_id, request_type) {
            return Ok(());
        }

        let retry_after_secs = RateLimiter::retry_after_secs(Utc::now());
        let limit = self.inner.limiter.limit(request_type);
        info!(user_id, %request_type, limit, retry_after_secs, "Request rate limited");
        self.inner.metrics.record_rate_limited();
        self.inner
            .events
            .send(TutorEvent::rate_limited(user_id, request_type, retry_after_secs));
        Err(TutorError::rate_limited(
            user_id,
            request_type,
            limit,
            retry_after_secs,
        ))
    }

    /// Starts a request trace and applies the quota check to it.
    fn admit(&self, user_id: &str, request_type: RequestType) -> Result<RequestTrace> {
        let mut trace = RequestTrace::new(request_type);
        match self.check_quota(user_id, request_type) {
            Ok(()) => {
                trace.advance(RequestPhase::RateChecked)?;
                Ok(trace)
            }
            Err(e) => {
                trace.advance(RequestPhase::RateLimited)?;
                Err(e)
            }
        }
    }

    /// Routes, calls and parses in a spawned task.
    async fn dispatch<T, F>(
        &self,
        mut trace: RequestTrace,
        user_id: &str,
        prompt: String,
        parse: F,
    ) -> Result<Dispatched<T>>
    where
        T: Send + 'static,
        F: FnOnce(&str) -> Result<T> + Send + 'static,
    {
        let category = trace.request_type.category();
        let preferred = self.inner.router.preferred_for(category);
        let primary = self.inner.router.recommended_service(category);
        trace.advance(RequestPhase::Routed)?;
        debug!(user_id, %category, %preferred, %primary, "Request routed");

        let inner = Arc::clone(&self.inner);
        let user_id = user_id.to_string();
        tokio::spawn(async move { inner.execute(trace, user_id, preferred, primary, prompt, parse).await })
            .await
            .map_err(|e| TutorError::task_failed(e.to_string()))?
    }

    /// Records a completed interaction: recent topic, streak, history.
    async fn record_interaction(&self, user_id: &str, topic: &str, kind: RequestType, track_topic: bool) {
        let max_recent = self.inner.config.learning.max_recent_topics;
        let today = Utc::now().date_naive();
        self.inner
            .contexts
            .update_with(user_id, |context| {
                if track_topic {
                    context.record_topic(topic, max_recent);
                }
                context.touch_streak(today);
            })
            .await;

        let record = InteractionRecord::ungraded(user_id, topic, kind);
        self.append_interaction(user_id, record).await;
    }

    async fn append_interaction(&self, user_id: &str, record: InteractionRecord) {
        if let Err(e) = self.inner.repository.append_interaction(user_id, record).await {
            warn!(user_id, error = %e, "Failed to append interaction record");
            self.inner.metrics.record_persistence_failure();
        }
    }

    fn require_feature(&self, name: &str) -> Result<()> {
        if self.is_feature_enabled(name) {
            Ok(())
        } else {
            Err(TutorError::feature_disabled(name))
        }
    }

    fn confidence(&self, served_by: ServiceId, used_fallback: bool) -> f64 {
        let base = self.inner.config.services.get(served_by).confidence;
        let penalty = if used_fallback {
            FALLBACK_CONFIDENCE_PENALTY
        } else {
            0.0
        };
        (base - penalty).clamp(0.0, 1.0)
    }

    // ------------------------------------------------------------------------
    // Backend operations
    // ------------------------------------------------------------------------

    /// Explains a concept, tailored to the learner.
    ///
    /// # Errors
    ///
    /// Returns `RateLimited`, `ServiceUnavailable`, `MalformedBackendOutput`
    /// or `InvalidRequest` for an empty concept.
    #[instrument(skip(self))]
    pub async fn explain_concept(&self, concept: &str, user_id: &str) -> Result<TutorResponse> {
        require_non_empty("concept", concept)?;
        let trace = self.admit(user_id, RequestType::Explanation)?;
        let context = self.inner.contexts.user_context(user_id).await;

        let prompt = prompts::explanation(concept, &context);
        let dispatched = self
            .dispatch(trace, user_id, prompt, parsing::parse_explanation)
            .await?;

        self.record_interaction(user_id, concept, RequestType::Explanation, true)
            .await;

        Ok(TutorResponse {
            content: dispatched.value,
            model: dispatched.served_by.to_string(),
            response_time_ms: dispatched.response_time_ms,
            confidence: self.confidence(dispatched.served_by, dispatched.used_fallback),
        })
    }

    /// Generates a challenge on `topic` at a difficulty chosen for the learner.
    ///
    /// The returned difficulty is always in `[1, 10]`.
    ///
    /// # Errors
    ///
    /// Returns `RateLimited`, `ServiceUnavailable`, `MalformedBackendOutput`
    /// or `InvalidRequest` for an empty topic.
    #[instrument(skip(self))]
    pub async fn generate_personalized_challenge(
        &self,
        user_id: &str,
        topic: &str,
    ) -> Result<Challenge> {
        require_non_empty("topic", topic)?;
        let trace = self.admit(user_id, RequestType::Challenge)?;
        let context = self.inner.contexts.user_context(user_id).await;

        let difficulty = challenge_difficulty(&context, topic);
        debug!(user_id, topic, difficulty, skill = ?context.skill_level, "Challenge difficulty chosen");
        let prompt = prompts::challenge(topic, difficulty, &context);
        let owned_topic = topic.to_string();
        let dispatched = self
            .dispatch(trace, user_id, prompt, move |text| {
                parsing::parse_challenge(text, &owned_topic, difficulty)
            })
            .await?;

        self.record_interaction(user_id, topic, RequestType::Challenge, true)
            .await;
        Ok(dispatched.value)
    }

    /// Audits Solidity code.
    ///
    /// # Errors
    ///
    /// Returns `MalformedBackendOutput` if the backend's report cannot be read;
    /// a report is never invented. Also `RateLimited`, `ServiceUnavailable` or
    /// `InvalidRequest` for empty code.
    #[instrument(skip(self, code), fields(code_len = code.len()))]
    pub async fn analyze_code_security(
        &self,
        code: &str,
        user_id: &str,
    ) -> Result<SecurityAnalysis> {
        require_non_empty("code", code)?;
        let trace = self.admit(user_id, RequestType::SecurityAnalysis)?;
        // Loaded for its side effect of warming the cache
        let _context = self.inner.contexts.user_context(user_id).await;

        let dispatched = self
            .dispatch(
                trace,
                user_id,
                prompts::security_analysis(code),
                parsing::parse_security_analysis,
            )
            .await?;

        self.record_interaction(user_id, "security-analysis", RequestType::SecurityAnalysis, false)
            .await;
        Ok(dispatched.value)
    }

    /// Generates a contract from a description and requirements.
    ///
    /// # Errors
    ///
    /// Returns `RateLimited`, `ServiceUnavailable`, `MalformedBackendOutput`
    /// or `InvalidRequest` for an empty description.
    #[instrument(skip(self, requirements))]
    pub async fn generate_smart_contract(
        &self,
        description: &str,
        requirements: &[String],
        user_id: &str,
    ) -> Result<ContractGenerationResult> {
        require_non_empty("description", description)?;
        let trace = self.admit(user_id, RequestType::ContractGeneration)?;
        let context = self.inner.contexts.user_context(user_id).await;

        let prompt = prompts::contract(description, requirements, &context);
        let dispatched = self
            .dispatch(trace, user_id, prompt, parsing::parse_contract)
            .await?;

        self.record_interaction(
            user_id,
            "contract-generation",
            RequestType::ContractGeneration,
            false,
        )
        .await;
        Ok(dispatched.value)
    }

    /// Explains a concept as text, diagram, interactive example and code, from
    /// one backend call.
    ///
    /// # Errors
    ///
    /// Returns `FeatureDisabled` when `multiModalExplanations` is off, plus
    /// the errors of [`Self::explain_concept`].
    #[instrument(skip(self))]
    pub async fn generate_multi_modal_explanation(
        &self,
        concept: &str,
        user_id: &str,
    ) -> Result<MultiModalExplanation> {
        self.require_feature(FEATURE_MULTI_MODAL)?;
        require_non_empty("concept", concept)?;
        let trace = self.admit(user_id, RequestType::MultiModal)?;
        let context = self.inner.contexts.user_context(user_id).await;

        let prompt = prompts::multi_modal(concept, &context);
        let dispatched = self
            .dispatch(trace, user_id, prompt, parsing::parse_multi_modal)
            .await?;

        self.record_interaction(user_id, concept, RequestType::MultiModal, true)
            .await;
        Ok(dispatched.value)
    }

    /// Transcribes audio and serves the command as an explanation or challenge.
    ///
    /// The voice quota is consumed first, then the quota of the request the
    /// command turns into.
    ///
    /// # Errors
    ///
    /// Returns `FeatureDisabled` when `voiceCommands` is off or no transcriber
    /// is configured, `Transcription` if transcription fails, `InvalidRequest`
    /// for an empty command, plus the errors of the dispatched request.
    #[instrument(skip(self, audio), fields(audio_len = audio.len()))]
    pub async fn process_voice_command(
        &self,
        audio: &[u8],
        user_id: &str,
    ) -> Result<VoiceCommandResult> {
        self.require_feature(FEATURE_VOICE_COMMANDS)?;
        let Some(transcriber) = self.inner.transcriber.clone() else {
            return Err(TutorError::feature_disabled(FEATURE_VOICE_COMMANDS));
        };
        if audio.is_empty() {
            return Err(TutorError::invalid_request("audio must not be empty"));
        }
        self.check_quota(user_id, RequestType::VoiceCommand)?;

        let command = transcriber.transcribe(audio).await?;
        let Some((action, subject)) = classify_command(&command) else {
            return Err(TutorError::invalid_request(format!(
                "could not understand voice command '{command}'"
            )));
        };
        info!(user_id, ?action, subject = %subject, "Voice command classified");

        let response = match action {
            VoiceAction::Explain => self.explain_concept(&subject, user_id).await?.content,
            VoiceAction::Challenge => {
                let challenge = self.generate_personalized_challenge(user_id, &subject).await?;
                format!("{}\n\n{}", challenge.title, challenge.description)
            }
        };

        Ok(VoiceCommandResult {
            command,
            response,
            action,
        })
    }

    // ------------------------------------------------------------------------
    // Adaptive operations
    // ------------------------------------------------------------------------

    /// Builds and stores the learner's next learning path.
    ///
    /// # Errors
    ///
    /// Returns `FeatureDisabled` when `adaptiveLearningPath` is off.
    #[instrument(skip(self))]
    pub async fn generate_adaptive_learning_path(&self, user_id: &str) -> Result<Vec<String>> {
        self.require_feature(FEATURE_ADAPTIVE_PATH)?;
        require_non_empty("userId", user_id)?;
        let learning = &self.inner.config.learning;

        let (_, path) = self
            .inner
            .contexts
            .update_with(user_id, |context| {
                let path = adaptive_learning_path(
                    context,
                    &learning.curriculum,
                    learning.learning_path_length,
                );
                context.learning_path.clone_from(&path);
                path
            })
            .await;

        debug!(user_id, length = path.len(), "Learning path generated");
        Ok(path)
    }

    /// Summarises the learner's recent history.
    ///
    /// # Errors
    ///
    /// Returns `FeatureDisabled` when `learningAnalytics` is off, or
    /// `Persistence` if history cannot be read.
    #[instrument(skip(self))]
    pub async fn learning_analytics(&self, user_id: &str) -> Result<LearningAnalytics> {
        self.require_feature(FEATURE_ANALYTICS)?;
        require_non_empty("userId", user_id)?;
        let config = &self.inner.config;

        let context = self.inner.contexts.user_context(user_id).await;
        let now = Utc::now();
        let since = now - ChronoDuration::days(config.analytics.history_days);
        let history = self
            .inner
            .repository
            .interaction_history(user_id, since)
            .await
            .map_err(|e| {
                warn!(user_id, error = %e, "Failed to read interaction history");
                self.inner.metrics.record_persistence_failure();
                match e {
                    TutorError::Persistence { .. } => e,
                    other => TutorError::persistence(other.to_string()),
                }
            })?;

        Ok(compute_analytics(
            &context,
            &history,
            &config.learning.curriculum,
            &config.analytics,
            now,
        ))
    }

    /// Records a challenge attempt.
    ///
    /// A pass awards XP scaled by difficulty and clears the topic from the
    /// weak areas; a pass at difficulty 7 or above marks it strong. A failure
    /// marks the topic weak.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an empty topic or a difficulty outside
    /// `[1, 10]`.
    #[instrument(skip(self, completion), fields(topic = %completion.topic, success = completion.success))]
    pub async fn complete_challenge(
        &self,
        user_id: &str,
        completion: ChallengeCompletion,
    ) -> Result<ChallengeOutcome> {
        require_non_empty("userId", user_id)?;
        require_non_empty("topic", &completion.topic)?;
        if !(1..=10).contains(&completion.difficulty) {
            return Err(TutorError::invalid_request(format!(
                "difficulty must be between 1 and 10 (got {})",
                completion.difficulty
            )));
        }

        let learning = &self.inner.config.learning;
        let today = Utc::now().date_naive();
        let topic = completion.topic.trim();

        let (context, xp_awarded) = self
            .inner
            .contexts
            .update_with(user_id, |context| {
                context.touch_streak(today);
                context.record_topic(topic, learning.max_recent_topics);
                if !completion.success {
                    context.mark_weak(topic);
                    return 0;
                }
                if completion.difficulty >= STRONG_AREA_DIFFICULTY {
                    context.mark_strong(topic);
                } else {
                    context.clear_weak(topic);
                }
                let xp = challenge_xp(learning.challenge_base_xp, completion.difficulty);
                context.award_xp(xp, learning);
                xp
            })
            .await;

        let mut record = InteractionRecord::ungraded(user_id, topic, RequestType::Challenge);
        record.success = Some(completion.success);
        record.difficulty = Some(completion.difficulty);
        record.time_spent_secs = completion.time_spent_secs;
        self.append_interaction(user_id, record).await;

        info!(user_id, xp_awarded, total_xp = context.total_xp, skill = ?context.skill_level, "Challenge recorded");
        self.inner.events.send(TutorEvent::context_updated(&context));

        Ok(ChallengeOutcome {
            xp_awarded,
            context,
        })
    }

    /// Records a satisfaction score between 1 and 5.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a score outside `[1, 5]`.
    pub fn record_feedback(&self, score: u8) -> Result<()> {
        self.inner.metrics.record_satisfaction(score)
    }

    // ------------------------------------------------------------------------
    // Context and observability
    // ------------------------------------------------------------------------

    /// Returns the learner's context, creating a default on first access.
    pub async fn user_context(&self, user_id: &str) -> UserLearningContext {
        self.inner.contexts.user_context(user_id).await
    }

    /// Merges `update` into the learner's context and recomputes the skill level.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an empty user id.
    #[instrument(skip(self, update))]
    pub async fn update_user_context(
        &self,
        user_id: &str,
        update: ContextUpdate,
    ) -> Result<UserLearningContext> {
        require_non_empty("userId", user_id)?;
        let learning = &self.inner.config.learning;
        let (context, ()) = self
            .inner
            .contexts
            .update_with(user_id, |context| {
                update.apply_to(context);
                context.refresh_skill_level(learning);
            })
            .await;

        self.inner.events.send(TutorEvent::context_updated(&context));
        Ok(context)
    }

    /// Returns which backend a request of this category would try first.
    #[must_use]
    pub fn recommended_service(&self, category: RequestCategory) -> ServiceId {
        self.inner.router.recommended_service(category)
    }

    /// Returns the health of every backend.
    #[must_use]
    pub fn service_health(&self) -> Vec<ServiceHealthRecord> {
        self.inner.health.service_health()
    }

    /// Returns a snapshot of the aggregate metrics.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.metrics()
    }

    /// Returns whether the named feature flag is enabled.
    #[must_use]
    pub fn is_feature_enabled(&self, name: &str) -> bool {
        self.inner.metrics.is_feature_enabled(name)
    }
}

// ============================================================================
// Dispatch
// ============================================================================

impl Inner {
    /// One backend call under the configured timeout, with health accounting.
    async fn attempt(
        &self,
        id: ServiceId,
        prompt: &str,
        options: &GenerateOptions,
    ) -> std::result::Result<Generation, BackendError> {
        let backend = self.backends.get(id);
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.config.backend_timeout(),
            backend.generate(prompt, options),
        )
        .await
        .unwrap_or(Err(BackendError::Timeout));
        let latency_ms = elapsed_ms(started);

        self.health.record_outcome(id, outcome.is_ok(), Some(latency_ms));
        if let Err(e) = &outcome {
            warn!(service = %id, latency_ms, error = %e, "Backend call failed");
        }
        outcome
    }

    /// Primary call, one fallback, parse, then exactly one metrics record.
    async fn execute<T, F>(
        &self,
        mut trace: RequestTrace,
        user_id: String,
        preferred: ServiceId,
        primary: ServiceId,
        prompt: String,
        parse: F,
    ) -> Result<Dispatched<T>>
    where
        F: FnOnce(&str) -> Result<T>,
    {
        let request_type = trace.request_type;
        let options = GenerateOptions {
            max_tokens: self.config.backend.max_tokens,
            temperature: self.config.backend.temperature,
            request_type,
        };
        let started = Instant::now();

        trace.advance(RequestPhase::CallingPrimary)?;
        let (served_by, generation) = match self.attempt(primary, &prompt, &options).await {
            Ok(generation) => (primary, generation),
            Err(primary_error) => {
                let fallback = primary.alternate();
                trace.advance(RequestPhase::CallingFallback)?;
                info!(user_id = %user_id, %request_type, %primary, %fallback, "Retrying on fallback backend");

                match self.attempt(fallback, &prompt, &options).await {
                    Ok(generation) => (fallback, generation),
                    Err(fallback_error) => {
                        trace.advance(RequestPhase::Failed)?;
                        let error = TutorError::service_unavailable(
                            primary,
                            fallback,
                            format!("{primary}: {primary_error}; {fallback}: {fallback_error}"),
                        );
                        self.finish(&user_id, request_type, fallback, preferred, elapsed_ms(started), Some(&error));
                        return Err(error);
                    }
                }
            }
        };
        trace.advance(RequestPhase::Succeeded)?;
        let response_time_ms = elapsed_ms(started);

        match parse(&generation.text) {
            Ok(value) => {
                self.finish(&user_id, request_type, served_by, preferred, response_time_ms, None);
                Ok(Dispatched {
                    value,
                    served_by,
                    used_fallback: served_by != preferred,
                    response_time_ms,
                })
            }
            Err(error) => {
                warn!(user_id = %user_id, %request_type, service = %served_by, error = %error, "Backend output rejected");
                self.metrics.record_malformed_output();
                self.finish(&user_id, request_type, served_by, preferred, response_time_ms, Some(&error));
                Err(error)
            }
        }
    }

    /// Records metrics and emits events for a resolved request.
    fn finish(
        &self,
        user_id: &str,
        request_type: RequestType,
        served_by: ServiceId,
        preferred: ServiceId,
        latency_ms: u64,
        error: Option<&TutorError>,
    ) {
        let success = error.is_none();
        let used_fallback = served_by != preferred;

        self.metrics.record_request(&RequestOutcome {
            success,
            latency_ms,
            used_fallback,
            user_id: user_id.to_string(),
        });
        self.events.send(TutorEvent::request_completed(
            user_id,
            request_type,
            served_by,
            used_fallback,
            success,
            latency_ms,
        ));
        if let Some(error) = error {
            self.events.send(TutorEvent::error(error.to_string()));
        }
        debug!(user_id, %request_type, service = %served_by, used_fallback, success, latency_ms, "Request completed");
    }
}

// ============================================================================
// Tests
// ============================================================================
