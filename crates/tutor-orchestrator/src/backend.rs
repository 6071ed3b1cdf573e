//! Backend inference services and the transcription collaborator.
//!
//! The orchestrator talks to exactly two interchangeable text-generation
//! services, identified by [`ServiceId`]. Both are reached through the
//! [`Backend`] trait; [`HttpBackend`] is a generic JSON-over-HTTP adapter for
//! services that expose a `/generate` and `/health` endpoint.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TutorError};
use crate::request::RequestType;

// ============================================================================
// ServiceId
// ============================================================================

/// Identifies one of the two backend services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceId {
    /// Self-hosted inference service.
    Local,
    /// Hosted inference service.
    Cloud,
}

impl ServiceId {
    /// Both services, in a stable order.
    pub const ALL: [Self; 2] = [Self::Local, Self::Cloud];

    /// Returns the other service.
    ///
    /// # Examples
    ///
    /// ```
    /// use tutor_orchestrator::ServiceId;
    ///
    /// assert_eq!(ServiceId::Local.alternate(), ServiceId::Cloud);
    /// assert_eq!(ServiceId::Cloud.alternate(), ServiceId::Local);
    /// ```
    #[must_use]
    pub const fn alternate(self) -> Self {
        match self {
            Self::Local => Self::Cloud,
            Self::Cloud => Self::Local,
        }
    }

    /// Returns the lowercase name of this service.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }

    /// Parses a service id from a string, case-insensitively.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "local" => Some(Self::Local),
            "cloud" => Some(Self::Cloud),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ServiceId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid service '{s}': expected one of 'local', 'cloud'"
            ))
        })
    }
}

impl Serialize for ServiceId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Backend trait
// ============================================================================

/// Options sent with every generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOptions {
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// The kind of request, so a backend can pick a model.
    pub request_type: RequestType,
}

/// Text produced by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    /// The generated text.
    pub text: String,
    /// Time the backend took, in milliseconds.
    pub latency_ms: u64,
}

/// Failure of a single backend call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The call did not complete in time.
    #[error("backend call timed out")]
    Timeout,
    /// The backend refused or failed the call.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// A text-generation service.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Generates text for a prompt.
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> std::result::Result<Generation, BackendError>;

    /// Cheap liveness probe. Returns `true` when the service is reachable.
    async fn probe(&self) -> bool;
}

/// The pair of backends the orchestrator routes between.
#[derive(Clone)]
pub struct Backends {
    local: Arc<dyn Backend>,
    cloud: Arc<dyn Backend>,
}

impl Backends {
    /// Creates a backend pair.
    #[must_use]
    pub fn new(local: Arc<dyn Backend>, cloud: Arc<dyn Backend>) -> Self {
        Self { local, cloud }
    }

    /// Returns the backend for a service id.
    #[must_use]
    pub fn get(&self, id: ServiceId) -> Arc<dyn Backend> {
        match id {
            ServiceId::Local => Arc::clone(&self.local),
            ServiceId::Cloud => Arc::clone(&self.cloud),
        }
    }
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

// ============================================================================
// HTTP adapter
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    request_type: RequestType,
}

#[derive(Deserialize)]
struct TextResponse {
    text: String,
}

fn classify(err: &reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Unavailable(err.to_string())
    }
}

/// A backend reached over HTTP.
///
/// Generation posts `{prompt, maxTokens, temperature, requestType}` to
/// `{endpoint}/generate` and reads `{text}` from the response. The probe is
/// `GET {endpoint}/health`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    id: ServiceId,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Creates an adapter for the service at `endpoint`.
    ///
    /// `timeout` bounds each HTTP exchange, including probes.
    pub fn new(id: ServiceId, endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(TutorError::config_validation(
                format!("services.{id}.endpoint must not be empty"),
                format!("Set services.{id}.endpoint to the service base URL"),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                TutorError::config_validation(
                    format!("cannot build HTTP client for {id}: {e}"),
                    "Check the TLS configuration of this host",
                )
            })?;
        Ok(Self {
            id,
            endpoint,
            client,
        })
    }

    /// Returns the base URL of this backend.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> std::result::Result<Generation, BackendError> {
        let started = Instant::now();
        let body = GenerateRequest {
            prompt,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            request_type: options.request_type,
        };

        let response = self
            .client
            .post(format!("{}/generate", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Unavailable(format!(
                "{} returned HTTP {status}",
                self.id
            )));
        }

        let parsed: TextResponse = response.json().await.map_err(|e| classify(&e))?;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(service = %self.id, latency_ms, "Backend generation complete");

        Ok(Generation {
            text: parsed.text,
            latency_ms,
        })
    }

    async fn probe(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.endpoint))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(service = %self.id, error = %e, "Probe failed");
                false
            }
        }
    }
}

// ============================================================================
// Transcription
// ============================================================================

/// Speech-to-text collaborator used for voice commands.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribes raw audio into text.
    async fn transcribe(&self, audio: &[u8]) -> Result<String>;
}

/// A transcription service reached over HTTP.
///
/// Posts the raw audio bytes to `{endpoint}/transcribe` and reads `{text}`.
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTranscriber {
    /// Creates a transcriber for the service at `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/transcribe", self.endpoint))
            .header("content-type", "application/octet-stream")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| TutorError::transcription(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TutorError::transcription(format!(
                "transcription service returned HTTP {}",
                response.status()
            )));
        }

        let parsed: TextResponse = response
            .json()
            .await
            .map_err(|e| TutorError::transcription(e.to_string()))?;
        Ok(parsed.text)
    }
}
