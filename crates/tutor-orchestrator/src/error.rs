//! Error types for the tutoring orchestrator.
//!
//! This module defines the error hierarchy for all orchestrator operations,
//! including configuration loading, quota enforcement, backend dispatch,
//! backend output parsing, and persistence.

use std::path::PathBuf;

use crate::backend::ServiceId;
use crate::request::RequestType;

/// A specialized `Result` type for orchestrator operations.
pub type Result<T> = std::result::Result<T, TutorError>;

/// Errors that can occur while serving tutoring requests.
///
/// Error variants are organized by subsystem and include actionable suggestions
/// where possible so that callers can retry intelligently.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your tutor.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Quota Errors
    // ========================================================================
    /// The per-user hourly quota for this request type is exhausted.
    #[error("Rate limit exceeded for user '{user_id}' ({request_type}): {limit} requests per hour\n\nSuggestion: Retry after {retry_after_secs}s when the next window opens")]
    RateLimited {
        /// The user whose quota is exhausted.
        user_id: String,
        /// The request type that was denied.
        request_type: RequestType,
        /// The configured hourly limit.
        limit: u32,
        /// Seconds until the current window rolls over.
        retry_after_secs: u64,
    },

    // ========================================================================
    // Backend Errors
    // ========================================================================
    /// Both the primary and the fallback backend failed.
    #[error("AI services unavailable: {primary} and {fallback} both failed ({message})\n\nSuggestion: Retry in a minute; both backends are failing health checks or timing out")]
    ServiceUnavailable {
        /// The backend tried first.
        primary: ServiceId,
        /// The backend tried second.
        fallback: ServiceId,
        /// Description of the last failure.
        message: String,
    },

    /// Backend text could not be parsed into the expected result.
    #[error("Malformed output from backend for {operation}: {message}\n\nSuggestion: Retry the request; the model returned an unusable response")]
    MalformedBackendOutput {
        /// The operation whose output was malformed.
        operation: String,
        /// Description of the parse failure.
        message: String,
    },

    // ========================================================================
    // Collaborator Errors
    // ========================================================================
    /// Loading a learning context from persistence failed.
    ///
    /// The orchestrator recovers from this with an in-memory default.
    #[error("Failed to load learning context for '{user_id}': {message}")]
    ContextLoadFailure {
        /// The user whose context could not be loaded.
        user_id: String,
        /// Description of the persistence failure.
        message: String,
    },

    /// The persistence collaborator rejected a write or query.
    #[error("Persistence error: {message}")]
    Persistence {
        /// Description of the persistence failure.
        message: String,
    },

    /// Audio transcription failed.
    #[error("Transcription failed: {message}\n\nSuggestion: Check the audio input and try again")]
    Transcription {
        /// Description of the transcription failure.
        message: String,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// The requested feature is disabled in configuration.
    #[error("Feature '{feature}' is disabled\n\nSuggestion: Enable it under featureFlags in tutor.json")]
    FeatureDisabled {
        /// Name of the disabled feature flag.
        feature: String,
    },

    /// The request itself is invalid.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of what is wrong with the request.
        message: String,
    },

    /// Invalid state transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },

    /// A dispatch task panicked or was aborted.
    #[error("Dispatch task failed: {message}")]
    TaskFailed {
        /// Description of the task failure.
        message: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TutorError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `RateLimited` error.
    #[must_use]
    pub fn rate_limited(
        user_id: impl Into<String>,
        request_type: RequestType,
        limit: u32,
        retry_after_secs: u64,
    ) -> Self {
        Self::RateLimited {
            user_id: user_id.into(),
            request_type,
            limit,
            retry_after_secs,
        }
    }

    /// Creates a new `ServiceUnavailable` error.
    #[must_use]
    pub fn service_unavailable(
        primary: ServiceId,
        fallback: ServiceId,
        message: impl Into<String>,
    ) -> Self {
        Self::ServiceUnavailable {
            primary,
            fallback,
            message: message.into(),
        }
    }

    /// Creates a new `MalformedBackendOutput` error.
    #[must_use]
    pub fn malformed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedBackendOutput {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ContextLoadFailure` error.
    #[must_use]
    pub fn context_load(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ContextLoadFailure {
            user_id: user_id.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Persistence` error.
    #[must_use]
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Creates a new `Transcription` error.
    #[must_use]
    pub fn transcription(message: impl Into<String>) -> Self {
        Self::Transcription {
            message: message.into(),
        }
    }

    /// Creates a new `FeatureDisabled` error.
    #[must_use]
    pub fn feature_disabled(feature: impl Into<String>) -> Self {
        Self::FeatureDisabled {
            feature: feature.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Creates a new `TaskFailed` error.
    #[must_use]
    pub fn task_failed(message: impl Into<String>) -> Self {
        Self::TaskFailed {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is transient and the request may be retried later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServiceUnavailable { .. }
                | Self::MalformedBackendOutput { .. }
                | Self::Persistence { .. }
        )
    }

    /// Returns the number of seconds a caller should wait before retrying, if known.
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            Self::ServiceUnavailable { .. } => Some(60),
            _ => None,
        }
    }
}
