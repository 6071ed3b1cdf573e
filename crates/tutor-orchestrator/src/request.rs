//! Request classification and the per-request dispatch state machine.
//!
//! Every tutoring operation has a [`RequestType`], which selects its rate-limit
//! budget, and a [`RequestCategory`], which selects its routing preference.
//! While a request is in flight its progress is tracked by a [`RequestTrace`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};

// ============================================================================
// RequestType
// ============================================================================

/// The kind of tutoring request, used as the rate-limit key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Concept explanation.
    Explanation,
    /// Personalized coding challenge.
    Challenge,
    /// Smart-contract security analysis.
    SecurityAnalysis,
    /// Smart-contract generation.
    ContractGeneration,
    /// Multi-modal explanation (text, diagram, interactive, code).
    MultiModal,
    /// Spoken command.
    VoiceCommand,
}

impl RequestType {
    /// All request types, in a stable order.
    pub const ALL: [Self; 6] = [
        Self::Explanation,
        Self::Challenge,
        Self::SecurityAnalysis,
        Self::ContractGeneration,
        Self::MultiModal,
        Self::VoiceCommand,
    ];

    /// Returns the routing category for this request type.
    ///
    /// # Examples
    ///
    /// ```
    /// use tutor_orchestrator::{RequestCategory, RequestType};
    ///
    /// assert_eq!(RequestType::Challenge.category(), RequestCategory::Code);
    /// assert_eq!(RequestType::SecurityAnalysis.category(), RequestCategory::Analysis);
    /// ```
    #[must_use]
    pub const fn category(&self) -> RequestCategory {
        match self {
            Self::Explanation | Self::MultiModal | Self::VoiceCommand => {
                RequestCategory::Explanation
            }
            Self::Challenge | Self::ContractGeneration => RequestCategory::Code,
            Self::SecurityAnalysis => RequestCategory::Analysis,
        }
    }

    /// Returns the snake_case name of this request type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Explanation => "explanation",
            Self::Challenge => "challenge",
            Self::SecurityAnalysis => "security_analysis",
            Self::ContractGeneration => "contract_generation",
            Self::MultiModal => "multi_modal",
            Self::VoiceCommand => "voice_command",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RequestCategory
// ============================================================================

/// Routing category: which kind of work the backend is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestCategory {
    /// Code generation (challenges, contracts).
    Code,
    /// Prose explanations.
    Explanation,
    /// Code analysis.
    Analysis,
}

impl fmt::Display for RequestCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code => write!(f, "code"),
            Self::Explanation => write!(f, "explanation"),
            Self::Analysis => write!(f, "analysis"),
        }
    }
}

// ============================================================================
// RequestPhase
// ============================================================================

/// Phase of a single in-flight request.
///
/// The phase transitions through these states:
/// - `Pending` -> `RateChecked` -> `Routed` -> `CallingPrimary`
/// - `Pending` -> `RateLimited` (quota exhausted)
/// - From `CallingPrimary`:
///   - `Succeeded`
///   - `CallingFallback` -> `Succeeded` | `Failed`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPhase {
    /// Request accepted, nothing checked yet.
    #[default]
    Pending,
    /// Quota check passed.
    RateChecked,
    /// Quota check failed.
    RateLimited,
    /// A backend has been selected.
    Routed,
    /// Waiting on the selected backend.
    CallingPrimary,
    /// Waiting on the alternate backend after the primary failed.
    CallingFallback,
    /// A backend produced a result.
    Succeeded,
    /// Both backends failed.
    Failed,
}

impl RequestPhase {
    /// Returns `true` if this phase is terminal.
    ///
    /// # Examples
    ///
    /// ```
    /// use tutor_orchestrator::RequestPhase;
    ///
    /// assert!(RequestPhase::Succeeded.is_terminal());
    /// assert!(RequestPhase::Failed.is_terminal());
    /// assert!(!RequestPhase::CallingFallback.is_terminal());
    /// ```
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::RateLimited)
    }

    /// Returns `true` if `next` is a legal successor of this phase.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::RateChecked | Self::RateLimited)
                | (Self::RateChecked, Self::Routed)
                | (Self::Routed, Self::CallingPrimary)
                | (Self::CallingPrimary, Self::Succeeded | Self::CallingFallback)
                | (Self::CallingFallback, Self::Succeeded | Self::Failed)
        )
    }
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::RateChecked => "rate_checked",
            Self::RateLimited => "rate_limited",
            Self::Routed => "routed",
            Self::CallingPrimary => "calling_primary",
            Self::CallingFallback => "calling_fallback",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ============================================================================
// RequestTrace
// ============================================================================

/// Progress record for one request, with the time each phase was entered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTrace {
    /// The request type being served.
    pub request_type: RequestType,
    /// The current phase.
    pub phase: RequestPhase,
    /// Every phase entered so far, with its entry time.
    pub history: Vec<(RequestPhase, DateTime<Utc>)>,
}

impl RequestTrace {
    /// Creates a new trace in the `Pending` phase.
    #[must_use]
    pub fn new(request_type: RequestType) -> Self {
        Self {
            request_type,
            phase: RequestPhase::Pending,
            history: vec![(RequestPhase::Pending, Utc::now())],
        }
    }

    /// Moves the trace to `next`.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::InvalidStateTransition` if `next` is not a legal
    /// successor of the current phase.
    pub fn advance(&mut self, next: RequestPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(TutorError::invalid_transition(self.phase, next));
        }
        tracing::trace!(request_type = %self.request_type, from = %self.phase, to = %next, "Request phase");
        self.phase = next;
        self.history.push((next, Utc::now()));
        Ok(())
    }

    /// Returns `true` if the request went through the fallback phase.
    #[must_use]
    pub fn used_fallback_attempt(&self) -> bool {
        self.history
            .iter()
            .any(|(phase, _)| *phase == RequestPhase::CallingFallback)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_type_categories() {
        assert_eq!(RequestType::Explanation.category(), RequestCategory::Explanation);
        assert_eq!(RequestType::MultiModal.category(), RequestCategory::Explanation);
        assert_eq!(RequestType::VoiceCommand.category(), RequestCategory::Explanation);
        assert_eq!(RequestType::Challenge.category(), RequestCategory::Code);
        assert_eq!(RequestType::ContractGeneration.category(), RequestCategory::Code);
        assert_eq!(RequestType::SecurityAnalysis.category(), RequestCategory::Analysis);
    }

    #[test]
    fn test_request_type_serialization() {
        assert_eq!(
            serde_json::to_string(&RequestType::SecurityAnalysis).unwrap(),
            r#""security_analysis""#
        );
        let parsed: RequestType = serde_json::from_str(r#""voice_command""#).unwrap();
        assert_eq!(parsed, RequestType::VoiceCommand);
        assert_eq!(RequestType::ContractGeneration.to_string(), "contract_generation");
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut trace = RequestTrace::new(RequestType::Explanation);
        trace.advance(RequestPhase::RateChecked).unwrap();
        trace.advance(RequestPhase::Routed).unwrap();
        trace.advance(RequestPhase::CallingPrimary).unwrap();
        trace.advance(RequestPhase::Succeeded).unwrap();

        assert!(trace.phase.is_terminal());
        assert!(!trace.used_fallback_attempt());
        assert_eq!(trace.history.len(), 5);
    }

    #[test]
    fn test_fallback_path_transitions() {
        let mut trace = RequestTrace::new(RequestType::Challenge);
        trace.advance(RequestPhase::RateChecked).unwrap();
        trace.advance(RequestPhase::Routed).unwrap();
        trace.advance(RequestPhase::CallingPrimary).unwrap();
        trace.advance(RequestPhase::CallingFallback).unwrap();
        trace.advance(RequestPhase::Failed).unwrap();

        assert_eq!(trace.phase, RequestPhase::Failed);
        assert!(trace.used_fallback_attempt());
    }

    #[test]
    fn test_failed_never_follows_primary_directly() {
        let mut trace = RequestTrace::new(RequestType::Challenge);
        trace.advance(RequestPhase::RateChecked).unwrap();
        trace.advance(RequestPhase::Routed).unwrap();
        trace.advance(RequestPhase::CallingPrimary).unwrap();

        let err = trace.advance(RequestPhase::Failed).unwrap_err();
        assert!(matches!(err, TutorError::InvalidStateTransition { .. }));
        assert_eq!(trace.phase, RequestPhase::CallingPrimary);
    }

    #[test]
    fn test_terminal_phases_have_no_successors() {
        for terminal in [
            RequestPhase::Succeeded,
            RequestPhase::Failed,
            RequestPhase::RateLimited,
        ] {
            for next in [
                RequestPhase::Pending,
                RequestPhase::RateChecked,
                RequestPhase::Routed,
                RequestPhase::CallingPrimary,
                RequestPhase::CallingFallback,
                RequestPhase::Succeeded,
                RequestPhase::Failed,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_phase_serialization() {
        assert_eq!(
            serde_json::to_string(&RequestPhase::CallingFallback).unwrap(),
            r#""calling_fallback""#
        );
        assert_eq!(RequestPhase::RateChecked.to_string(), "rate_checked");
    }
}
