//! Configuration types for the tutoring orchestrator.
//!
//! This module provides the static configuration table read once at process
//! start: per-type rate limits, the routing table, health thresholds, backend
//! call options, learning-path and analytics tuning, and feature flags.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::ServiceId;
use crate::error::{Result, TutorError};
use crate::request::{RequestCategory, RequestType};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "tutor.json";

/// Feature flag gating multi-modal explanations.
pub const FEATURE_MULTI_MODAL: &str = "multiModalExplanations";

/// Feature flag gating voice commands.
pub const FEATURE_VOICE_COMMANDS: &str = "voiceCommands";

/// Feature flag gating adaptive learning paths.
pub const FEATURE_ADAPTIVE_PATH: &str = "adaptiveLearningPath";

/// Feature flag gating learning analytics.
pub const FEATURE_ANALYTICS: &str = "learningAnalytics";

const fn default_explanation_limit() -> u32 {
    60
}

const fn default_challenge_limit() -> u32 {
    20
}

const fn default_security_limit() -> u32 {
    10
}

const fn default_contract_limit() -> u32 {
    10
}

const fn default_multi_modal_limit() -> u32 {
    20
}

const fn default_voice_limit() -> u32 {
    30
}

const fn default_code_route() -> ServiceId {
    ServiceId::Local
}

const fn default_cloud_route() -> ServiceId {
    ServiceId::Cloud
}

/// Default number of consecutive failures before a backend is marked unhealthy.
const fn default_failure_threshold() -> u32 {
    3
}

const fn default_local_probe_interval() -> u64 {
    15
}

const fn default_cloud_probe_interval() -> u64 {
    30
}

const fn default_local_confidence() -> f64 {
    0.8
}

const fn default_cloud_confidence() -> f64 {
    0.9
}

/// Default backend call timeout in seconds.
const fn default_backend_timeout() -> u64 {
    30
}

const fn default_max_tokens() -> u32 {
    2048
}

const fn default_temperature() -> f32 {
    0.7
}

const fn default_learning_path_length() -> usize {
    8
}

const fn default_max_recent_topics() -> usize {
    10
}

/// Starting XP for a new learner.
const fn default_total_xp() -> u64 {
    150
}

const fn default_max_cached_users() -> usize {
    10_000
}

const fn default_intermediate_xp() -> u64 {
    1000
}

const fn default_advanced_xp() -> u64 {
    5000
}

const fn default_intermediate_level() -> u32 {
    5
}

const fn default_advanced_level() -> u32 {
    10
}

const fn default_xp_per_level() -> u64 {
    500
}

const fn default_challenge_base_xp() -> u64 {
    50
}

fn default_curriculum() -> Vec<String> {
    [
        "blockchain-fundamentals",
        "solidity-basics",
        "data-types",
        "functions-and-modifiers",
        "events-and-logging",
        "mappings-and-structs",
        "inheritance",
        "error-handling",
        "gas-optimization",
        "security-best-practices",
        "reentrancy",
        "access-control",
        "erc20-tokens",
        "erc721-nfts",
        "upgradeable-contracts",
        "defi-protocols",
        "testing-contracts",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

const fn default_half_life_days() -> f64 {
    14.0
}

const fn default_min_attempts() -> usize {
    3
}

const fn default_error_rate_threshold() -> f64 {
    0.5
}

const fn default_success_rate_threshold() -> f64 {
    0.8
}

const fn default_recommendation_count() -> usize {
    5
}

const fn default_recent_challenge_window() -> usize {
    10
}

const fn default_history_days() -> i64 {
    90
}

/// Default aggregation period for the distinct active-user count.
const fn default_active_user_period() -> u64 {
    86_400
}

fn default_feature_flags() -> BTreeMap<String, bool> {
    [
        FEATURE_MULTI_MODAL,
        FEATURE_VOICE_COMMANDS,
        FEATURE_ADAPTIVE_PATH,
        FEATURE_ANALYTICS,
    ]
    .into_iter()
    .map(|name| (name.to_string(), true))
    .collect()
}

/// Main configuration for the orchestrator.
///
/// Read-only at request time; reloadable only at process restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Hourly quotas per request type.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Preferred backend per request category.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Health hysteresis settings.
    #[serde(default)]
    pub health: HealthConfig,

    /// Per-backend settings.
    #[serde(default)]
    pub services: ServicesConfig,

    /// Options passed on every backend call.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Learning-context and learning-path tuning.
    #[serde(default)]
    pub learning: LearningConfig,

    /// Learning-analytics tuning.
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Metrics aggregation settings.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Static feature flags.
    #[serde(default = "default_feature_flags")]
    pub feature_flags: BTreeMap<String, bool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rate_limits: RateLimitConfig::default(),
            routing: RoutingConfig::default(),
            health: HealthConfig::default(),
            services: ServicesConfig::default(),
            backend: BackendConfig::default(),
            learning: LearningConfig::default(),
            analytics: AnalyticsConfig::default(),
            metrics: MetricsConfig::default(),
            feature_flags: default_feature_flags(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `tutor.json` in the current directory. If found, loads and
    /// validates the configuration. If not found, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            TutorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `tutor.json` in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        Self::load_from_file(&config_path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigParseError` if the file exists but contains
    /// invalid JSON or invalid enum values.
    ///
    /// Returns `TutorError::ConfigValidationError` if the configuration values
    /// are invalid (e.g., zero thresholds, empty curriculum).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(TutorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TutorError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` if any validation check fails.
    pub fn validate(&self) -> Result<()> {
        if self.health.failure_threshold == 0 {
            return Err(TutorError::config_validation(
                "health.failureThreshold must be greater than 0",
                "Set health.failureThreshold to at least 1 in your tutor.json",
            ));
        }

        for id in ServiceId::ALL {
            if self.services.get(id).probe_interval_secs == 0 {
                return Err(TutorError::config_validation(
                    format!("services.{id}.probeIntervalSecs must be greater than 0"),
                    format!("Set services.{id}.probeIntervalSecs to at least 1 in your tutor.json"),
                ));
            }
        }

        if self.backend.timeout_secs == 0 {
            return Err(TutorError::config_validation(
                "backend.timeoutSecs must be greater than 0",
                "Set backend.timeoutSecs to at least 1 second in your tutor.json",
            ));
        }

        if !(0.0..=2.0).contains(&self.backend.temperature) {
            return Err(TutorError::config_validation(
                format!(
                    "backend.temperature must be between 0.0 and 2.0 (got {})",
                    self.backend.temperature
                ),
                "Use a temperature such as 0.7 in your tutor.json",
            ));
        }

        if self.learning.learning_path_length == 0 {
            return Err(TutorError::config_validation(
                "learning.learningPathLength must be greater than 0",
                "Set learning.learningPathLength to at least 1 in your tutor.json",
            ));
        }

        if self.learning.max_recent_topics == 0 {
            return Err(TutorError::config_validation(
                "learning.maxRecentTopics must be greater than 0",
                "Set learning.maxRecentTopics to at least 1 in your tutor.json",
            ));
        }

        if self.learning.curriculum.iter().all(|t| t.trim().is_empty()) {
            return Err(TutorError::config_validation(
                "learning.curriculum must not be empty",
                "List the canonical topic order under learning.curriculum in your tutor.json",
            ));
        }

        if self.learning.max_cached_users == 0 {
            return Err(TutorError::config_validation(
                "learning.maxCachedUsers must be greater than 0",
                "Set learning.maxCachedUsers to at least 1 in your tutor.json",
            ));
        }

        if self.learning.xp_per_level == 0 {
            return Err(TutorError::config_validation(
                "learning.xpPerLevel must be greater than 0",
                "Set learning.xpPerLevel to at least 1 in your tutor.json",
            ));
        }

        if self.learning.intermediate_xp >= self.learning.advanced_xp
            || self.learning.intermediate_level >= self.learning.advanced_level
        {
            return Err(TutorError::config_validation(
                "intermediate skill thresholds must be below advanced thresholds",
                "Make learning.intermediateXp < learning.advancedXp and learning.intermediateLevel < learning.advancedLevel",
            ));
        }

        if self.analytics.half_life_days <= 0.0 {
            return Err(TutorError::config_validation(
                "analytics.halfLifeDays must be positive",
                "Set analytics.halfLifeDays to a value such as 14 in your tutor.json",
            ));
        }

        for (name, value) in [
            ("errorRateThreshold", self.analytics.error_rate_threshold),
            ("successRateThreshold", self.analytics.success_rate_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(TutorError::config_validation(
                    format!("analytics.{name} must be between 0.0 and 1.0 (got {value})"),
                    format!("Set analytics.{name} to a fraction in your tutor.json"),
                ));
            }
        }

        if self.metrics.active_user_period_secs == 0 {
            return Err(TutorError::config_validation(
                "metrics.activeUserPeriodSecs must be greater than 0",
                "Set metrics.activeUserPeriodSecs to at least 1 in your tutor.json",
            ));
        }

        Ok(())
    }

    /// Returns the backend call timeout.
    #[must_use]
    pub const fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_secs)
    }
}

/// Hourly quotas per request type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Explanations per hour.
    #[serde(default = "default_explanation_limit")]
    pub explanation: u32,
    /// Challenges per hour.
    #[serde(default = "default_challenge_limit")]
    pub challenge: u32,
    /// Security analyses per hour.
    #[serde(default = "default_security_limit")]
    pub security_analysis: u32,
    /// Contract generations per hour.
    #[serde(default = "default_contract_limit")]
    pub contract_generation: u32,
    /// Multi-modal explanations per hour.
    #[serde(default = "default_multi_modal_limit")]
    pub multi_modal: u32,
    /// Voice commands per hour.
    #[serde(default = "default_voice_limit")]
    pub voice_command: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            explanation: default_explanation_limit(),
            challenge: default_challenge_limit(),
            security_analysis: default_security_limit(),
            contract_generation: default_contract_limit(),
            multi_modal: default_multi_modal_limit(),
            voice_command: default_voice_limit(),
        }
    }
}

impl RateLimitConfig {
    /// Returns the hourly limit for a request type.
    #[must_use]
    pub const fn limit_for(&self, request_type: RequestType) -> u32 {
        match request_type {
            RequestType::Explanation => self.explanation,
            RequestType::Challenge => self.challenge,
            RequestType::SecurityAnalysis => self.security_analysis,
            RequestType::ContractGeneration => self.contract_generation,
            RequestType::MultiModal => self.multi_modal,
            RequestType::VoiceCommand => self.voice_command,
        }
    }
}

/// Static routing table: preferred backend per request category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    /// Preferred backend for code generation.
    #[serde(default = "default_code_route")]
    pub code: ServiceId,
    /// Preferred backend for explanations.
    #[serde(default = "default_cloud_route")]
    pub explanation: ServiceId,
    /// Preferred backend for analysis.
    #[serde(default = "default_cloud_route")]
    pub analysis: ServiceId,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            code: default_code_route(),
            explanation: default_cloud_route(),
            analysis: default_cloud_route(),
        }
    }
}

impl RoutingConfig {
    /// Returns the preferred backend for a category.
    #[must_use]
    pub const fn preferred(&self, category: RequestCategory) -> ServiceId {
        match category {
            RequestCategory::Code => self.code,
            RequestCategory::Explanation => self.explanation,
            RequestCategory::Analysis => self.analysis,
        }
    }
}

/// Health hysteresis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    /// Consecutive failures that mark a backend unhealthy.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// Settings for both backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicesConfig {
    /// The local inference service.
    #[serde(default = "ServiceConfig::local")]
    pub local: ServiceConfig,
    /// The cloud inference service.
    #[serde(default = "ServiceConfig::cloud")]
    pub cloud: ServiceConfig,
    /// Base URL of the speech transcription service, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription_endpoint: Option<String>,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            local: ServiceConfig::local(),
            cloud: ServiceConfig::cloud(),
            transcription_endpoint: None,
        }
    }
}

impl ServicesConfig {
    /// Returns the settings for one backend.
    #[must_use]
    pub const fn get(&self, id: ServiceId) -> &ServiceConfig {
        match id {
            ServiceId::Local => &self.local,
            ServiceId::Cloud => &self.cloud,
        }
    }
}

/// Settings for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Base URL of the backend's HTTP adapter, if served over HTTP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Seconds between liveness probes.
    pub probe_interval_secs: u64,
    /// Confidence reported for responses served by this backend.
    pub confidence: f64,
}

impl ServiceConfig {
    fn local() -> Self {
        Self {
            endpoint: None,
            probe_interval_secs: default_local_probe_interval(),
            confidence: default_local_confidence(),
        }
    }

    fn cloud() -> Self {
        Self {
            endpoint: None,
            probe_interval_secs: default_cloud_probe_interval(),
            confidence: default_cloud_confidence(),
        }
    }

    /// Returns the probe interval.
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

/// Options passed on every backend call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Timeout for a single backend call in seconds.
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
    /// Maximum tokens to generate.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_backend_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Learning-context and learning-path tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningConfig {
    /// Maximum length of a generated learning path.
    #[serde(default = "default_learning_path_length")]
    pub learning_path_length: usize,
    /// Maximum number of topics kept in `recentTopics`.
    #[serde(default = "default_max_recent_topics")]
    pub max_recent_topics: usize,
    /// XP granted to a brand-new learner.
    #[serde(default = "default_total_xp")]
    pub default_total_xp: u64,
    /// XP at which a learner becomes intermediate.
    #[serde(default = "default_intermediate_xp")]
    pub intermediate_xp: u64,
    /// XP at which a learner becomes advanced.
    #[serde(default = "default_advanced_xp")]
    pub advanced_xp: u64,
    /// Level at which a learner becomes intermediate.
    #[serde(default = "default_intermediate_level")]
    pub intermediate_level: u32,
    /// Level at which a learner becomes advanced.
    #[serde(default = "default_advanced_level")]
    pub advanced_level: u32,
    /// XP needed per level.
    #[serde(default = "default_xp_per_level")]
    pub xp_per_level: u64,
    /// XP for completing a difficulty-5 challenge; scales linearly with difficulty.
    #[serde(default = "default_challenge_base_xp")]
    pub challenge_base_xp: u64,
    /// Canonical topic order.
    #[serde(default = "default_curriculum")]
    pub curriculum: Vec<String>,
    /// Cached contexts above which idle ones are evicted.
    #[serde(default = "default_max_cached_users")]
    pub max_cached_users: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_path_length: default_learning_path_length(),
            max_recent_topics: default_max_recent_topics(),
            default_total_xp: default_total_xp(),
            intermediate_xp: default_intermediate_xp(),
            advanced_xp: default_advanced_xp(),
            intermediate_level: default_intermediate_level(),
            advanced_level: default_advanced_level(),
            xp_per_level: default_xp_per_level(),
            challenge_base_xp: default_challenge_base_xp(),
            curriculum: default_curriculum(),
            max_cached_users: default_max_cached_users(),
        }
    }
}

/// Learning-analytics tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsConfig {
    /// Age in days at which an interaction counts half as much toward mastery.
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,
    /// Graded attempts needed before a topic can become a pattern.
    #[serde(default = "default_min_attempts")]
    pub min_attempts: usize,
    /// Failure rate at or above which a topic is an error pattern.
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,
    /// Success rate and mastery at or above which a topic is a success pattern.
    #[serde(default = "default_success_rate_threshold")]
    pub success_rate_threshold: f64,
    /// Number of recommended next topics.
    #[serde(default = "default_recommendation_count")]
    pub recommendation_count: usize,
    /// Number of most recent challenges used for the difficulty preference.
    #[serde(default = "default_recent_challenge_window")]
    pub recent_challenge_window: usize,
    /// Days of interaction history to aggregate.
    #[serde(default = "default_history_days")]
    pub history_days: i64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            half_life_days: default_half_life_days(),
            min_attempts: default_min_attempts(),
            error_rate_threshold: default_error_rate_threshold(),
            success_rate_threshold: default_success_rate_threshold(),
            recommendation_count: default_recommendation_count(),
            recent_challenge_window: default_recent_challenge_window(),
            history_days: default_history_days(),
        }
    }
}

/// Metrics aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    /// Length of the aggregation period for distinct active users, in seconds.
    #[serde(default = "default_active_user_period")]
    pub active_user_period_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            active_user_period_secs: default_active_user_period(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.rate_limits.explanation, 60);
        assert_eq!(config.rate_limits.security_analysis, 10);
        assert_eq!(config.routing.code, ServiceId::Local);
        assert_eq!(config.routing.explanation, ServiceId::Cloud);
        assert_eq!(config.health.failure_threshold, 3);
        assert_eq!(config.backend.timeout_secs, 30);
        assert_eq!(config.learning.default_total_xp, 150);
        assert_eq!(config.learning.learning_path_length, 8);
        assert_eq!(config.feature_flags.get(FEATURE_VOICE_COMMANDS), Some(&true));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_limit_for_each_type() {
        let limits = RateLimitConfig {
            explanation: 1,
            challenge: 2,
            security_analysis: 3,
            contract_generation: 4,
            multi_modal: 5,
            voice_command: 6,
        };
        let got: Vec<u32> = RequestType::ALL
            .iter()
            .map(|t| limits.limit_for(*t))
            .collect();
        assert_eq!(got, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_routing_preferred() {
        let routing = RoutingConfig::default();
        assert_eq!(routing.preferred(RequestCategory::Code), ServiceId::Local);
        assert_eq!(routing.preferred(RequestCategory::Analysis), ServiceId::Cloud);
    }

    #[test]
    fn test_config_deserialization_with_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.rate_limits.challenge, 20);
        assert_eq!(config.services.local.probe_interval_secs, 15);
        assert_eq!(config.services.cloud.probe_interval_secs, 30);
        assert!(!config.learning.curriculum.is_empty());
    }

    #[test]
    fn test_config_deserialization_with_overrides() {
        let json = r#"{
            "rateLimits": { "explanation": 2 },
            "routing": { "code": "CLOUD", "explanation": "Local" },
            "health": { "failureThreshold": 5 },
            "learning": { "learningPathLength": 4, "curriculum": ["a", "b"] },
            "featureFlags": { "voiceCommands": false }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.rate_limits.explanation, 2);
        assert_eq!(config.rate_limits.challenge, 20);
        assert_eq!(config.routing.code, ServiceId::Cloud);
        assert_eq!(config.routing.explanation, ServiceId::Local);
        assert_eq!(config.routing.analysis, ServiceId::Cloud);
        assert_eq!(config.health.failure_threshold, 5);
        assert_eq!(config.learning.learning_path_length, 4);
        assert_eq!(config.learning.curriculum, vec!["a", "b"]);
        assert_eq!(config.feature_flags.get(FEATURE_VOICE_COMMANDS), Some(&false));
        // Replacing the map drops the other defaults
        assert_eq!(config.feature_flags.get(FEATURE_ANALYTICS), None);
    }

    #[test]
    fn test_invalid_service_id_error() {
        let json = r#"{"routing": {"code": "gpu-farm"}}"#;
        let err = serde_json::from_str::<Config>(json).unwrap_err().to_string();
        assert!(err.contains("invalid service"));
        assert!(err.contains("gpu-farm"));
    }

    #[test]
    fn test_load_from_file_nonexistent_returns_default() {
        let path = PathBuf::from("/nonexistent/path/tutor.json");
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.health.failure_threshold, 3);
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        use std::io::Write;

        let config_path = std::env::temp_dir().join("test_tutor_invalid.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(b"{ not valid json }").unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(&err, TutorError::ConfigParseError { path, message } if *path == config_path && !message.is_empty()),
            "Expected ConfigParseError with correct path, got: {err:?}"
        );

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_dir_finds_tutor_json() {
        use std::io::Write;

        let temp_dir = std::env::temp_dir().join("test_tutor_dir");
        std::fs::create_dir_all(&temp_dir).unwrap();
        let config_path = temp_dir.join("tutor.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(br#"{"health": {"failureThreshold": 7}}"#)
            .unwrap();

        let config = Config::load_from_dir(&temp_dir).unwrap();
        assert_eq!(config.health.failure_threshold, 7);

        std::fs::remove_file(&config_path).ok();
        std::fs::remove_dir(&temp_dir).ok();
    }

    #[test]
    fn test_load_from_file_validates_after_parsing() {
        use std::io::Write;

        let config_path = std::env::temp_dir().join("test_tutor_validation.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(br#"{"health": {"failureThreshold": 0}}"#)
            .unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(&err, TutorError::ConfigValidationError { .. }),
            "Expected ConfigValidationError, got: {err:?}"
        );

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_validation_zero_timeout() {
        let mut config = Config::default();
        config.backend.timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(
            matches!(&err, TutorError::ConfigValidationError { message, suggestion }
                if message.contains("timeoutSecs") && suggestion.contains("timeoutSecs")),
            "Expected ConfigValidationError about timeoutSecs, got: {err:?}"
        );
    }

    #[test]
    fn test_validation_zero_probe_interval() {
        let mut config = Config::default();
        config.services.cloud.probe_interval_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("services.cloud.probeIntervalSecs"));
    }

    #[test]
    fn test_validation_empty_curriculum() {
        let mut config = Config::default();
        config.learning.curriculum = vec!["  ".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_cache_capacity() {
        let mut config = Config::default();
        config.learning.max_cached_users = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("maxCachedUsers"));
    }

    #[test]
    fn test_validation_inverted_skill_thresholds() {
        let mut config = Config::default();
        config.learning.intermediate_xp = 6000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("thresholds"));
    }

    #[test]
    fn test_validation_rate_out_of_range() {
        let mut config = Config::default();
        config.analytics.error_rate_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("errorRateThreshold"));
    }

    #[test]
    fn test_backend_timeout_duration() {
        let config = Config::default();
        assert_eq!(config.backend_timeout(), Duration::from_secs(30));
    }
}
