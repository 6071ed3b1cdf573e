//! Typed parsing of backend text into tutoring results.
//!
//! Backends are asked for JSON but frequently wrap it in prose or a fenced
//! block. Each parser first extracts a JSON object, validates it against a
//! raw schema whose fields are all optional, then fills deterministic defaults.
//! Where no safe default exists the parser returns
//! [`TutorError::MalformedBackendOutput`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};

// Literal patterns; compilation cannot fail at runtime.
#[allow(clippy::expect_used)]
static JSON_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)[ \t]*\r?\n(.*?)```").expect("Valid JSON fence regex")
});

#[allow(clippy::expect_used)]
static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[ \t]*\r?\n(.*?)```").expect("Valid code fence regex")
});

// ============================================================================
// Result types
// ============================================================================

/// A prose answer from a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorResponse {
    /// The answer text.
    pub content: String,
    /// The backend that produced it.
    pub model: String,
    /// End-to-end backend latency.
    pub response_time_ms: u64,
    /// Heuristic confidence in `[0, 1]`.
    pub confidence: f64,
}

/// A personalised coding challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    /// Short title.
    pub title: String,
    /// What the learner must do.
    pub description: String,
    /// Difficulty in `[1, 10]`.
    pub difficulty: u8,
    /// Code to start from.
    pub starter_code: String,
    /// Progressive hints.
    pub hints: Vec<String>,
    /// What the learner should take away.
    pub learning_objectives: Vec<String>,
}

/// Severity of a security finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Info,
    /// Low impact.
    Low,
    /// Medium impact.
    Medium,
    /// High impact.
    High,
    /// Funds or control at immediate risk.
    Critical,
}

impl Severity {
    fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "critical" => Self::Critical,
            "high" => Self::High,
            "low" => Self::Low,
            "info" | "informational" | "note" => Self::Info,
            _ => Self::Medium,
        }
    }
}

/// One finding in a security analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    /// How serious the finding is.
    pub severity: Severity,
    /// Short name.
    pub title: String,
    /// Explanation of the issue.
    pub description: String,
    /// Source line, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// How to fix it.
    pub recommendation: String,
}

/// Security report for a smart contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAnalysis {
    /// Score in `[0, 100]`; higher is safer.
    pub overall_score: u8,
    /// Findings, most severe first.
    pub vulnerabilities: Vec<Vulnerability>,
    /// Gas optimisation suggestions.
    pub gas_optimizations: Vec<String>,
    /// Best-practice suggestions.
    pub best_practices: Vec<String>,
}

/// A generated smart contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractGenerationResult {
    /// Contract source.
    pub code: String,
    /// What the contract does.
    pub explanation: String,
    /// Security notes.
    pub security_considerations: Vec<String>,
    /// Gas notes.
    pub gas_optimizations: Vec<String>,
    /// Suggested tests.
    pub test_suggestions: Vec<String>,
}

/// One concept explained four ways.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiModalExplanation {
    /// Prose explanation.
    pub text: String,
    /// Diagram descriptor, e.g. Mermaid source.
    pub diagram: String,
    /// Description of an interactive exercise.
    pub interactive_example: String,
    /// Code illustrating the concept.
    pub code_example: String,
}

// ============================================================================
// Extraction helpers
// ============================================================================

/// Returns the text of the first JSON object in `text`.
///
/// Prefers a ```` ```json ```` fenced block, then the span from the first `{`
/// to the last `}` outside any other fenced block.
fn json_candidate(text: &str) -> Option<String> {
    if let Some(inner) = JSON_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
    {
        return Some(inner);
    }
    let prose = strip_code_blocks(text);
    let start = prose.find('{')?;
    let end = prose.rfind('}')?;
    (end > start).then(|| prose[start..=end].to_string())
}

fn extract_json<T: DeserializeOwned>(text: &str) -> Option<T> {
    json_candidate(text).and_then(|candidate| serde_json::from_str(&candidate).ok())
}

/// Decodes the JSON object in `text` into `T`.
///
/// `Ok(None)` means the output carries no JSON object, so callers may read it
/// as prose. An object that is present but does not fit `T`, or a `json`
/// fence that does not hold valid JSON, is malformed output.
fn decode_json<T: DeserializeOwned>(text: &str, operation: &str) -> Result<Option<T>> {
    let Some(candidate) = json_candidate(text) else {
        return Ok(None);
    };
    let fenced = JSON_FENCE.is_match(text);

    let value = match serde_json::from_str::<serde_json::Value>(&candidate) {
        Ok(value) if value.is_object() => value,
        // Braces in plain prose, e.g. inline code
        Ok(_) | Err(_) if !fenced => return Ok(None),
        Ok(_) => {
            return Err(TutorError::malformed(
                operation,
                "fenced JSON is not an object",
            ))
        }
        Err(e) => {
            return Err(TutorError::malformed(
                operation,
                format!("fenced JSON is invalid: {e}"),
            ))
        }
    };

    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| TutorError::malformed(operation, format!("unexpected JSON shape: {e}")))
}

/// Returns the body of the first fenced code block that is not JSON.
fn first_code_block(text: &str) -> Option<String> {
    CODE_FENCE.captures_iter(text).find_map(|c| {
        let lang = c.get(1).map_or("", |m| m.as_str());
        if lang.eq_ignore_ascii_case("json") {
            return None;
        }
        c.get(2)
            .map(|m| m.as_str().trim().to_string())
            .filter(|body| !body.is_empty())
    })
}

/// Returns `text` with every fenced block removed.
fn strip_code_blocks(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").trim().to_string()
}

/// Reads a number that may arrive as a JSON number or a numeric string.
fn as_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_to(value: f64, min: u8, max: u8) -> u8 {
    value.round().clamp(f64::from(min), f64::from(max)) as u8
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn line_number(value: f64) -> u32 {
    value.round().min(f64::from(u32::MAX)) as u32
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn clean_list(values: Option<Vec<String>>) -> Vec<String> {
    values
        .unwrap_or_default()
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Clamps a challenge difficulty into `[1, 10]`.
#[must_use]
pub fn clamp_difficulty(value: i64) -> u8 {
    u8::try_from(value.clamp(1, 10)).unwrap_or(1)
}

// ============================================================================
// Parsers
// ============================================================================

/// Validates prose output.
pub fn parse_explanation(text: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(TutorError::malformed("explanation", "backend returned empty text"));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChallenge {
    title: Option<String>,
    description: Option<String>,
    difficulty: Option<serde_json::Value>,
    starter_code: Option<String>,
    hints: Option<Vec<String>>,
    learning_objectives: Option<Vec<String>>,
}

/// Parses a challenge, defaulting missing fields.
///
/// The difficulty is clamped to `[1, 10]`; when missing or non-numeric it is
/// `chosen_difficulty`.
pub fn parse_challenge(text: &str, topic: &str, chosen_difficulty: u8) -> Result<Challenge> {
    let chosen = chosen_difficulty.clamp(1, 10);
    let default_title = format!("{topic} challenge");
    let default_objectives = || vec![format!("Practice {topic}")];

    if let Some(raw) = decode_json::<RawChallenge>(text, "challenge")? {
        let description = non_empty(raw.description)
            .ok_or_else(|| TutorError::malformed("challenge", "challenge has no description"))?;
        let objectives = clean_list(raw.learning_objectives);
        return Ok(Challenge {
            title: non_empty(raw.title).unwrap_or(default_title),
            description,
            difficulty: raw
                .difficulty
                .as_ref()
                .and_then(as_number)
                .map_or(chosen, |d| clamp_to(d, 1, 10)),
            starter_code: raw
                .starter_code
                .map(|s| s.trim().to_string())
                .or_else(|| first_code_block(text))
                .unwrap_or_default(),
            hints: clean_list(raw.hints),
            learning_objectives: if objectives.is_empty() {
                default_objectives()
            } else {
                objectives
            },
        });
    }

    let description = strip_code_blocks(text);
    if description.is_empty() {
        return Err(TutorError::malformed("challenge", "backend returned no challenge text"));
    }
    Ok(Challenge {
        title: default_title,
        description,
        difficulty: chosen,
        starter_code: first_code_block(text).unwrap_or_default(),
        hints: Vec::new(),
        learning_objectives: default_objectives(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVulnerability {
    severity: Option<String>,
    title: Option<String>,
    description: Option<String>,
    line: Option<serde_json::Value>,
    recommendation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSecurityAnalysis {
    overall_score: Option<serde_json::Value>,
    vulnerabilities: Option<Vec<RawVulnerability>>,
    gas_optimizations: Option<Vec<String>>,
    best_practices: Option<Vec<String>>,
}

/// Parses a security report.
///
/// A report without a parseable JSON body or without a numeric `overallScore`
/// is rejected rather than defaulted; the score is clamped to `[0, 100]`.
pub fn parse_security_analysis(text: &str) -> Result<SecurityAnalysis> {
    let raw: RawSecurityAnalysis = decode_json(text, "security_analysis")?.ok_or_else(|| {
        TutorError::malformed("security_analysis", "no JSON report in backend output")
    })?;

    let score = raw
        .overall_score
        .as_ref()
        .and_then(as_number)
        .ok_or_else(|| TutorError::malformed("security_analysis", "report has no overallScore"))?;

    let mut vulnerabilities: Vec<Vulnerability> = raw
        .vulnerabilities
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| {
            let title = non_empty(v.title);
            let description = non_empty(v.description);
            if title.is_none() && description.is_none() {
                return None;
            }
            Some(Vulnerability {
                severity: v
                    .severity
                    .as_deref()
                    .map_or(Severity::Medium, Severity::parse_lenient),
                title: title.clone().unwrap_or_else(|| "Unnamed finding".to_string()),
                description: description.or(title).unwrap_or_default(),
                line: v
                    .line
                    .as_ref()
                    .and_then(as_number)
                    .filter(|n| *n >= 1.0)
                    .map(line_number),
                recommendation: non_empty(v.recommendation).unwrap_or_default(),
            })
        })
        .collect();
    vulnerabilities.sort_by(|a, b| b.severity.cmp(&a.severity));

    Ok(SecurityAnalysis {
        overall_score: clamp_to(score, 0, 100),
        vulnerabilities,
        gas_optimizations: clean_list(raw.gas_optimizations),
        best_practices: clean_list(raw.best_practices),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContract {
    code: Option<String>,
    explanation: Option<String>,
    security_considerations: Option<Vec<String>>,
    gas_optimizations: Option<Vec<String>>,
    test_suggestions: Option<Vec<String>>,
}

/// Parses a generated contract.
///
/// Accepts a JSON object with `code`, or falls back to the first fenced code
/// block with the surrounding prose as the explanation.
pub fn parse_contract(text: &str) -> Result<ContractGenerationResult> {
    if let Some(raw) = extract_json::<RawContract>(text) {
        if let Some(code) = non_empty(raw.code) {
            return Ok(ContractGenerationResult {
                code,
                explanation: non_empty(raw.explanation).unwrap_or_default(),
                security_considerations: clean_list(raw.security_considerations),
                gas_optimizations: clean_list(raw.gas_optimizations),
                test_suggestions: clean_list(raw.test_suggestions),
            });
        }
    }

    let code = first_code_block(text).ok_or_else(|| {
        TutorError::malformed("contract_generation", "backend output contains no contract code")
    })?;
    Ok(ContractGenerationResult {
        code,
        explanation: strip_code_blocks(text),
        security_considerations: Vec::new(),
        gas_optimizations: Vec::new(),
        test_suggestions: Vec::new(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMultiModal {
    text: Option<String>,
    diagram: Option<String>,
    interactive_example: Option<String>,
    code_example: Option<String>,
}

/// Parses a four-way explanation.
///
/// The prose part is required; the other representations default to empty.
pub fn parse_multi_modal(text: &str) -> Result<MultiModalExplanation> {
    if let Some(raw) = decode_json::<RawMultiModal>(text, "multi_modal")? {
        let prose = non_empty(raw.text)
            .ok_or_else(|| TutorError::malformed("multi_modal", "explanation has no text"))?;
        return Ok(MultiModalExplanation {
            text: prose,
            diagram: non_empty(raw.diagram).unwrap_or_default(),
            interactive_example: non_empty(raw.interactive_example).unwrap_or_default(),
            code_example: non_empty(raw.code_example)
                .or_else(|| first_code_block(text))
                .unwrap_or_default(),
        });
    }

    let prose = strip_code_blocks(text);
    if prose.is_empty() {
        return Err(TutorError::malformed("multi_modal", "backend returned no explanation text"));
    }
    Ok(MultiModalExplanation {
        text: prose,
        diagram: String::new(),
        interactive_example: String::new(),
        code_example: first_code_block(text).unwrap_or_default(),
    })
}
