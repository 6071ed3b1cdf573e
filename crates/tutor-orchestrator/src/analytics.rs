//! Learning analytics over a learner's interaction history.
//!
//! Mastery for a topic is the recency-weighted success rate of its graded
//! attempts. Each attempt's weight halves every `halfLifeDays`.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AnalyticsConfig;
use crate::context::UserLearningContext;
use crate::repository::InteractionRecord;
use crate::request::RequestType;

/// Aggregated view of a learner's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningAnalytics {
    /// Mastery per graded topic, in `[0, 1]`.
    pub concept_mastery: BTreeMap<String, f64>,
    /// Seconds spent per topic across all interactions.
    pub time_spent_per_topic: BTreeMap<String, u64>,
    /// Topics with a high failure rate, worst first.
    pub error_patterns: Vec<String>,
    /// Topics with sustained success, best first.
    pub success_patterns: Vec<String>,
    /// Suggested next topics, weakest mastery first.
    pub recommended_next_topics: Vec<String>,
    /// Preferred challenge difficulty in `[1, 10]`.
    pub difficulty_preference: f64,
}

#[derive(Debug, Default)]
struct TopicStats {
    attempts: usize,
    successes: usize,
    weighted_success: f64,
    weight: f64,
}

impl TopicStats {
    #[allow(clippy::cast_precision_loss)]
    fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }

    fn mastery(&self) -> f64 {
        if self.weight > 0.0 {
            self.weighted_success / self.weight
        } else {
            0.0
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn age_days(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((now - timestamp).num_seconds().max(0) as f64) / 86_400.0
}

/// Computes analytics from `history` as of `now`.
#[must_use]
pub fn compute_analytics(
    context: &UserLearningContext,
    history: &[InteractionRecord],
    curriculum: &[String],
    config: &AnalyticsConfig,
    now: DateTime<Utc>,
) -> LearningAnalytics {
    let mut stats: HashMap<String, TopicStats> = HashMap::new();
    let mut time_spent_per_topic: BTreeMap<String, u64> = BTreeMap::new();

    for record in history {
        *time_spent_per_topic.entry(record.topic.clone()).or_default() += record.time_spent_secs;

        let Some(success) = record.success else {
            continue;
        };
        let weight = 0.5_f64.powf(age_days(record.timestamp, now) / config.half_life_days);
        let entry = stats.entry(record.topic.clone()).or_default();
        entry.attempts += 1;
        entry.weight += weight;
        if success {
            entry.successes += 1;
            entry.weighted_success += weight;
        }
    }

    let concept_mastery: BTreeMap<String, f64> = stats
        .iter()
        .map(|(topic, s)| (topic.clone(), s.mastery()))
        .collect();

    let mut errors: Vec<(&String, f64)> = stats
        .iter()
        .filter(|(_, s)| s.attempts >= config.min_attempts)
        .map(|(t, s)| (t, 1.0 - s.success_rate()))
        .filter(|(_, failure_rate)| *failure_rate >= config.error_rate_threshold)
        .collect();
    errors.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let mut successes: Vec<(&String, f64)> = stats
        .iter()
        .filter(|(_, s)| {
            s.attempts >= config.min_attempts
                && s.success_rate() >= config.success_rate_threshold
                && s.mastery() >= config.success_rate_threshold
        })
        .map(|(t, s)| (t, s.mastery()))
        .collect();
    successes.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    LearningAnalytics {
        recommended_next_topics: recommend(context, &concept_mastery, curriculum, config),
        difficulty_preference: difficulty_preference(context, history, config),
        concept_mastery,
        time_spent_per_topic,
        error_patterns: errors.into_iter().map(|(t, _)| t.clone()).collect(),
        success_patterns: successes.into_iter().map(|(t, _)| t.clone()).collect(),
    }
}

/// Lowest-mastery topics not already weak areas, padded with unseen curriculum topics.
fn recommend(
    context: &UserLearningContext,
    mastery: &BTreeMap<String, f64>,
    curriculum: &[String],
    config: &AnalyticsConfig,
) -> Vec<String> {
    let mut ranked: Vec<(&String, f64)> = mastery
        .iter()
        .filter(|(topic, _)| !context.is_weak(topic))
        .map(|(t, m)| (t, *m))
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));

    let mut picks: Vec<String> = ranked
        .into_iter()
        .take(config.recommendation_count)
        .map(|(t, _)| t.clone())
        .collect();

    for topic in curriculum {
        if picks.len() >= config.recommendation_count {
            break;
        }
        let seen = mastery.keys().any(|t| t.eq_ignore_ascii_case(topic));
        if !seen && !context.is_weak(topic) && !picks.iter().any(|p| p.eq_ignore_ascii_case(topic))
        {
            picks.push(topic.clone());
        }
    }

    picks
}

/// Mean recent challenge difficulty, nudged up by completion rate above 50%
/// and down below it.
#[allow(clippy::cast_precision_loss)]
fn difficulty_preference(
    context: &UserLearningContext,
    history: &[InteractionRecord],
    config: &AnalyticsConfig,
) -> f64 {
    let mut challenges: Vec<(&InteractionRecord, bool, u8)> = history
        .iter()
        .filter(|r| r.kind == RequestType::Challenge)
        .filter_map(|r| Some((r, r.success?, r.difficulty?)))
        .collect();
    challenges.sort_by_key(|(r, _, _)| std::cmp::Reverse(r.timestamp));
    challenges.truncate(config.recent_challenge_window);

    if challenges.is_empty() {
        return f64::from(context.skill_level.base_difficulty());
    }

    let count = challenges.len() as f64;
    let mean_difficulty = challenges
        .iter()
        .map(|(_, _, d)| f64::from(*d))
        .sum::<f64>()
        / count;
    let completion = challenges.iter().filter(|(_, ok, _)| *ok).count() as f64 / count;

    (mean_difficulty + (completion - 0.5) * 4.0).clamp(1.0, 10.0)
}
