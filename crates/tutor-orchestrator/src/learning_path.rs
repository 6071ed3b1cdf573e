//! Adaptive learning-path and challenge-difficulty selection.

use crate::context::UserLearningContext;
use crate::parsing::clamp_difficulty;

/// Builds a learning path for `context`.
///
/// Weak areas are interleaved with the next curriculum topics the learner has
/// not studied recently and not yet mastered, weak areas first. Topics in
/// `recent_topics` are never included, duplicates are dropped, and the path
/// has at most `max_len` entries.
#[must_use]
pub fn adaptive_learning_path(
    context: &UserLearningContext,
    curriculum: &[String],
    max_len: usize,
) -> Vec<String> {
    let eligible = |topic: &String| !topic.trim().is_empty() && !context.is_recent(topic);

    let weak: Vec<&String> = context.weak_areas.iter().filter(|t| eligible(t)).collect();
    let next: Vec<&String> = curriculum
        .iter()
        .filter(|t| eligible(t) && !context.is_weak(t) && !context.is_strong(t))
        .collect();

    let mut path: Vec<String> = Vec::with_capacity(max_len);
    let mut weak_iter = weak.into_iter();
    let mut next_iter = next.into_iter();

    while path.len() < max_len {
        let mut progressed = false;
        for candidate in [weak_iter.next(), next_iter.next()].into_iter().flatten() {
            progressed = true;
            if path.len() < max_len && !path.iter().any(|p| p.eq_ignore_ascii_case(candidate)) {
                path.push(candidate.clone());
            }
        }
        if !progressed {
            break;
        }
    }

    path
}

/// Picks a challenge difficulty for `topic`.
///
/// Starts from the skill level's base difficulty, then eases off by 2 for a
/// weak area or raises by 1 for a strong one. The result is in `[1, 10]`.
#[must_use]
pub fn challenge_difficulty(context: &UserLearningContext, topic: &str) -> u8 {
    let base = i64::from(context.skill_level.base_difficulty());
    let adjusted = if context.is_weak(topic) {
        base - 2
    } else if context.is_strong(topic) {
        base + 1
    } else {
        base
    };
    clamp_difficulty(adjusted)
}

/// XP awarded for completing a challenge of `difficulty`.
///
/// `base_xp` is the award at difficulty 5; the award scales linearly and is
/// never less than 10.
#[must_use]
pub fn challenge_xp(base_xp: u64, difficulty: u8) -> u64 {
    (base_xp.saturating_mul(u64::from(difficulty)) / 5).max(10)
}
