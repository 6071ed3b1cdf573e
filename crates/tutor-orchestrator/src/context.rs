//! Per-user adaptive learning state.
//!
//! [`UserLearningContext`] holds what the orchestrator knows about a learner.
//! [`LearningContextStore`] caches contexts, loads them through the
//! [`LearningRepository`], and serialises updates per user.

use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::config::LearningConfig;
use crate::metrics::MetricsCollector;
use crate::repository::LearningRepository;

// ============================================================================
// Types
// ============================================================================

/// Coarse learner skill, derived from XP and level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkillLevel {
    /// New learner.
    #[default]
    Beginner,
    /// Comfortable with the basics.
    Intermediate,
    /// Experienced learner.
    Advanced,
}

impl SkillLevel {
    /// Derives the skill level from XP and level thresholds.
    ///
    /// Either threshold is sufficient to reach a level.
    #[must_use]
    pub const fn derive(total_xp: u64, current_level: u32, config: &LearningConfig) -> Self {
        if total_xp >= config.advanced_xp || current_level >= config.advanced_level {
            Self::Advanced
        } else if total_xp >= config.intermediate_xp || current_level >= config.intermediate_level
        {
            Self::Intermediate
        } else {
            Self::Beginner
        }
    }

    /// Starting challenge difficulty for this skill level.
    #[must_use]
    pub const fn base_difficulty(self) -> u8 {
        match self {
            Self::Beginner => 3,
            Self::Intermediate => 5,
            Self::Advanced => 8,
        }
    }
}

/// How a learner prefers material to be presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningStyle {
    /// Diagrams and visuals.
    Visual,
    /// Prose.
    Textual,
    /// A mix of both.
    #[default]
    Mixed,
}

/// Everything the orchestrator knows about one learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLearningContext {
    /// The learner.
    pub user_id: String,
    /// Current level, starting at 1.
    pub current_level: u32,
    /// Derived from `total_xp` and `current_level`.
    pub skill_level: SkillLevel,
    /// Topics the learner should study next, in order.
    pub learning_path: Vec<String>,
    /// Recently studied topics, most recent first.
    pub recent_topics: Vec<String>,
    /// Topics the learner struggles with.
    pub weak_areas: Vec<String>,
    /// Topics the learner has shown mastery of.
    pub strong_areas: Vec<String>,
    /// Preferred presentation style.
    pub preferred_learning_style: LearningStyle,
    /// Accumulated experience points.
    #[serde(rename = "totalXP")]
    pub total_xp: u64,
    /// Consecutive active days.
    pub streak: u32,
    /// Last day the learner was active.
    #[serde(default)]
    pub last_active_date: Option<NaiveDate>,
}

fn contains_topic(topics: &[String], topic: &str) -> bool {
    topics.iter().any(|t| t.eq_ignore_ascii_case(topic))
}

fn remove_topic(topics: &mut Vec<String>, topic: &str) {
    topics.retain(|t| !t.eq_ignore_ascii_case(topic));
}

impl UserLearningContext {
    /// Creates the default record for a new learner.
    #[must_use]
    pub fn new(user_id: impl Into<String>, config: &LearningConfig) -> Self {
        let mut context = Self {
            user_id: user_id.into(),
            current_level: 1,
            skill_level: SkillLevel::Beginner,
            learning_path: Vec::new(),
            recent_topics: Vec::new(),
            weak_areas: Vec::new(),
            strong_areas: Vec::new(),
            preferred_learning_style: LearningStyle::Mixed,
            total_xp: config.default_total_xp,
            streak: 0,
            last_active_date: None,
        };
        context.refresh_skill_level(config);
        context
    }

    /// Recomputes `skill_level` from `total_xp` and `current_level`.
    pub fn refresh_skill_level(&mut self, config: &LearningConfig) {
        self.current_level = self.current_level.max(1);
        self.skill_level = SkillLevel::derive(self.total_xp, self.current_level, config);
    }

    /// Adds XP, raises the level to match, and refreshes the skill level.
    pub fn award_xp(&mut self, xp: u64, config: &LearningConfig) {
        self.total_xp = self.total_xp.saturating_add(xp);
        let earned_level =
            u32::try_from(self.total_xp / config.xp_per_level.max(1)).unwrap_or(u32::MAX);
        self.current_level = self.current_level.max(earned_level.saturating_add(1));
        self.refresh_skill_level(config);
    }

    /// Moves `topic` to the front of `recent_topics`, keeping at most `max` entries.
    pub fn record_topic(&mut self, topic: &str, max: usize) {
        let topic = topic.trim();
        if topic.is_empty() {
            return;
        }
        remove_topic(&mut self.recent_topics, topic);
        self.recent_topics.insert(0, topic.to_string());
        self.recent_topics.truncate(max);
    }

    /// Updates the daily streak for activity on `today`.
    ///
    /// Activity on the same day leaves the streak unchanged, activity on the
    /// following day extends it, and anything else restarts it at 1.
    pub fn touch_streak(&mut self, today: NaiveDate) {
        self.streak = match self.last_active_date {
            Some(last) if last == today => self.streak.max(1),
            Some(last) if last.succ_opt() == Some(today) => self.streak.saturating_add(1),
            _ => 1,
        };
        self.last_active_date = Some(today);
    }

    /// Marks a topic as weak, removing it from the strong areas.
    pub fn mark_weak(&mut self, topic: &str) {
        remove_topic(&mut self.strong_areas, topic);
        if !contains_topic(&self.weak_areas, topic) {
            self.weak_areas.push(topic.to_string());
        }
    }

    /// Marks a topic as strong, removing it from the weak areas.
    pub fn mark_strong(&mut self, topic: &str) {
        remove_topic(&mut self.weak_areas, topic);
        if !contains_topic(&self.strong_areas, topic) {
            self.strong_areas.push(topic.to_string());
        }
    }

    /// Removes a topic from the weak areas.
    pub fn clear_weak(&mut self, topic: &str) {
        remove_topic(&mut self.weak_areas, topic);
    }

    /// Returns whether `topic` is one of the weak areas.
    #[must_use]
    pub fn is_weak(&self, topic: &str) -> bool {
        contains_topic(&self.weak_areas, topic)
    }

    /// Returns whether `topic` is one of the strong areas.
    #[must_use]
    pub fn is_strong(&self, topic: &str) -> bool {
        contains_topic(&self.strong_areas, topic)
    }

    /// Returns whether `topic` was studied recently.
    #[must_use]
    pub fn is_recent(&self, topic: &str) -> bool {
        contains_topic(&self.recent_topics, topic)
    }
}

/// A partial update. Supplied fields overwrite; collections are replaced wholesale.
///
/// `skillLevel` is not accepted; it is always derived.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextUpdate {
    /// New current level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_level: Option<u32>,
    /// New learning path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_path: Option<Vec<String>>,
    /// New recent topics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_topics: Option<Vec<String>>,
    /// New weak areas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weak_areas: Option<Vec<String>>,
    /// New strong areas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strong_areas: Option<Vec<String>>,
    /// New preferred style.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_learning_style: Option<LearningStyle>,
    /// New XP total.
    #[serde(default, rename = "totalXP", skip_serializing_if = "Option::is_none")]
    pub total_xp: Option<u64>,
    /// New streak.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streak: Option<u32>,
    /// New last-active date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_date: Option<NaiveDate>,
}

impl ContextUpdate {
    /// Merges the supplied fields into `context`.
    pub fn apply_to(self, context: &mut UserLearningContext) {
        if let Some(v) = self.current_level {
            context.current_level = v;
        }
        if let Some(v) = self.learning_path {
            context.learning_path = v;
        }
        if let Some(v) = self.recent_topics {
            context.recent_topics = v;
        }
        if let Some(v) = self.weak_areas {
            context.weak_areas = v;
        }
        if let Some(v) = self.strong_areas {
            context.strong_areas = v;
        }
        if let Some(v) = self.preferred_learning_style {
            context.preferred_learning_style = v;
        }
        if let Some(v) = self.total_xp {
            context.total_xp = v;
        }
        if let Some(v) = self.streak {
            context.streak = v;
        }
        if let Some(v) = self.last_active_date {
            context.last_active_date = Some(v);
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// Cached state for one user.
#[derive(Debug, Default)]
struct CacheEntry {
    /// `None` until loaded successfully.
    context: Option<UserLearningContext>,
    /// The cached context failed to save and differs from storage.
    unsaved: bool,
}

type Slot = Arc<Mutex<CacheEntry>>;

/// Result of loading a context: the context, and whether it came from a
/// failed load and must not be written back.
struct Loaded {
    context: UserLearningContext,
    degraded: bool,
}

/// Holds every learner's context.
///
/// Each user has an async lock; reads and updates for one user are serialised
/// while different users never contend.
pub struct LearningContextStore {
    config: LearningConfig,
    repository: Arc<dyn LearningRepository>,
    metrics: Arc<MetricsCollector>,
    slots: DashMap<String, Slot>,
}

impl std::fmt::Debug for LearningContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearningContextStore")
            .field("cached_users", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl LearningContextStore {
    /// Creates a store backed by `repository`.
    #[must_use]
    pub fn new(
        config: LearningConfig,
        repository: Arc<dyn LearningRepository>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            config,
            repository,
            metrics,
            slots: DashMap::new(),
        }
    }

    fn slot(&self, user_id: &str) -> Slot {
        let slot = Arc::clone(self.slots.entry(user_id.to_string()).or_default().value());
        // The entry guard is gone by now; retain() needs every shard lock.
        if self.slots.len() > self.config.max_cached_users {
            self.evict_idle();
        }
        slot
    }

    /// Drops cached contexts that no request holds and that match storage.
    ///
    /// Evicted users are reloaded from the repository on next access. A
    /// context whose last save failed stays cached. Returns the number of
    /// slots dropped.
    pub fn evict_idle(&self) -> usize {
        let before = self.slots.len();
        // Cloning a slot needs its shard lock, which retain() holds, so a
        // strong count of 1 cannot race with a new holder.
        self.slots.retain(|_, slot| {
            Arc::strong_count(slot) > 1 || slot.try_lock().map_or(true, |entry| entry.unsaved)
        });
        let evicted = before.saturating_sub(self.slots.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.slots.len(), "Evicted idle learning contexts");
        }
        evicted
    }

    async fn load(&self, user_id: &str, cached: &mut Option<UserLearningContext>) -> Loaded {
        if let Some(context) = cached.as_ref() {
            return Loaded {
                context: context.clone(),
                degraded: false,
            };
        }

        match self.repository.load_user_context(user_id).await {
            Ok(found) => {
                let context = found.unwrap_or_else(|| {
                    debug!(user_id, "No stored context, using default");
                    UserLearningContext::new(user_id, &self.config)
                });
                *cached = Some(context.clone());
                Loaded {
                    context,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!(user_id, error = %e, "Context load failed, using default for this request");
                self.metrics.record_context_load_failure();
                Loaded {
                    context: UserLearningContext::new(user_id, &self.config),
                    degraded: true,
                }
            }
        }
    }

    /// Returns the user's context, creating a default on first access.
    ///
    /// A default record is not persisted until the first update.
    #[instrument(skip(self))]
    pub async fn user_context(&self, user_id: &str) -> UserLearningContext {
        let slot = self.slot(user_id);
        let mut entry = slot.lock().await;
        self.load(user_id, &mut entry.context).await.context
    }

    /// Applies `f` to the user's context and persists the result.
    ///
    /// If the stored context could not be loaded, `f` runs against a default
    /// and the result is returned but neither cached nor saved, so a stored
    /// record is never overwritten by a default.
    pub async fn update_with<F, T>(&self, user_id: &str, f: F) -> (UserLearningContext, T)
    where
        F: FnOnce(&mut UserLearningContext) -> T + Send,
        T: Send,
    {
        let slot = self.slot(user_id);
        let mut entry = slot.lock().await;
        let Loaded {
            mut context,
            degraded,
        } = self.load(user_id, &mut entry.context).await;

        let value = f(&mut context);

        if degraded {
            return (context, value);
        }

        entry.unsaved = match self.repository.save_user_context(user_id, &context).await {
            Ok(()) => false,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to persist learning context");
                self.metrics.record_persistence_failure();
                true
            }
        };
        entry.context = Some(context.clone());
        (context, value)
    }

    /// Shallow-merges `update` into the user's context.
    ///
    /// This is a raw merge; it does not recompute derived fields.
    #[instrument(skip(self, update))]
    pub async fn update_user_context(
        &self,
        user_id: &str,
        update: ContextUpdate,
    ) -> UserLearningContext {
        self.update_with(user_id, |context| update.apply_to(context))
            .await
            .0
    }

    /// Returns the number of users with a cache slot.
    #[must_use]
    pub fn cached_users(&self) -> usize {
        self.slots.len()
    }
}
