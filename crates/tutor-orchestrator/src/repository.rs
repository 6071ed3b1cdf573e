//! Persistence collaborator for learning contexts and interaction history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::context::UserLearningContext;
use crate::error::Result;
use crate::request::RequestType;

/// One learning interaction, appended to a user's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    /// The user who interacted.
    pub user_id: String,
    /// The topic the interaction was about.
    pub topic: String,
    /// What kind of request this was.
    pub kind: RequestType,
    /// Whether the attempt succeeded; `None` for ungraded interactions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Challenge difficulty, for graded challenge attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<u8>,
    /// Time the learner spent, in seconds.
    #[serde(default)]
    pub time_spent_secs: u64,
    /// When the interaction happened.
    pub timestamp: DateTime<Utc>,
}

impl InteractionRecord {
    /// Creates an ungraded record timestamped now.
    #[must_use]
    pub fn ungraded(user_id: impl Into<String>, topic: impl Into<String>, kind: RequestType) -> Self {
        Self {
            user_id: user_id.into(),
            topic: topic.into(),
            kind,
            success: None,
            difficulty: None,
            time_spent_secs: 0,
            timestamp: Utc::now(),
        }
    }
}

/// Durable storage for learning state.
#[async_trait]
pub trait LearningRepository: Send + Sync {
    /// Loads a user's context, or `None` if none was ever saved.
    async fn load_user_context(&self, user_id: &str) -> Result<Option<UserLearningContext>>;

    /// Saves a user's context, replacing any previous record.
    async fn save_user_context(&self, user_id: &str, context: &UserLearningContext) -> Result<()>;

    /// Appends an interaction to the user's history.
    async fn append_interaction(&self, user_id: &str, record: InteractionRecord) -> Result<()>;

    /// Returns the user's interactions at or after `since`, oldest first.
    async fn interaction_history(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<InteractionRecord>>;
}

/// A process-local repository. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    contexts: DashMap<String, UserLearningContext>,
    interactions: DashMap<String, Vec<InteractionRecord>>,
}

impl InMemoryRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of users with a saved context.
    #[must_use]
    pub fn saved_contexts(&self) -> usize {
        self.contexts.len()
    }
}

#[async_trait]
impl LearningRepository for InMemoryRepository {
    async fn load_user_context(&self, user_id: &str) -> Result<Option<UserLearningContext>> {
        Ok(self.contexts.get(user_id).map(|c| c.clone()))
    }

    async fn save_user_context(&self, user_id: &str, context: &UserLearningContext) -> Result<()> {
        self.contexts.insert(user_id.to_string(), context.clone());
        Ok(())
    }

    async fn append_interaction(&self, user_id: &str, record: InteractionRecord) -> Result<()> {
        self.interactions
            .entry(user_id.to_string())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn interaction_history(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<InteractionRecord>> {
        let mut history: Vec<InteractionRecord> = self
            .interactions
            .get(user_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        history.sort_by_key(|r| r.timestamp);
        Ok(history)
    }
}
