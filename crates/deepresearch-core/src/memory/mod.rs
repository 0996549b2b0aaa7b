use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::MemorySettings;

#[cfg(feature = "aws")]
mod agentcore;

#[cfg(feature = "aws")]
pub use agentcore::AgentCoreMemory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Conversation history keyed by memory id, actor and session.
#[async_trait]
pub trait ConversationMemory: Send + Sync {
    async fn append(&self, key: &MemoryKey, turns: Vec<ConversationTurn>) -> anyhow::Result<()>;

    async fn recent(&self, key: &MemoryKey, limit: usize) -> anyhow::Result<Vec<ConversationTurn>>;
}

pub type DynConversationMemory = Arc<dyn ConversationMemory>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryKey {
    pub memory_id: String,
    pub actor_id: String,
    pub session_id: String,
}

/// Process-local memory store for development runs and tests.
#[derive(Default)]
pub struct InMemoryConversationMemory {
    store: DashMap<MemoryKey, Vec<ConversationTurn>>,
}

impl InMemoryConversationMemory {
    pub fn new() -> Self {
        Self {
            store: DashMap::new(),
        }
    }
}

#[async_trait]
impl ConversationMemory for InMemoryConversationMemory {
    async fn append(&self, key: &MemoryKey, turns: Vec<ConversationTurn>) -> anyhow::Result<()> {
        self.store.entry(key.clone()).or_default().extend(turns);
        Ok(())
    }

    async fn recent(&self, key: &MemoryKey, limit: usize) -> anyhow::Result<Vec<ConversationTurn>> {
        let turns = self
            .store
            .get(key)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        let skip = turns.len().saturating_sub(limit);
        Ok(turns.into_iter().skip(skip).collect())
    }
}

/// Pick the conversation store for `settings`.
///
/// Enabled memory with a memory id uses AgentCore Memory when built with the
/// `aws` feature; every other case gets a process-local store.
pub async fn memory_backend(settings: &MemorySettings) -> DynConversationMemory {
    if settings.enabled && settings.memory_id.is_some() {
        if let Some(managed) = managed_backend(settings).await {
            return managed;
        }
        info!("conversation memory is process-local; history does not survive restarts");
    }
    Arc::new(InMemoryConversationMemory::new())
}

#[cfg(feature = "aws")]
async fn managed_backend(settings: &MemorySettings) -> Option<DynConversationMemory> {
    info!(region = ?settings.region, "using AgentCore memory");
    Some(Arc::new(AgentCoreMemory::new(settings.region.clone()).await))
}

#[cfg(not(feature = "aws"))]
async fn managed_backend(_settings: &MemorySettings) -> Option<DynConversationMemory> {
    None
}
