//! Conversation persistence.
//!
//! Trait seams for the three record kinds the engine persists, plus an
//! in-memory implementation used for embedding and tests. The file-backed
//! implementation lives in `archive`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::analysis::SegmentAnalysis;
use crate::summary::Summary;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    NotFound(Uuid),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// One conversation's lifecycle record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: String,
    pub title: Option<String>,
    pub started_at_ms: i64,
    pub ended_at_ms: Option<i64>,
    pub duration_ms: Option<i64>,
}

/// A segment as persisted, keyed to its conversation and owner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSegment {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub user_id: String,
    #[serde(flatten)]
    pub segment: SegmentAnalysis,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create(
        &self,
        user_id: &str,
        title: Option<String>,
        started_at_ms: i64,
    ) -> Result<Conversation, StoreError>;

    /// Mark a conversation ended and record its duration
    async fn end(&self, conversation_id: Uuid, ended_at_ms: i64)
        -> Result<Conversation, StoreError>;

    async fn get(&self, conversation_id: Uuid) -> Result<Conversation, StoreError>;
}

#[async_trait]
pub trait SegmentStore: Send + Sync {
    async fn append(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        segment: &SegmentAnalysis,
    ) -> Result<StoredSegment, StoreError>;

    /// All segments of a conversation, ordered by capture timestamp
    async fn list_by_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<StoredSegment>, StoreError>;
}

#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Insert or replace, keyed by conversation id
    async fn upsert(&self, summary: &Summary) -> Result<(), StoreError>;

    async fn get_by_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Option<Summary>, StoreError>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Summary>, StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    conversations: HashMap<Uuid, Conversation>,
    segments: HashMap<Uuid, Vec<StoredSegment>>,
    summaries: HashMap<Uuid, Summary>,
}

/// In-memory store, suitable for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create(
        &self,
        user_id: &str,
        title: Option<String>,
        started_at_ms: i64,
    ) -> Result<Conversation, StoreError> {
        let conversation = Conversation {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            title,
            started_at_ms,
            ended_at_ms: None,
            duration_ms: None,
        };
        let mut inner = self.inner.lock().await;
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn end(
        &self,
        conversation_id: Uuid,
        ended_at_ms: i64,
    ) -> Result<Conversation, StoreError> {
        let mut inner = self.inner.lock().await;
        let conversation = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(StoreError::NotFound(conversation_id))?;
        conversation.ended_at_ms = Some(ended_at_ms);
        conversation.duration_ms = Some(ended_at_ms - conversation.started_at_ms);
        Ok(conversation.clone())
    }

    async fn get(&self, conversation_id: Uuid) -> Result<Conversation, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .conversations
            .get(&conversation_id)
            .cloned()
            .ok_or(StoreError::NotFound(conversation_id))
    }
}

#[async_trait]
impl SegmentStore for MemoryStore {
    async fn append(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        segment: &SegmentAnalysis,
    ) -> Result<StoredSegment, StoreError> {
        let stored = StoredSegment {
            id: Uuid::new_v4(),
            conversation_id,
            user_id: user_id.to_string(),
            segment: segment.clone(),
        };
        let mut inner = self.inner.lock().await;
        inner
            .segments
            .entry(conversation_id)
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn list_by_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<StoredSegment>, StoreError> {
        let inner = self.inner.lock().await;
        let mut segments = inner
            .segments
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default();
        segments.sort_by_key(|s| s.segment.timestamp_ms);
        Ok(segments)
    }
}

#[async_trait]
impl SummaryStore for MemoryStore {
    async fn upsert(&self, summary: &Summary) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .summaries
            .insert(summary.conversation_id, summary.clone());
        Ok(())
    }

    async fn get_by_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Option<Summary>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.summaries.get(&conversation_id).cloned())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Summary>, StoreError> {
        let inner = self.inner.lock().await;
        let mut summaries: Vec<Summary> = inner
            .summaries
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        summaries.sort_by_key(|s| std::cmp::Reverse(s.created_at_ms));
        Ok(summaries)
    }
}
