//! File-backed conversation archive.
//!
//! Storage layout: `<base_dir>/<conversation_id>/`
//! - `conversation.json` - lifecycle record
//! - `segments.jsonl` - one analyzed segment per line, append-only
//! - `summary.json` - report card, written at end of conversation
//!
//! Plain synchronous file I/O; segment files are small and append-only, so
//! the cost inside an async context is negligible.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::analysis::SegmentAnalysis;
use crate::store::{
    Conversation, ConversationStore, SegmentStore, StoreError, StoredSegment, SummaryStore,
};
use crate::summary::Summary;

const CONVERSATION_FILE: &str = "conversation.json";
const SEGMENTS_FILE: &str = "segments.jsonl";
const SUMMARY_FILE: &str = "summary.json";

pub struct JsonArchive {
    base_dir: PathBuf,
}

impl JsonArchive {
    /// Open an archive rooted at `base_dir`, creating it if needed
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn conversation_dir(&self, conversation_id: Uuid) -> PathBuf {
        self.base_dir.join(conversation_id.to_string())
    }

    fn read_conversation(&self, conversation_id: Uuid) -> Result<Conversation, StoreError> {
        let path = self.conversation_dir(conversation_id).join(CONVERSATION_FILE);
        if !path.exists() {
            return Err(StoreError::NotFound(conversation_id));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let dir = self.conversation_dir(conversation.id);
        fs::create_dir_all(&dir)?;
        let json = serde_json::to_string_pretty(conversation)?;
        fs::write(dir.join(CONVERSATION_FILE), json)?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for JsonArchive {
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
        self.write_conversation(&conversation)?;
        Ok(conversation)
    }

    async fn end(
        &self,
        conversation_id: Uuid,
        ended_at_ms: i64,
    ) -> Result<Conversation, StoreError> {
        let mut conversation = self.read_conversation(conversation_id)?;
        conversation.ended_at_ms = Some(ended_at_ms);
        conversation.duration_ms = Some(ended_at_ms - conversation.started_at_ms);
        self.write_conversation(&conversation)?;
        Ok(conversation)
    }

    async fn get(&self, conversation_id: Uuid) -> Result<Conversation, StoreError> {
        self.read_conversation(conversation_id)
    }
}

#[async_trait]
impl SegmentStore for JsonArchive {
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
        let dir = self.conversation_dir(conversation_id);
        fs::create_dir_all(&dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(SEGMENTS_FILE))?;
        let line = serde_json::to_string(&stored)?;
        writeln!(file, "{}", line)?;
        Ok(stored)
    }

    async fn list_by_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<StoredSegment>, StoreError> {
        let path = self.conversation_dir(conversation_id).join(SEGMENTS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        let mut segments = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<StoredSegment>(line) {
                Ok(segment) => segments.push(segment),
                // A torn write from a crash should not poison the whole file
                Err(e) => warn!("Skipping unreadable segment line: {}", e),
            }
        }
        segments.sort_by_key(|s| s.segment.timestamp_ms);
        Ok(segments)
    }
}

#[async_trait]
impl SummaryStore for JsonArchive {
    async fn upsert(&self, summary: &Summary) -> Result<(), StoreError> {
        let dir = self.conversation_dir(summary.conversation_id);
        fs::create_dir_all(&dir)?;
        let json = serde_json::to_string_pretty(summary)?;
        fs::write(dir.join(SUMMARY_FILE), json)?;
        Ok(())
    }

    async fn get_by_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Option<Summary>, StoreError> {
        let path = self.conversation_dir(conversation_id).join(SUMMARY_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Summary>, StoreError> {
        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let path = entry.path().join(SUMMARY_FILE);
            if !path.exists() {
                continue;
            }
            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!("Failed to read summary file: {}", e);
                    continue;
                }
            };
            match serde_json::from_str::<Summary>(&content) {
                Ok(summary) if summary.user_id == user_id => summaries.push(summary),
                Ok(_) => {}
                Err(e) => warn!("Failed to parse summary file: {}", e),
            }
        }
        summaries.sort_by_key(|s| std::cmp::Reverse(s.created_at_ms));
        Ok(summaries)
    }
}
