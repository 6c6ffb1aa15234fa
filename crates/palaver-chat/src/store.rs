//! Conversation record persistence.
//!
//! The durable store lives behind the backend; this crate only writes the
//! conversation row opportunistically (first message, archival) through a
//! trait. Failures are logged and never fail a turn.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use palaver_core::types::{ConversationId, ConversationRecord, ConversationStatus};

use crate::error::ChatError;

/// Read/write access to the persisted conversation record.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert or replace the record for a conversation.
    async fn upsert(&self, record: ConversationRecord) -> Result<(), ChatError>;
    /// Mark a conversation abandoned.
    async fn archive(&self, conversation_id: ConversationId) -> Result<(), ChatError>;
    /// Fetch a record, if present.
    async fn get(&self, conversation_id: ConversationId)
        -> Result<Option<ConversationRecord>, ChatError>;
}

/// In-memory store for tests and in-process hosts.
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    records: Mutex<HashMap<ConversationId, ConversationRecord>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn upsert(&self, record: ConversationRecord) -> Result<(), ChatError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| ChatError::Storage(format!("record lock poisoned: {}", e)))?;
        records.insert(record.conversation_id, record);
        Ok(())
    }

    async fn archive(&self, conversation_id: ConversationId) -> Result<(), ChatError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| ChatError::Storage(format!("record lock poisoned: {}", e)))?;
        if let Some(record) = records.get_mut(&conversation_id) {
            record.status = ConversationStatus::Abandoned;
        }
        Ok(())
    }

    async fn get(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<ConversationRecord>, ChatError> {
        let records = self
            .records
            .lock()
            .map_err(|e| ChatError::Storage(format!("record lock poisoned: {}", e)))?;
        Ok(records.get(&conversation_id).cloned())
    }
}

/// Derive a conversation title from the first user message.
pub fn derive_title(text: &str) -> String {
    const MAX_WORDS: usize = 6;
    const MAX_CHARS: usize = 48;

    let mut title: String = text
        .split_whitespace()
        .take(MAX_WORDS)
        .collect::<Vec<_>>()
        .join(" ");
    let truncated_words = text.split_whitespace().count() > MAX_WORDS;

    if title.chars().count() > MAX_CHARS {
        title = title.chars().take(MAX_CHARS).collect::<String>().trim_end().to_string();
        title.push('\u{2026}');
    } else if truncated_words {
        title.push('\u{2026}');
    }

    if title.is_empty() {
        "New conversation".to_string()
    } else {
        title
    }
}

/// Build the record written on a conversation's first successful message.
pub fn initial_record(
    conversation_id: ConversationId,
    agent_id: impl Into<String>,
    user_id: impl Into<String>,
    first_message: &str,
    now: DateTime<Utc>,
) -> ConversationRecord {
    ConversationRecord {
        conversation_id,
        agent_id: agent_id.into(),
        user_id: user_id.into(),
        title: derive_title(first_message),
        status: ConversationStatus::Active,
        last_active: now,
    }
}

// =============================================================================
// Tests
// =============================================================================
