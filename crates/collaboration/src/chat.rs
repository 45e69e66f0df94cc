use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CollaboratorUser, UserId};

/// One chat line. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user_id: UserId,
    pub user_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Returns `None` for empty or whitespace-only text.
    pub fn new(author: &CollaboratorUser, message: impl Into<String>) -> Option<Self> {
        let message = message.into();
        if message.trim().is_empty() {
            return None;
        }
        Some(Self {
            user_id: author.id.clone(),
            user_name: author.name.clone(),
            message,
            timestamp: Utc::now(),
        })
    }
}

/// Append-only transcript kept in timestamp order
#[derive(Debug, Clone, Default)]
pub struct ChatTranscript {
    messages: Vec<ChatMessage>,
}

impl ChatTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        let mut transcript = Self::new();
        for message in messages {
            transcript.push(message);
        }
        transcript
    }

    /// Insert after every message with an equal or earlier timestamp, so late
    /// arrivals land in order and ties keep arrival order.
    pub fn push(&mut self, message: ChatMessage) {
        let idx = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(idx, message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
