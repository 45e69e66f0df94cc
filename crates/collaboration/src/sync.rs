/// Messages exchanged between a client and the shared-document host
use serde::{Deserialize, Serialize};

use crate::{ChatMessage, CollaboratorUser, DocumentId, PresenceUpdate, UserId};

/// State handed to a client when it joins a shared document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub document_id: DocumentId,
    pub title: String,
    pub content: String,
    pub collaborators: Vec<CollaboratorUser>,
    pub chat: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    BadRequest,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncMessage {
    // Document hosting
    #[serde(rename = "publish")]
    Publish {
        document_id: DocumentId,
        title: String,
        content: String,
    },

    #[serde(rename = "published")]
    Published { document_id: DocumentId },

    // Connection management
    #[serde(rename = "connect")]
    Connect {
        document_id: DocumentId,
        user: CollaboratorUser,
    },

    #[serde(rename = "connected")]
    Connected { snapshot: SessionSnapshot },

    #[serde(rename = "leave")]
    Leave { user_id: UserId },

    // Full-content replacement, last write wins
    #[serde(rename = "content_update")]
    ContentUpdate { user_id: UserId, content: String },

    #[serde(rename = "presence")]
    Presence { update: PresenceUpdate },

    #[serde(rename = "chat")]
    Chat { message: ChatMessage },

    #[serde(rename = "error")]
    Error { code: ErrorCode, message: String },

    // Heartbeat
    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "pong")]
    Pong,
}

impl SyncMessage {
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self)
            .map_err(|e| crate::CollaborationError::SerializationError(e.to_string()))
    }

    pub fn from_json(text: &str) -> crate::Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| crate::CollaborationError::SerializationError(e.to_string()))
    }
}
