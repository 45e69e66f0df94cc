/// Shared-document presence, chat and content relay
/// Roster and transcript bookkeeping, the sync wire protocol, and transports
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod presence;
pub use presence::*;

mod chat;
pub use chat::*;

mod sync;
pub use sync::*;

mod transport;
pub use transport::*;

mod hub;
pub use hub::*;

mod ws;
pub use ws::*;

mod channel;
pub use channel::*;

mod backoff;
pub use backoff::*;

#[derive(Debug, Error)]
pub enum CollaborationError {
    #[error("shared document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("channel is not connected")]
    NotConnected,

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, CollaborationError>;

/// Collaborator identifier, stable per local profile
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of a shared document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Length of `text` in characters, the unit of cursor offsets.
pub(crate) fn text_len(text: &str) -> usize {
    text.chars().count()
}
