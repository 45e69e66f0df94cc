use tokio::sync::mpsc;

use crate::{CollaboratorUser, DocumentId, Result, SessionSnapshot, SyncMessage};

/// Live connection to one shared document.
///
/// Dropping `outgoing` tells the host the client is gone; `incoming` closes
/// when the host drops the client.
pub struct Link {
    pub snapshot: SessionSnapshot,
    pub outgoing: mpsc::UnboundedSender<SyncMessage>,
    pub incoming: mpsc::UnboundedReceiver<SyncMessage>,
}

/// Something that can host shared documents for this client
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Make a document available for others to join. Publishing an id that
    /// already exists leaves the hosted copy untouched.
    async fn publish(&self, document_id: &DocumentId, title: &str, content: &str) -> Result<()>;

    /// Join a shared document. Fails with `DocumentNotFound` for unknown ids
    /// and `ConnectionFailed` when the host cannot be reached.
    async fn connect(&self, document_id: &DocumentId, user: &CollaboratorUser) -> Result<Link>;
}
