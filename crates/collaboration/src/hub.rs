/// In-process host for shared documents
/// Holds each document's content, roster and transcript and fans messages out to peers
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::{
    text_len, ChatTranscript, CollaborationError, CollaboratorUser, DocumentId, ErrorCode, Link,
    PresenceUpdate, Result, Roster, SessionSnapshot, SyncMessage, Transport, UserId,
};

/// Registration handed back by `Hub::join`
pub struct Joined {
    pub snapshot: SessionSnapshot,
    pub incoming: mpsc::UnboundedReceiver<SyncMessage>,
    /// Identifies this connection when the same user joins twice
    pub token: u64,
}

/// Summary of a hosted document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub title: String,
    pub user_count: usize,
    pub message_count: usize,
    pub content_len: usize,
}

/// How often an in-process link refreshes its peer's liveness
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Hub {
    documents: Arc<RwLock<HashMap<DocumentId, HostedDocument>>>,
    next_token: Arc<AtomicU64>,
    heartbeat: Duration,
}

impl Default for Hub {
    fn default() -> Self {
        Self {
            documents: Arc::default(),
            next_token: Arc::default(),
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }
}

struct HostedDocument {
    id: DocumentId,
    title: String,
    content: String,
    roster: Roster,
    chat: ChatTranscript,
    peers: HashMap<UserId, Peer>,
}

struct Peer {
    tx: mpsc::UnboundedSender<SyncMessage>,
    token: u64,
    last_seen: DateTime<Utc>,
}

impl HostedDocument {
    fn new(id: DocumentId, title: String, content: String) -> Self {
        Self {
            id,
            title,
            content,
            roster: Roster::new(),
            chat: ChatTranscript::new(),
            peers: HashMap::new(),
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            document_id: self.id.clone(),
            title: self.title.clone(),
            content: self.content.clone(),
            collaborators: self.roster.users().to_vec(),
            chat: self.chat.messages().to_vec(),
        }
    }

    fn broadcast(&self, msg: &SyncMessage, exclude_user: Option<&UserId>) {
        for (user_id, peer) in &self.peers {
            if exclude_user == Some(user_id) {
                continue;
            }
            if peer.tx.send(msg.clone()).is_err() {
                debug!("Peer {} channel closed", user_id);
            }
        }
    }

    fn send_to(&self, user_id: &UserId, msg: SyncMessage) {
        if let Some(peer) = self.peers.get(user_id) {
            let _ = peer.tx.send(msg);
        }
    }

    fn remove_peer(&mut self, user_id: &UserId) {
        self.peers.remove(user_id);
        if self.roster.remove(user_id).is_some() {
            let msg = SyncMessage::Presence {
                update: PresenceUpdate::UserLeft {
                    user_id: user_id.clone(),
                },
            };
            self.broadcast(&msg, None);
        }
    }
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interval at which links opened through `Transport::connect` report liveness.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval.max(Duration::from_millis(1));
        self
    }

    pub async fn host(&self, document_id: DocumentId, title: String, content: String) {
        let mut documents = self.documents.write().await;
        if documents.contains_key(&document_id) {
            debug!("Document {} already hosted", document_id);
            return;
        }
        info!("Hosting document {} ({})", document_id, title);
        documents.insert(
            document_id.clone(),
            HostedDocument::new(document_id, title, content),
        );
    }

    pub async fn contains(&self, document_id: &DocumentId) -> bool {
        self.documents.read().await.contains_key(document_id)
    }

    /// Register `user` as a peer of a document and notify everyone else.
    pub async fn join(&self, document_id: &DocumentId, user: CollaboratorUser) -> Result<Joined> {
        let mut documents = self.documents.write().await;
        let doc = documents
            .get_mut(document_id)
            .ok_or_else(|| CollaborationError::DocumentNotFound(document_id.clone()))?;

        let (tx, incoming) = mpsc::unbounded_channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        let mut user = user;
        user.cursor = user.cursor.map(|c| c.clamp_to(text_len(&doc.content)));
        doc.roster.upsert(user.clone());
        doc.peers.insert(
            user.id.clone(),
            Peer {
                tx,
                token,
                last_seen: Utc::now(),
            },
        );

        let join_msg = SyncMessage::Presence {
            update: PresenceUpdate::UserJoined { user: user.clone() },
        };
        doc.broadcast(&join_msg, Some(&user.id));

        info!("User {} joined document {}", user.name, document_id);
        Ok(Joined {
            snapshot: doc.snapshot(),
            incoming,
            token,
        })
    }

    /// Apply a message from connection `token` of `from` and relay it to the other peers.
    ///
    /// Messages from a connection that has since been replaced by a newer join are
    /// rejected, and a late `Leave` from one is ignored.
    pub async fn handle(
        &self,
        document_id: &DocumentId,
        from: &UserId,
        token: u64,
        message: SyncMessage,
    ) -> Result<()> {
        let mut documents = self.documents.write().await;
        let doc = documents
            .get_mut(document_id)
            .ok_or_else(|| CollaborationError::DocumentNotFound(document_id.clone()))?;

        match doc.peers.get_mut(from) {
            Some(peer) if peer.token == token => peer.last_seen = Utc::now(),
            Some(_) if matches!(message, SyncMessage::Leave { .. }) => {
                debug!("Ignoring leave from replaced connection of {}", from);
                return Ok(());
            }
            Some(_) => {
                return Err(CollaborationError::Protocol(format!(
                    "connection of {} to {} was replaced",
                    from, document_id
                )))
            }
            None => {
                return Err(CollaborationError::Protocol(format!(
                    "{} is not a peer of {}",
                    from, document_id
                )))
            }
        }

        match message {
            SyncMessage::ContentUpdate { content, .. } => {
                doc.content = content;
                let len = text_len(&doc.content);
                doc.roster.clamp_cursors(len);
                let msg = SyncMessage::ContentUpdate {
                    user_id: from.clone(),
                    content: doc.content.clone(),
                };
                doc.broadcast(&msg, Some(from));
            }

            SyncMessage::Presence {
                update: PresenceUpdate::CursorMoved { user_id, cursor },
            } => {
                if &user_id != from {
                    return Err(CollaborationError::Protocol(
                        "cursor update for another user".to_string(),
                    ));
                }
                let cursor = cursor.map(|c| c.clamp_to(text_len(&doc.content)));
                doc.roster.set_cursor(from, cursor);
                let msg = SyncMessage::Presence {
                    update: PresenceUpdate::CursorMoved { user_id, cursor },
                };
                doc.broadcast(&msg, Some(from));
            }

            SyncMessage::Chat { message } => {
                if &message.user_id != from || message.message.trim().is_empty() {
                    return Err(CollaborationError::Protocol(
                        "rejected chat message".to_string(),
                    ));
                }
                doc.chat.push(message.clone());
                doc.broadcast(&SyncMessage::Chat { message }, Some(from));
            }

            SyncMessage::Leave { .. } => {
                info!("User {} left document {}", from, document_id);
                doc.remove_peer(from);
            }

            SyncMessage::Ping => doc.send_to(from, SyncMessage::Pong),

            SyncMessage::Pong => {}

            other => {
                warn!("Unexpected message from {}: {:?}", from, other);
                doc.send_to(
                    from,
                    SyncMessage::Error {
                        code: ErrorCode::BadRequest,
                        message: "unexpected message".to_string(),
                    },
                );
            }
        }

        Ok(())
    }

    /// Drop a peer's registration. With a token, only that connection is dropped.
    pub async fn leave(&self, document_id: &DocumentId, user_id: &UserId, token: Option<u64>) {
        let mut documents = self.documents.write().await;
        if let Some(doc) = documents.get_mut(document_id) {
            let matches = doc
                .peers
                .get(user_id)
                .map(|peer| token.map_or(true, |t| t == peer.token))
                .unwrap_or(false);
            if matches {
                info!("User {} disconnected from document {}", user_id, document_id);
                doc.remove_peer(user_id);
            }
        }
    }

    /// Refresh the liveness of connection `token` without relaying anything.
    pub async fn touch(&self, document_id: &DocumentId, user_id: &UserId, token: u64) {
        let mut documents = self.documents.write().await;
        if let Some(peer) = documents
            .get_mut(document_id)
            .and_then(|doc| doc.peers.get_mut(user_id))
            .filter(|peer| peer.token == token)
        {
            peer.last_seen = Utc::now();
        }
    }

    /// Remove peers silent for longer than `max_idle`. Returns how many were dropped.
    pub async fn evict_idle(&self, max_idle: chrono::Duration) -> usize {
        let now = Utc::now();
        let mut evicted = 0;
        let mut documents = self.documents.write().await;
        for doc in documents.values_mut() {
            let idle: Vec<UserId> = doc
                .peers
                .iter()
                .filter(|(_, peer)| now - peer.last_seen > max_idle)
                .map(|(user_id, _)| user_id.clone())
                .collect();
            for user_id in idle {
                info!("Evicting idle user {} from {}", user_id, doc.id);
                doc.remove_peer(&user_id);
                evicted += 1;
            }
        }
        evicted
    }

    pub async fn document_info(&self, document_id: &DocumentId) -> Option<DocumentInfo> {
        let documents = self.documents.read().await;
        documents.get(document_id).map(|doc| DocumentInfo {
            id: doc.id.clone(),
            title: doc.title.clone(),
            user_count: doc.roster.len(),
            message_count: doc.chat.len(),
            content_len: text_len(&doc.content),
        })
    }

    pub async fn list_documents(&self) -> Vec<DocumentInfo> {
        let ids: Vec<DocumentId> = self.documents.read().await.keys().cloned().collect();
        let mut infos = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(info) = self.document_info(&id).await {
                infos.push(info);
            }
        }
        infos
    }
}

#[async_trait::async_trait]
impl Transport for Hub {
    async fn publish(&self, document_id: &DocumentId, title: &str, content: &str) -> Result<()> {
        self.host(document_id.clone(), title.to_string(), content.to_string())
            .await;
        Ok(())
    }

    async fn connect(&self, document_id: &DocumentId, user: &CollaboratorUser) -> Result<Link> {
        let joined = self.join(document_id, user.clone()).await?;
        let (outgoing, mut rx) = mpsc::unbounded_channel::<SyncMessage>();

        let hub = self.clone();
        let document_id = document_id.clone();
        let user_id = user.id.clone();
        let token = joined.token;
        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(hub.heartbeat);
            heartbeat.tick().await;
            loop {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(msg) => {
                            if let Err(e) = hub.handle(&document_id, &user_id, token, msg).await {
                                warn!("Dropping message from {}: {}", user_id, e);
                            }
                        }
                        None => break,
                    },
                    _ = heartbeat.tick() => hub.touch(&document_id, &user_id, token).await,
                }
            }
            hub.leave(&document_id, &user_id, Some(token)).await;
        });

        Ok(Link {
            snapshot: joined.snapshot,
            outgoing,
            incoming: joined.incoming,
        })
    }
}
