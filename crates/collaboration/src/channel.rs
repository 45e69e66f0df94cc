/// Client side of a shared document session.
///
/// State machine: `Disconnected -> Connecting -> Connected -> Disconnected`.
/// Remote messages are merged one at a time through `&mut self`, so a reader
/// never observes a half-applied roster or transcript.
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::{
    text_len, Backoff, ChatMessage, ChatTranscript, CollaborationError, CollaboratorUser, Cursor,
    DocumentId, PresenceUpdate, Result, Roster, Selection, SessionSnapshot, SyncMessage,
    Transport, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// What changed after merging one remote message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    ContentReplaced { by: UserId },
    RosterChanged,
    CursorMoved { user_id: UserId },
    ChatReceived,
    Disconnected,
}

pub struct PresenceChannel {
    state: ChannelState,
    document_id: Option<DocumentId>,
    local_user: Option<CollaboratorUser>,
    title: String,
    content: String,
    roster: Roster,
    chat: ChatTranscript,
    outgoing: Option<mpsc::UnboundedSender<SyncMessage>>,
    incoming: Option<mpsc::UnboundedReceiver<SyncMessage>>,
    /// Set when the link broke outside `poll`/`next_event`; reported by the next one
    lost: bool,
}

impl Default for PresenceChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceChannel {
    pub fn new() -> Self {
        Self {
            state: ChannelState::Disconnected,
            document_id: None,
            local_user: None,
            title: String::new(),
            content: String::new(),
            roster: Roster::new(),
            chat: ChatTranscript::new(),
            outgoing: None,
            incoming: None,
            lost: false,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ChannelState::Connected
    }

    pub fn document_id(&self) -> Option<&DocumentId> {
        self.document_id.as_ref()
    }

    pub fn local_user(&self) -> Option<&CollaboratorUser> {
        self.local_user
            .as_ref()
            .and_then(|local| self.roster.get(&local.id).or(Some(local)))
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn collaborators(&self) -> &[CollaboratorUser] {
        self.roster.users()
    }

    pub fn chat(&self) -> &[ChatMessage] {
        self.chat.messages()
    }

    /// Join `document_id` as `local_user`. Any previous session is closed first.
    pub async fn connect<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        document_id: DocumentId,
        local_user: CollaboratorUser,
    ) -> Result<SessionSnapshot> {
        self.disconnect();
        self.state = ChannelState::Connecting;
        info!("Connecting to shared document {}", document_id);

        let link = match transport.connect(&document_id, &local_user).await {
            Ok(link) => link,
            Err(e) => {
                self.state = ChannelState::Disconnected;
                warn!("Connection to {} failed: {}", document_id, e);
                return Err(match e {
                    CollaborationError::DocumentNotFound(_)
                    | CollaborationError::ConnectionFailed(_) => e,
                    other => CollaborationError::ConnectionFailed(other.to_string()),
                });
            }
        };

        let mut snapshot = link.snapshot;
        let mut roster = Roster::from_users(snapshot.collaborators.clone());
        if !roster.contains(&local_user.id) {
            roster.upsert(local_user.clone());
            snapshot.collaborators = roster.users().to_vec();
        }
        roster.clamp_cursors(text_len(&snapshot.content));

        self.document_id = Some(document_id);
        self.local_user = Some(local_user);
        self.title = snapshot.title.clone();
        self.content = snapshot.content.clone();
        self.roster = roster;
        self.chat = ChatTranscript::from_messages(snapshot.chat.clone());
        self.outgoing = Some(link.outgoing);
        self.incoming = Some(link.incoming);
        self.state = ChannelState::Connected;
        info!(
            "Connected to {} with {} collaborators",
            snapshot.document_id,
            self.roster.len()
        );

        Ok(snapshot)
    }

    /// `connect`, retrying `ConnectionFailed` on the backoff schedule.
    pub async fn connect_with_retry<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        document_id: DocumentId,
        local_user: CollaboratorUser,
        backoff: &Backoff,
    ) -> Result<SessionSnapshot> {
        let attempts = backoff.max_attempts.max(1);
        let mut retry = 0;
        loop {
            match self
                .connect(transport, document_id.clone(), local_user.clone())
                .await
            {
                Err(CollaborationError::ConnectionFailed(reason)) if retry + 1 < attempts => {
                    let delay = backoff.delay(retry);
                    debug!("Retrying in {:?} after: {}", delay, reason);
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                result => return result,
            }
        }
    }

    /// Send the full document content to the other collaborators.
    pub fn broadcast_edit(&mut self, content: impl Into<String>) -> Result<()> {
        let user_id = self.require_connected()?;
        self.content = content.into();
        self.roster.clamp_cursors(text_len(&self.content));
        self.send(SyncMessage::ContentUpdate {
            user_id,
            content: self.content.clone(),
        })
    }

    /// Move the local user's cursor and tell everyone else.
    pub fn update_cursor(
        &mut self,
        user_id: &UserId,
        position: usize,
        selection: Option<Selection>,
    ) -> Result<Cursor> {
        let local_id = self.require_connected()?;
        if user_id != &local_id {
            return Err(CollaborationError::Protocol(format!(
                "cannot move cursor of {}",
                user_id
            )));
        }

        let cursor = Cursor::new(position, selection).clamp_to(text_len(&self.content));
        self.roster.set_cursor(&local_id, Some(cursor));
        self.send(SyncMessage::Presence {
            update: PresenceUpdate::CursorMoved {
                user_id: local_id,
                cursor: Some(cursor),
            },
        })?;
        Ok(cursor)
    }

    /// Append to the transcript and broadcast. Blank text is ignored.
    pub fn send_chat(&mut self, message: &str) -> Result<Option<ChatMessage>> {
        let local_id = self.require_connected()?;
        let author = match self.roster.get(&local_id).or(self.local_user.as_ref()) {
            Some(author) => author.clone(),
            None => return Err(CollaborationError::NotConnected),
        };
        let Some(message) = ChatMessage::new(&author, message) else {
            return Ok(None);
        };

        self.chat.push(message.clone());
        self.send(SyncMessage::Chat {
            message: message.clone(),
        })?;
        Ok(Some(message))
    }

    /// Leave the session and release the subscription. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if let (Some(tx), Some(user)) = (self.outgoing.as_ref(), self.local_user.as_ref()) {
            let _ = tx.send(SyncMessage::Leave {
                user_id: user.id.clone(),
            });
        }
        if self.state != ChannelState::Disconnected {
            if let Some(id) = &self.document_id {
                info!("Disconnected from shared document {}", id);
            }
        }
        self.release();
    }

    /// Merge every message that has already arrived.
    pub fn poll(&mut self) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        loop {
            let received = match self.incoming.as_mut() {
                Some(rx) => rx.try_recv(),
                None => break,
            };
            match received {
                Ok(msg) => events.extend(self.apply(msg)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.lost_connection();
                    break;
                }
            }
        }
        events.extend(self.take_lost());
        events
    }

    /// Wait for the next remote change. `None` once disconnected.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            let Some(rx) = self.incoming.as_mut() else {
                return self.take_lost();
            };
            match rx.recv().await {
                Some(msg) => {
                    if let Some(event) = self.apply(msg) {
                        return Some(event);
                    }
                }
                None => self.lost_connection(),
            }
        }
    }

    /// Merge one remote message into the session state.
    pub fn apply(&mut self, msg: SyncMessage) -> Option<ChannelEvent> {
        let local_id = self.local_user.as_ref().map(|u| u.id.clone());
        match msg {
            SyncMessage::ContentUpdate { user_id, content } => {
                self.content = content;
                self.roster.clamp_cursors(text_len(&self.content));
                Some(ChannelEvent::ContentReplaced { by: user_id })
            }

            SyncMessage::Presence { update } => match update {
                PresenceUpdate::UserJoined { mut user } => {
                    user.cursor = user.cursor.map(|c| c.clamp_to(text_len(&self.content)));
                    self.roster.upsert(user);
                    Some(ChannelEvent::RosterChanged)
                }
                PresenceUpdate::UserLeft { user_id } => {
                    if Some(&user_id) == local_id.as_ref() {
                        return None;
                    }
                    self.roster.remove(&user_id)?;
                    Some(ChannelEvent::RosterChanged)
                }
                PresenceUpdate::CursorMoved { user_id, cursor } => {
                    if Some(&user_id) == local_id.as_ref() {
                        return None;
                    }
                    let cursor = cursor.map(|c| c.clamp_to(text_len(&self.content)));
                    if !self.roster.set_cursor(&user_id, cursor) {
                        debug!("Cursor update for unknown user {}", user_id);
                        return None;
                    }
                    Some(ChannelEvent::CursorMoved { user_id })
                }
            },

            SyncMessage::Chat { message } => {
                self.chat.push(message);
                Some(ChannelEvent::ChatReceived)
            }

            SyncMessage::Ping => {
                let _ = self.send(SyncMessage::Pong);
                None
            }

            SyncMessage::Pong => None,

            SyncMessage::Error { code, message } => {
                warn!("Shared document error ({:?}): {}", code, message);
                None
            }

            other => {
                debug!("Ignoring {:?}", other);
                None
            }
        }
    }

    fn require_connected(&self) -> Result<UserId> {
        match (&self.state, &self.local_user) {
            (ChannelState::Connected, Some(user)) => Ok(user.id.clone()),
            _ => Err(CollaborationError::NotConnected),
        }
    }

    fn send(&mut self, msg: SyncMessage) -> Result<()> {
        let tx = self.outgoing.as_ref().ok_or(CollaborationError::NotConnected)?;
        if let Err(e) = tx.send(msg) {
            self.lost_connection();
            return Err(CollaborationError::NetworkError(e.to_string()));
        }
        Ok(())
    }

    fn lost_connection(&mut self) {
        warn!("Lost connection to shared document");
        self.release();
        self.lost = true;
    }

    fn take_lost(&mut self) -> Option<ChannelEvent> {
        std::mem::take(&mut self.lost).then_some(ChannelEvent::Disconnected)
    }

    fn release(&mut self) {
        self.outgoing = None;
        self.incoming = None;
        self.lost = false;
        self.state = ChannelState::Disconnected;
        self.document_id = None;
        self.local_user = None;
        self.title.clear();
        self.content.clear();
        self.roster.clear();
        self.chat.clear();
    }
}

impl Drop for PresenceChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Hub, Link};

    struct Unreachable;

    #[async_trait::async_trait]
    impl Transport for Unreachable {
        async fn publish(&self, _: &DocumentId, _: &str, _: &str) -> Result<()> {
            Err(CollaborationError::ConnectionFailed("offline".to_string()))
        }

        async fn connect(&self, _: &DocumentId, _: &CollaboratorUser) -> Result<Link> {
            Err(CollaborationError::ConnectionFailed("offline".to_string()))
        }
    }

    /// Hands out links whose outgoing side is already closed.
    #[derive(Default)]
    struct ClosedLink {
        hosts: std::sync::Mutex<Vec<mpsc::UnboundedSender<SyncMessage>>>,
    }

    #[async_trait::async_trait]
    impl Transport for ClosedLink {
        async fn publish(&self, _: &DocumentId, _: &str, _: &str) -> Result<()> {
            Ok(())
        }

        async fn connect(&self, document_id: &DocumentId, _: &CollaboratorUser) -> Result<Link> {
            let (outgoing, _) = mpsc::unbounded_channel();
            let (host, incoming) = mpsc::unbounded_channel();
            self.hosts.lock().unwrap().push(host);
            Ok(Link {
                snapshot: SessionSnapshot {
                    document_id: document_id.clone(),
                    title: "Doc".to_string(),
                    content: "shared".to_string(),
                    collaborators: Vec::new(),
                    chat: Vec::new(),
                },
                outgoing,
                incoming,
            })
        }
    }

    fn alice() -> CollaboratorUser {
        CollaboratorUser::new(UserId::from("alice"), "Alice")
    }

    fn bob() -> CollaboratorUser {
        CollaboratorUser::new(UserId::from("bob"), "Bob")
    }

    async fn shared_hub() -> (Hub, DocumentId) {
        let hub = Hub::new();
        let id = DocumentId::from("doc");
        hub.host(id.clone(), "Plan".to_string(), "0123456789".to_string())
            .await;
        (hub, id)
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_disconnected() {
        let mut channel = PresenceChannel::new();
        let err = channel
            .connect(&Unreachable, DocumentId::from("x"), alice())
            .await
            .unwrap_err();
        assert!(matches!(err, CollaborationError::ConnectionFailed(_)));
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_unknown_document() {
        let hub = Hub::new();
        let mut channel = PresenceChannel::new();
        let err = channel
            .connect(&hub, DocumentId::from("missing"), alice())
            .await
            .unwrap_err();
        assert!(matches!(err, CollaborationError::DocumentNotFound(_)));
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_attempts() {
        let mut channel = PresenceChannel::new();
        let backoff = Backoff::new(
            std::time::Duration::from_millis(10),
            2,
            std::time::Duration::from_millis(40),
            3,
        );
        let err = channel
            .connect_with_retry(&Unreachable, DocumentId::from("x"), alice(), &backoff)
            .await
            .unwrap_err();
        assert!(matches!(err, CollaborationError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_snapshot_includes_local_user() {
        let (hub, id) = shared_hub().await;
        let mut channel = PresenceChannel::new();
        let snapshot = channel.connect(&hub, id.clone(), alice()).await.unwrap();

        assert_eq!(channel.state(), ChannelState::Connected);
        assert_eq!(snapshot.content, "0123456789");
        assert!(snapshot.collaborators.iter().any(|u| u.id == alice().id));
        assert_eq!(channel.document_id(), Some(&id));
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let mut channel = PresenceChannel::new();
        assert!(matches!(
            channel.broadcast_edit("x"),
            Err(CollaborationError::NotConnected)
        ));
        assert!(matches!(
            channel.update_cursor(&alice().id, 0, None),
            Err(CollaborationError::NotConnected)
        ));
        assert!(matches!(
            channel.send_chat("hi"),
            Err(CollaborationError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_blank_chat_is_silently_ignored() {
        let (hub, id) = shared_hub().await;
        let mut channel = PresenceChannel::new();
        channel.connect(&hub, id, alice()).await.unwrap();

        assert_eq!(channel.send_chat("   ").unwrap(), None);
        assert!(channel.chat().is_empty());

        let sent = channel.send_chat("hello").unwrap().unwrap();
        assert_eq!(sent.user_name, "Alice");
        assert_eq!(channel.chat().len(), 1);
    }

    #[tokio::test]
    async fn test_local_cursor_is_clamped() {
        let (hub, id) = shared_hub().await;
        let mut channel = PresenceChannel::new();
        channel.connect(&hub, id, alice()).await.unwrap();

        let cursor = channel
            .update_cursor(&alice().id, 99, Some(Selection::new(4, 99)))
            .unwrap();
        assert_eq!(cursor.position, 10);
        assert_eq!(cursor.selection, Some(Selection::new(4, 10)));

        assert!(matches!(
            channel.update_cursor(&bob().id, 0, None),
            Err(CollaborationError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_remote_events_are_merged() {
        let (hub, id) = shared_hub().await;
        let mut a = PresenceChannel::new();
        let mut b = PresenceChannel::new();
        a.connect(&hub, id.clone(), alice()).await.unwrap();
        b.connect(&hub, id.clone(), bob()).await.unwrap();

        assert_eq!(a.next_event().await, Some(ChannelEvent::RosterChanged));
        assert_eq!(a.collaborators().len(), 2);

        b.broadcast_edit("abc").unwrap();
        assert_eq!(
            a.next_event().await,
            Some(ChannelEvent::ContentReplaced { by: bob().id })
        );
        assert_eq!(a.content(), "abc");

        b.update_cursor(&bob().id, 2, None).unwrap();
        assert_eq!(
            a.next_event().await,
            Some(ChannelEvent::CursorMoved { user_id: bob().id })
        );
        let remote = a
            .collaborators()
            .iter()
            .find(|u| u.id == bob().id)
            .unwrap();
        assert_eq!(remote.cursor.unwrap().position, 2);

        b.send_chat("hey").unwrap();
        assert_eq!(a.next_event().await, Some(ChannelEvent::ChatReceived));
        assert_eq!(a.chat()[0].message, "hey");

        b.disconnect();
        assert_eq!(a.next_event().await, Some(ChannelEvent::RosterChanged));
        assert_eq!(a.collaborators().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (hub, id) = shared_hub().await;
        let mut channel = PresenceChannel::new();
        channel.connect(&hub, id, alice()).await.unwrap();

        channel.disconnect();
        channel.disconnect();
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert!(channel.collaborators().is_empty());
        assert!(channel.poll().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_clears_session_data() {
        let (hub, id) = shared_hub().await;
        let mut channel = PresenceChannel::new();
        channel.connect(&hub, id, alice()).await.unwrap();
        channel.send_chat("hi").unwrap();

        channel.disconnect();
        assert!(channel.local_user().is_none());
        assert!(channel.document_id().is_none());
        assert_eq!(channel.title(), "");
        assert_eq!(channel.content(), "");
        assert!(channel.chat().is_empty());
    }

    #[tokio::test]
    async fn test_rejoining_same_document_keeps_membership() {
        let (hub, id) = shared_hub().await;
        let mut channel = PresenceChannel::new();
        channel.connect(&hub, id.clone(), alice()).await.unwrap();
        channel.connect(&hub, id.clone(), alice()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(hub.document_info(&id).await.unwrap().user_count, 1);
        assert!(channel.poll().is_empty());
        assert_eq!(channel.state(), ChannelState::Connected);

        channel.broadcast_edit("still here").unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(hub.document_info(&id).await.unwrap().content_len, 10);
    }

    #[tokio::test]
    async fn test_failed_send_reports_disconnect_once() {
        let mut channel = PresenceChannel::new();
        channel
            .connect(&ClosedLink::default(), DocumentId::from("doc"), alice())
            .await
            .unwrap();

        let result = channel.broadcast_edit("changed");
        assert!(matches!(result, Err(CollaborationError::NetworkError(_))));
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert_eq!(channel.content(), "");

        assert_eq!(channel.poll(), vec![ChannelEvent::Disconnected]);
        assert!(channel.poll().is_empty());
        assert_eq!(channel.next_event().await, None);
    }

    #[tokio::test]
    async fn test_failed_send_wakes_next_event() {
        let mut channel = PresenceChannel::new();
        channel
            .connect(&ClosedLink::default(), DocumentId::from("doc"), alice())
            .await
            .unwrap();

        assert!(channel.send_chat("hello").is_err());
        assert_eq!(channel.next_event().await, Some(ChannelEvent::Disconnected));
    }

    #[tokio::test]
    async fn test_apply_ignores_echo_of_local_cursor() {
        let (hub, id) = shared_hub().await;
        let mut channel = PresenceChannel::new();
        channel.connect(&hub, id, alice()).await.unwrap();

        let echo = SyncMessage::Presence {
            update: PresenceUpdate::CursorMoved {
                user_id: alice().id,
                cursor: Some(Cursor::new(1, None)),
            },
        };
        assert_eq!(channel.apply(echo), None);
    }
}
