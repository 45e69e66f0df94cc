/// End-to-end controller scenarios over in-memory storage and the in-process hub
use collaboration::{
    ChannelEvent, ChannelState, CollaborationError, CollaboratorUser, DocumentId, Hub, Link,
    SessionSnapshot, SyncMessage, Transport,
};
use notes::{LocalIdentity, MemoryStorage, Preferences, Theme};
use session::*;
use std::time::Duration;

struct RefusingTransport;

#[async_trait::async_trait]
impl Transport for RefusingTransport {
    async fn publish(&self, _: &DocumentId, _: &str, _: &str) -> collaboration::Result<()> {
        Err(CollaborationError::ConnectionFailed("refused".to_string()))
    }

    async fn connect(
        &self,
        _: &DocumentId,
        _: &CollaboratorUser,
    ) -> collaboration::Result<Link> {
        Err(CollaborationError::ConnectionFailed("refused".to_string()))
    }
}

/// Accepts connections, then drops everything the client sends.
#[derive(Default)]
struct DeadUplink {
    hosts: std::sync::Mutex<Vec<tokio::sync::mpsc::UnboundedSender<SyncMessage>>>,
}

#[async_trait::async_trait]
impl Transport for DeadUplink {
    async fn publish(&self, _: &DocumentId, _: &str, _: &str) -> collaboration::Result<()> {
        Ok(())
    }

    async fn connect(
        &self,
        document_id: &DocumentId,
        _: &CollaboratorUser,
    ) -> collaboration::Result<Link> {
        let (outgoing, _) = tokio::sync::mpsc::unbounded_channel();
        let (host, incoming) = tokio::sync::mpsc::unbounded_channel();
        self.hosts.lock().unwrap().push(host);
        Ok(Link {
            snapshot: SessionSnapshot {
                document_id: document_id.clone(),
                title: "Remote".to_string(),
                content: "remote text".to_string(),
                collaborators: Vec::new(),
                chat: Vec::new(),
            },
            outgoing,
            incoming,
        })
    }
}

fn config(id: &str, name: &str) -> SessionConfig {
    SessionConfig::from_preferences(Preferences {
        theme: Theme::Dark,
        identity: LocalIdentity {
            id: id.to_string(),
            name: name.to_string(),
        },
    })
}

fn open(storage: &MemoryStorage) -> DocumentSession<MemoryStorage> {
    DocumentSession::open(storage.clone(), config("alice", "Alice")).unwrap()
}

#[tokio::test]
async fn test_create_then_delete_first_note() {
    let storage = MemoryStorage::new();
    let mut session = open(&storage);
    let first = session.active_note_id().clone();

    let second = session.create_note("Second").unwrap();
    session.select_note(&first).unwrap();
    let active = session.delete_active_note().unwrap();

    assert_eq!(active, second);
    assert_eq!(session.active_note_id(), &second);
    assert_eq!(session.notes().len(), 1);
    assert_eq!(session.notes()[0].id, second);

    // Durable state agrees
    let reopened = open(&storage);
    assert_eq!(reopened.notes().len(), 1);
    assert_eq!(reopened.active_note_id(), &second);
}

#[tokio::test(start_paused = true)]
async fn test_autosave_waits_for_quiet_period() {
    let storage = MemoryStorage::new();
    let mut session = open(&storage);
    let writes = storage.write_count();

    session.edit("h").unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    session.edit("he").unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    session.edit("hey").unwrap();

    tokio::time::sleep(Duration::from_millis(1999)).await;
    assert!(!session.poll_autosave().unwrap());
    assert_eq!(storage.write_count(), writes);

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert!(session.poll_autosave().unwrap());
    assert_eq!(storage.write_count(), writes + 1);

    assert_eq!(open(&storage).content(), "hey");
}

#[tokio::test(start_paused = true)]
async fn test_wait_autosave() {
    let storage = MemoryStorage::new();
    let mut session = open(&storage);
    assert!(!session.wait_autosave().await.unwrap());

    session.edit("draft").unwrap();
    assert!(session.wait_autosave().await.unwrap());
    assert!(!session.has_pending_autosave());
    assert_eq!(open(&storage).content(), "draft");
}

#[tokio::test]
async fn test_shared_mode_never_writes_locally() {
    let hub = Hub::new();
    let doc = DocumentId::from("shared-doc");
    hub.publish(&doc, "Team notes", "agenda").await.unwrap();

    let storage = MemoryStorage::new();
    let mut session = open(&storage);
    let writes = storage.write_count();

    let snapshot = session.join_shared(&hub, doc.clone()).await.unwrap();
    assert_eq!(snapshot.content, "agenda");
    assert_eq!(session.mode(), &SessionMode::Shared(doc.clone()));
    assert_eq!(session.title(), "Team notes");

    session.edit("agenda: ship it").unwrap();
    session.select(0, 6).unwrap();
    session.format(document::FormatStyle::Underline).unwrap();
    session.undo().unwrap();
    session.replace_all("ship", "test").unwrap();
    session.send_chat("done").unwrap();
    session.sync();

    assert_eq!(session.content(), "agenda: test it");
    assert_eq!(storage.write_count(), writes);
    assert!(!session.has_pending_autosave());
    assert!(matches!(session.set_title("x"), Err(SessionError::NotLocal)));
    assert!(matches!(session.create_note("x"), Err(SessionError::NotLocal)));

    session.leave_shared();
    assert_eq!(session.mode(), &SessionMode::Local);
    assert_eq!(session.content(), "");
    assert_eq!(storage.write_count(), writes);
}

#[tokio::test]
async fn test_local_edits_survive_a_shared_visit() {
    let hub = Hub::new();
    let doc = DocumentId::from("elsewhere");
    hub.publish(&doc, "Elsewhere", "").await.unwrap();

    let storage = MemoryStorage::new();
    let mut session = open(&storage);
    session.edit("local draft").unwrap();

    session.join_shared(&hub, doc).await.unwrap();
    assert!(!session.has_pending_autosave());

    session.leave_shared();
    assert_eq!(session.content(), "local draft");
    assert!(session.has_pending_autosave());

    session.close().unwrap();
    assert_eq!(open(&storage).content(), "local draft");
}

#[tokio::test]
async fn test_unknown_shared_document() {
    let hub = Hub::new();
    let mut session = open(&MemoryStorage::new());

    let err = session
        .join_shared(&hub, DocumentId::from("never-published"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::Collaboration(CollaborationError::DocumentNotFound(_))
    ));
    assert_eq!(session.mode(), &SessionMode::Local);
    assert!(!hub.contains(&DocumentId::from("never-published")).await);
}

#[tokio::test]
async fn test_connection_failure_keeps_local_mode() {
    let mut session = open(&MemoryStorage::new());

    let err = session
        .join_shared(&RefusingTransport, DocumentId::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::Collaboration(CollaborationError::ConnectionFailed(_))
    ));
    assert_eq!(session.mode(), &SessionMode::Local);
    assert_eq!(session.connection_state(), ChannelState::Disconnected);
    assert!(session.view().collaborators.is_empty());
}

#[tokio::test]
async fn test_share_link_opens_shared_session() {
    let hub = Hub::new();

    let alice_storage = MemoryStorage::new();
    let mut alice = open(&alice_storage);
    alice.set_title("Plan").unwrap();
    alice.edit("step one").unwrap();
    let link = alice.share(&hub).await.unwrap();

    let target = LaunchTarget::from_url(&link);
    let LaunchTarget::Shared(doc) = target else {
        panic!("link should open a shared session: {}", link);
    };
    assert_eq!(doc.as_str(), alice.active_note_id().as_str());

    let mut bob = DocumentSession::open(MemoryStorage::new(), config("bob", "Bob")).unwrap();
    bob.join_shared(&hub, doc.clone()).await.unwrap();
    assert_eq!(bob.content(), "step one");
    assert_eq!(bob.title(), "Plan");

    alice.join_shared(&hub, doc).await.unwrap();
    assert_eq!(
        bob.next_event().await,
        Some(ChannelEvent::RosterChanged)
    );

    alice.edit("step one\nstep two").unwrap();
    assert!(matches!(
        bob.next_event().await,
        Some(ChannelEvent::ContentReplaced { .. })
    ));
    assert_eq!(bob.content(), "step one\nstep two");

    alice.send_chat("take a look").unwrap();
    assert_eq!(bob.next_event().await, Some(ChannelEvent::ChatReceived));

    let view = bob.view();
    assert_eq!(view.current_user.name, "Bob");
    assert_eq!(view.collaborators.len(), 2);
    assert_eq!(view.chat_messages[0].user_name, "Alice");
    assert_eq!(view.active_note_id, None);
}

#[tokio::test]
async fn test_failed_broadcast_returns_to_local_mode() {
    let storage = MemoryStorage::new();
    let mut session = open(&storage);
    session.edit("local draft").unwrap();

    session
        .join_shared(&DeadUplink::default(), DocumentId::from("d"))
        .await
        .unwrap();
    assert_eq!(session.content(), "remote text");

    let err = session.edit("changed").unwrap_err();
    assert!(matches!(
        err,
        SessionError::Collaboration(CollaborationError::NetworkError(_))
    ));
    assert_eq!(session.mode(), &SessionMode::Local);
    assert_eq!(session.connection_state(), ChannelState::Disconnected);
    assert_eq!(session.content(), "local draft");
    assert!(!session.history().can_undo());
    assert!(session.sync().is_empty());

    session.create_note("After").unwrap();
    session.edit("works again").unwrap();
    assert!(session.history().can_undo());
}

#[tokio::test]
async fn test_failed_chat_returns_to_local_mode() {
    let mut session = open(&MemoryStorage::new());
    session
        .join_shared(&DeadUplink::default(), DocumentId::from("d"))
        .await
        .unwrap();

    assert!(session.send_chat("anyone?").is_err());
    assert_eq!(session.mode(), &SessionMode::Local);
    assert!(session.view().chat_messages.is_empty());
    assert!(matches!(session.send_chat("hi"), Err(SessionError::NotShared)));
}
