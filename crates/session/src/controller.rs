use collaboration::{
    Backoff, ChannelEvent, ChannelState, ChatMessage, CollaborationError, CollaboratorUser,
    DocumentId, PresenceChannel, Selection, SessionSnapshot, Transport, UserId,
};
use document::{char_len, ExportFile, FormatStyle, History, TextRange, TextStats};
use notes::{Note, NoteId, NotePatch, NoteStore, NotesError, Storage, Theme};
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::{share_link, AutosaveTimer, Result, SessionConfig, SessionError};

/// Which store is authoritative for the open document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "document_id", rename_all = "snake_case")]
pub enum SessionMode {
    Local,
    Shared(DocumentId),
}

/// Read-only picture of the session for a front end to render
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub mode: SessionMode,
    pub active_note_id: Option<NoteId>,
    pub current_user: CollaboratorUser,
    pub collaborators: Vec<CollaboratorUser>,
    pub chat_messages: Vec<ChatMessage>,
}

/// Single point of control for one editing session.
///
/// Local mode edits are staged in the note store and written once the autosave
/// debounce elapses. Shared mode edits go to the presence channel only and never
/// touch local storage.
pub struct DocumentSession<S: Storage> {
    config: SessionConfig,
    store: NoteStore<S>,
    mode: SessionMode,
    active_note: NoteId,
    channel: PresenceChannel,
    history: History,
    selection: TextRange,
    last_search: Option<String>,
    autosave: AutosaveTimer,
}

impl<S: Storage> DocumentSession<S> {
    /// Load the note collection and open the first note.
    pub fn open(storage: S, config: SessionConfig) -> Result<Self> {
        let store = NoteStore::load(storage)?;
        let active_note = store.first().id.clone();
        let autosave = AutosaveTimer::new(config.autosave_debounce);
        info!("Opened session on note {}", active_note);

        Ok(Self {
            config,
            store,
            mode: SessionMode::Local,
            active_note,
            channel: PresenceChannel::new(),
            history: History::new(),
            selection: TextRange::default(),
            last_search: None,
            autosave,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn mode(&self) -> &SessionMode {
        &self.mode
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.mode, SessionMode::Shared(_))
    }

    pub fn notes(&self) -> &[Note] {
        self.store.list()
    }

    pub fn store(&self) -> &NoteStore<S> {
        &self.store
    }

    pub fn active_note_id(&self) -> &NoteId {
        &self.active_note
    }

    /// The local note being edited, or the one to return to after a shared session.
    pub fn active_note(&self) -> &Note {
        self.store
            .get(&self.active_note)
            .unwrap_or_else(|| self.store.first())
    }

    pub fn content(&self) -> &str {
        match self.mode {
            SessionMode::Local => &self.active_note().content,
            SessionMode::Shared(_) => self.channel.content(),
        }
    }

    pub fn title(&self) -> &str {
        match self.mode {
            SessionMode::Local => &self.active_note().title,
            SessionMode::Shared(_) => self.channel.title(),
        }
    }

    pub fn selection(&self) -> TextRange {
        self.selection
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn last_search(&self) -> Option<&str> {
        self.last_search.as_deref()
    }

    pub fn has_pending_autosave(&self) -> bool {
        self.autosave.is_pending()
    }

    pub fn local_user(&self) -> CollaboratorUser {
        let identity = self.config.identity();
        CollaboratorUser::new(UserId::from(identity.id.as_str()), identity.name.clone())
    }

    /// Set the selection, clamped to the content. Shared sessions broadcast it as the cursor.
    pub fn select(&mut self, start: usize, end: usize) -> Result<TextRange> {
        let len = char_len(self.content());
        let range = TextRange::new(start.min(end), start.max(end)).clamp_to(len);
        self.selection = range;

        if self.is_shared() {
            let selection = (!range.is_empty()).then(|| Selection::new(range.start, range.end));
            let user_id = self.local_user().id;
            if let Err(e) = self.channel.update_cursor(&user_id, range.end, selection) {
                return Err(self.shared_send_failed(e));
            }
        }
        Ok(range)
    }

    /// Replace the document content as one undoable step.
    pub fn edit(&mut self, new_content: impl Into<String>) -> Result<()> {
        let new_content = new_content.into();
        if new_content == self.content() {
            return Ok(());
        }
        let prior = self.content().to_string();
        self.apply_content(new_content.clone())?;
        self.history.record(&prior);
        self.history.push(new_content);
        Ok(())
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> Result<()> {
        self.require_local()?;
        let id = self.active_note.clone();
        self.store.stage(&id, NotePatch::title(title))?;
        self.autosave.arm();
        Ok(())
    }

    pub fn undo(&mut self) -> Result<bool> {
        match self.history.undo().map(str::to_owned) {
            Some(snapshot) => {
                if let Err(e) = self.apply_content(snapshot) {
                    let _ = self.history.redo();
                    return Err(e);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn redo(&mut self) -> Result<bool> {
        match self.history.redo().map(str::to_owned) {
            Some(snapshot) => {
                if let Err(e) = self.apply_content(snapshot) {
                    let _ = self.history.undo();
                    return Err(e);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Wrap the selection in the style's markers and select the result.
    pub fn format(&mut self, style: FormatStyle) -> Result<()> {
        let range = self.selection;
        let formatted = document::format(self.content(), range, style)?;
        self.edit(formatted)?;
        self.selection = document::formatted_selection(range, style);
        Ok(())
    }

    /// Select the next match after the current selection, wrapping around.
    pub fn find(&mut self, query: &str) -> Option<TextRange> {
        self.last_search = (!query.is_empty()).then(|| query.to_string());
        let found = document::find(self.content(), query, self.selection.end)?;
        self.selection = found;
        Some(found)
    }

    /// Replace the selection, which must be exactly the last search term.
    pub fn replace(&mut self, replacement: &str) -> Result<()> {
        let query = self.last_search.clone().unwrap_or_default();
        let replaced = document::replace_one(self.content(), self.selection, &query, replacement)?;
        let start = self.selection.start;
        self.edit(replaced)?;
        self.selection = TextRange::new(start, start + char_len(replacement));
        Ok(())
    }

    /// Replace every match. Returns the number of substitutions.
    pub fn replace_all(&mut self, query: &str, replacement: &str) -> Result<usize> {
        let count = document::count_matches(self.content(), query);
        if count > 0 {
            let replaced = document::replace_all(self.content(), query, replacement);
            self.edit(replaced)?;
        }
        Ok(count)
    }

    pub fn stats(&self) -> TextStats {
        TextStats::of(self.content())
    }

    pub fn export(&self) -> ExportFile {
        ExportFile::new(self.title(), self.content())
    }

    pub fn create_note(&mut self, title: impl Into<String>) -> Result<NoteId> {
        self.require_local()?;
        self.flush()?;
        let note = self.store.create(title, "")?;
        self.switch_to(note.id.clone());
        Ok(note.id)
    }

    /// Open another local note. An unknown id falls back to the first note and
    /// still reports `NotFound`.
    pub fn select_note(&mut self, id: &NoteId) -> Result<()> {
        self.require_local()?;
        if id == &self.active_note {
            return Ok(());
        }
        self.flush()?;
        if self.store.contains(id) {
            self.switch_to(id.clone());
            Ok(())
        } else {
            warn!("Note {} no longer exists, opening first note", id);
            let first = self.store.first().id.clone();
            self.switch_to(first);
            Err(NotesError::NotFound(id.clone()).into())
        }
    }

    /// Delete a note. Deleting the open note moves to the first remaining one.
    pub fn delete_note(&mut self, id: &NoteId) -> Result<()> {
        self.require_local()?;
        self.store.delete(id)?;
        self.autosave.cancel();
        if id == &self.active_note {
            let first = self.store.first().id.clone();
            self.switch_to(first);
        }
        Ok(())
    }

    pub fn delete_active_note(&mut self) -> Result<NoteId> {
        let id = self.active_note.clone();
        self.delete_note(&id)?;
        Ok(self.active_note.clone())
    }

    pub fn set_theme(&mut self, theme: Theme) -> Result<()> {
        self.config
            .preferences
            .set_theme(self.store.storage_mut(), theme)?;
        Ok(())
    }

    pub fn set_user_name(&mut self, name: &str) -> Result<()> {
        self.config
            .preferences
            .set_user_name(self.store.storage_mut(), name)?;
        Ok(())
    }

    /// Write staged local edits now. Returns whether anything was written.
    pub fn flush(&mut self) -> Result<bool> {
        self.autosave.cancel();
        let written = self.store.flush()?;
        if written {
            debug!("Flushed note {}", self.active_note);
        }
        Ok(written)
    }

    /// Write staged edits if the debounce window has elapsed.
    pub fn poll_autosave(&mut self) -> Result<bool> {
        if self.autosave.take_due() {
            info!("Autosaving note {}", self.active_note);
            return Ok(self.store.flush()?);
        }
        Ok(false)
    }

    /// Wait out the pending debounce window, then write. False if nothing was pending.
    pub async fn wait_autosave(&mut self) -> Result<bool> {
        if self.autosave.wait_due().await {
            info!("Autosaving note {}", self.active_note);
            return Ok(self.store.flush()?);
        }
        Ok(false)
    }

    /// Publish the open local note and return its shareable link.
    pub async fn share<T: Transport + ?Sized>(&mut self, transport: &T) -> Result<Url> {
        self.require_local()?;
        let note = self.active_note();
        let document_id = DocumentId::from(note.id.as_str());
        transport
            .publish(&document_id, &note.title, &note.content)
            .await?;
        let link = share_link(&self.config.share_base_url, &document_id);
        info!("Shared note {} at {}", note.id, link);
        Ok(link)
    }

    /// Enter Shared mode for `document_id`. On failure the session stays local.
    pub async fn join_shared<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        document_id: DocumentId,
    ) -> Result<SessionSnapshot> {
        self.join_shared_with_retry(transport, document_id, &Backoff::none())
            .await
    }

    /// `join_shared`, retrying unreachable hosts on the backoff schedule.
    pub async fn join_shared_with_retry<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        document_id: DocumentId,
        backoff: &Backoff,
    ) -> Result<SessionSnapshot> {
        // Staged local edits stay in memory until the session returns to local mode
        self.autosave.cancel();
        let local_user = self.local_user();

        match self
            .channel
            .connect_with_retry(transport, document_id.clone(), local_user, backoff)
            .await
        {
            Ok(snapshot) => {
                info!("Entered shared mode for {}", document_id);
                self.mode = SessionMode::Shared(document_id);
                self.reset_editor();
                Ok(snapshot)
            }
            Err(e) => {
                self.enter_local();
                Err(e.into())
            }
        }
    }

    /// Leave the shared session and go back to the active local note.
    pub fn leave_shared(&mut self) {
        if !self.is_shared() {
            return;
        }
        self.channel.disconnect();
        self.enter_local();
    }

    /// Merge remote changes that have already arrived.
    pub fn sync(&mut self) -> Vec<ChannelEvent> {
        if !self.is_shared() {
            return Vec::new();
        }
        let events = self.channel.poll();
        for event in &events {
            self.after_remote(event);
        }
        events
    }

    /// Wait for the next remote change. `None` outside Shared mode.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        if !self.is_shared() {
            return None;
        }
        let event = self.channel.next_event().await?;
        self.after_remote(&event);
        Some(event)
    }

    pub fn send_chat(&mut self, message: &str) -> Result<Option<ChatMessage>> {
        if !self.is_shared() {
            return Err(SessionError::NotShared);
        }
        self.channel
            .send_chat(message)
            .map_err(|e| self.shared_send_failed(e))
    }

    pub fn view(&self) -> SessionView {
        let shared = self.is_shared();
        SessionView {
            mode: self.mode.clone(),
            active_note_id: (!shared).then(|| self.active_note.clone()),
            current_user: self
                .channel
                .local_user()
                .filter(|_| shared)
                .cloned()
                .unwrap_or_else(|| self.local_user()),
            collaborators: self.channel.collaborators().to_vec(),
            chat_messages: self.channel.chat().to_vec(),
        }
    }

    /// Tear the session down: write staged edits, stop the timer, leave any shared session.
    pub fn close(mut self) -> Result<()> {
        self.channel.disconnect();
        self.flush()?;
        info!("Closed session");
        Ok(())
    }

    fn apply_content(&mut self, content: String) -> Result<()> {
        let len = char_len(&content);
        match self.mode {
            SessionMode::Local => {
                let id = self.active_note.clone();
                self.store.stage(&id, NotePatch::content(content))?;
                self.autosave.arm();
            }
            SessionMode::Shared(_) => {
                if let Err(e) = self.channel.broadcast_edit(content) {
                    return Err(self.shared_send_failed(e));
                }
            }
        }
        self.selection = self.selection.clamp_to(len);
        Ok(())
    }

    /// A failed send may have dropped the link; if so fall back to the local note.
    fn shared_send_failed(&mut self, e: CollaborationError) -> SessionError {
        if self.is_shared() && !self.channel.is_connected() {
            for event in self.channel.poll() {
                self.after_remote(&event);
            }
            if self.is_shared() {
                self.enter_local();
            }
        }
        e.into()
    }

    fn after_remote(&mut self, event: &ChannelEvent) {
        match event {
            ChannelEvent::ContentReplaced { .. } => {
                self.selection = self.selection.clamp_to(char_len(self.channel.content()));
            }
            ChannelEvent::Disconnected => {
                warn!("Shared session ended, returning to local note");
                self.enter_local();
            }
            _ => {}
        }
    }

    fn enter_local(&mut self) {
        let was_shared = self.is_shared();
        self.mode = SessionMode::Local;
        if was_shared {
            self.reset_editor();
        }
        if self.store.has_unsaved_changes() {
            self.autosave.arm();
        }
    }

    fn switch_to(&mut self, id: NoteId) {
        debug!("Switching to note {}", id);
        self.active_note = id;
        self.reset_editor();
    }

    fn reset_editor(&mut self) {
        self.history.clear();
        self.selection = TextRange::default();
        self.last_search = None;
    }

    fn require_local(&self) -> Result<()> {
        if self.is_shared() {
            return Err(SessionError::NotLocal);
        }
        Ok(())
    }
}

impl<S: Storage> DocumentSession<S> {
    /// Channel state, for front ends that show a connection indicator.
    pub fn connection_state(&self) -> ChannelState {
        self.channel.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notes::{LocalIdentity, MemoryStorage, Preferences};

    fn config() -> SessionConfig {
        SessionConfig::from_preferences(Preferences {
            theme: Theme::Dark,
            identity: LocalIdentity {
                id: "me".to_string(),
                name: "Me".to_string(),
            },
        })
    }

    fn session() -> DocumentSession<MemoryStorage> {
        DocumentSession::open(MemoryStorage::new(), config()).unwrap()
    }

    #[tokio::test]
    async fn test_opens_bootstrap_note() {
        let session = session();
        assert_eq!(session.notes().len(), 1);
        assert_eq!(session.title(), "Untitled Note");
        assert_eq!(session.content(), "");
        assert_eq!(session.mode(), &SessionMode::Local);
    }

    #[tokio::test]
    async fn test_undo_redo_through_controller() {
        let mut session = session();
        session.edit("a").unwrap();
        session.edit("ab").unwrap();
        session.edit("abc").unwrap();

        assert!(session.undo().unwrap());
        assert_eq!(session.content(), "ab");
        assert!(session.undo().unwrap());
        assert!(session.undo().unwrap());
        assert_eq!(session.content(), "");
        assert!(!session.undo().unwrap());

        assert!(session.redo().unwrap());
        assert!(session.redo().unwrap());
        assert!(session.redo().unwrap());
        assert_eq!(session.content(), "abc");
        assert!(!session.redo().unwrap());
    }

    #[tokio::test]
    async fn test_edit_after_undo_drops_redo() {
        let mut session = session();
        session.edit("one").unwrap();
        session.edit("two").unwrap();
        session.undo().unwrap();
        session.edit("three").unwrap();
        assert!(!session.history().can_redo());
        assert_eq!(session.content(), "three");
    }

    #[tokio::test]
    async fn test_format_selects_markers() {
        let mut session = session();
        session.edit("make this bold").unwrap();
        session.select(5, 9).unwrap();
        session.format(FormatStyle::Bold).unwrap();

        assert_eq!(session.content(), "make **this** bold");
        let sel = session.selection();
        assert_eq!(sel, TextRange::new(5, 13));
        assert_eq!(&session.content()[sel.start..sel.end], "**this**");

        session.select(0, 4).unwrap();
        session.format(FormatStyle::Italic).unwrap();
        assert_eq!(session.content(), "*make* **this** bold");
        assert_eq!(session.selection(), TextRange::new(0, 6));
    }

    #[tokio::test]
    async fn test_find_then_replace() {
        let mut session = session();
        session.edit("cat dog cat").unwrap();

        assert_eq!(session.find("cat"), Some(TextRange::new(0, 3)));
        assert_eq!(session.find("cat"), Some(TextRange::new(8, 11)));
        session.replace("cow").unwrap();
        assert_eq!(session.content(), "cat dog cow");

        // Selection now covers the replacement, not the search term
        let err = session.replace("cow").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Document(document::DocumentError::SearchMismatch { .. })
        ));
        assert_eq!(session.content(), "cat dog cow");
    }

    #[tokio::test]
    async fn test_replace_all_counts() {
        let mut session = session();
        session.edit("a-a-a").unwrap();
        assert_eq!(session.replace_all("a", "bb").unwrap(), 3);
        assert_eq!(session.content(), "bb-bb-bb");
        assert_eq!(session.replace_all("zzz", "y").unwrap(), 0);
        assert_eq!(session.replace_all("", "y").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_switching_notes_discards_history() {
        let mut session = session();
        session.edit("first note").unwrap();
        let first = session.active_note_id().clone();
        let second = session.create_note("Second").unwrap();

        assert_eq!(session.active_note_id(), &second);
        assert!(session.history().is_empty());
        assert!(!session.undo().unwrap());

        session.select_note(&first).unwrap();
        assert_eq!(session.content(), "first note");
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_select_missing_note_falls_back() {
        let mut session = session();
        let first = session.active_note_id().clone();
        session.create_note("Second").unwrap();

        let err = session.select_note(&NoteId::from("gone")).unwrap_err();
        assert!(matches!(err, SessionError::Notes(NotesError::NotFound(_))));
        assert_eq!(session.active_note_id(), &first);
    }

    #[tokio::test]
    async fn test_cannot_delete_last_note() {
        let mut session = session();
        let err = session.delete_active_note().unwrap_err();
        assert!(matches!(
            err,
            SessionError::Notes(NotesError::InvariantViolation(_))
        ));
        assert_eq!(session.notes().len(), 1);
    }

    #[tokio::test]
    async fn test_selection_is_clamped() {
        let mut session = session();
        session.edit("héllo").unwrap();
        assert_eq!(session.select(9, 2).unwrap(), TextRange::new(2, 5));
        session.edit("hé").unwrap();
        assert_eq!(session.selection(), TextRange::new(2, 2));
    }

    #[tokio::test]
    async fn test_stats_and_export() {
        let mut session = session();
        session.set_title("Shopping List").unwrap();
        session.edit("milk eggs\nbread").unwrap();

        let stats = session.stats();
        assert_eq!(stats.words, 3);
        assert_eq!(stats.lines, 2);

        let file = session.export();
        assert_eq!(file.filename, "shopping-list.txt");
        assert_eq!(file.bytes, b"milk eggs\nbread");
    }

    #[tokio::test]
    async fn test_chat_requires_shared_mode() {
        let mut session = session();
        assert!(matches!(
            session.send_chat("hi"),
            Err(SessionError::NotShared)
        ));
    }

    #[tokio::test]
    async fn test_close_flushes_pending_edit() {
        let storage = MemoryStorage::new();
        let mut session = DocumentSession::open(storage.clone(), config()).unwrap();
        session.edit("unsaved").unwrap();
        assert!(session.has_pending_autosave());

        session.close().unwrap();
        let reopened = DocumentSession::open(storage, config()).unwrap();
        assert_eq!(reopened.content(), "unsaved");
    }
}
