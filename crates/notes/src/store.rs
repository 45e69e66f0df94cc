use tracing::{debug, info, warn};

use crate::{Note, NoteId, NotePatch, NotesError, Result, Storage, NOTES_KEY};

/// Ordered note collection persisted as a single serialized record.
///
/// The collection is never empty: loading empty or unreadable storage
/// synthesizes one default note, and deleting the last note is rejected.
/// Every durable write re-serializes the whole collection.
pub struct NoteStore<S: Storage> {
    storage: S,
    notes: Vec<Note>,
    unsaved: bool,
}

impl<S: Storage> NoteStore<S> {
    /// Read the collection from storage, bootstrapping a default note when
    /// the record is absent, empty, or malformed.
    pub fn load(storage: S) -> Result<Self> {
        let stored = match storage.get(NOTES_KEY)? {
            Some(raw) => match serde_json::from_str::<Vec<Note>>(&raw) {
                Ok(notes) => notes,
                Err(e) => {
                    warn!("Stored note collection is malformed, resetting: {}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let mut store = Self {
            storage,
            notes: stored,
            unsaved: false,
        };

        if store.notes.is_empty() {
            let note = Note::untitled();
            info!("Bootstrapping note collection with {}", note.id);
            store.notes.push(note);
            store.persist()?;
        } else {
            debug!("Loaded {} notes", store.notes.len());
        }

        Ok(store)
    }

    /// Notes in insertion order.
    pub fn list(&self) -> &[Note] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn get(&self, id: &NoteId) -> Option<&Note> {
        self.notes.iter().find(|n| &n.id == id)
    }

    pub fn contains(&self, id: &NoteId) -> bool {
        self.get(id).is_some()
    }

    /// First note in stored order.
    pub fn first(&self) -> &Note {
        &self.notes[0]
    }

    pub fn create(&mut self, title: impl Into<String>, content: impl Into<String>) -> Result<Note> {
        let note = Note::new(title, content);
        self.notes.push(note.clone());
        self.persist()?;
        info!("Created note {}", note.id);
        Ok(note)
    }

    /// Merge `patch` into a note and write the collection.
    pub fn update(&mut self, id: &NoteId, patch: NotePatch) -> Result<Note> {
        let note = self.stage(id, patch)?;
        self.persist()?;
        Ok(note)
    }

    /// Merge `patch` in memory only; the change is written by the next
    /// `flush` or by any other durable write.
    pub fn stage(&mut self, id: &NoteId, patch: NotePatch) -> Result<Note> {
        let note = self
            .notes
            .iter_mut()
            .find(|n| &n.id == id)
            .ok_or_else(|| NotesError::NotFound(id.clone()))?;
        note.apply(patch);
        self.unsaved = true;
        Ok(note.clone())
    }

    pub fn delete(&mut self, id: &NoteId) -> Result<()> {
        let idx = self
            .notes
            .iter()
            .position(|n| &n.id == id)
            .ok_or_else(|| NotesError::NotFound(id.clone()))?;
        if self.notes.len() <= 1 {
            return Err(NotesError::InvariantViolation(
                "at least one note must remain".to_string(),
            ));
        }
        self.notes.remove(idx);
        self.persist()?;
        info!("Deleted note {}", id);
        Ok(())
    }

    /// Write staged changes, if any.
    pub fn flush(&mut self) -> Result<bool> {
        if !self.unsaved {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved
    }

    fn persist(&mut self) -> Result<()> {
        let json = serde_json::to_string(&self.notes)?;
        self.storage.set(NOTES_KEY, &json)?;
        self.unsaved = false;
        debug!("Persisted {} notes", self.notes.len());
        Ok(())
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }
}
