//! Local note collection and the durable key-value storage behind it.
use std::path::PathBuf;
use thiserror::Error;

mod note;
pub use note::*;
mod storage;
pub use storage::*;
mod store;
pub use store::*;
mod prefs;
pub use prefs::*;

/// Storage key holding the serialized note collection
pub const NOTES_KEY: &str = "notes";
pub const THEME_KEY: &str = "theme";
pub const USER_ID_KEY: &str = "user.id";
pub const USER_NAME_KEY: &str = "user.name";

#[derive(Debug, Error)]
pub enum NotesError {
    #[error("note not found: {0}")]
    NotFound(NoteId),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NotesError>;

pub fn app_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
    base.join("notepad")
}

pub fn default_db_path() -> PathBuf {
    app_data_dir().join("notepad.db")
}
