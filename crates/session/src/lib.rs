//! Document session controller
//! Routes edits to the local note store or a shared document, owns undo history
//! and the autosave debounce.
use thiserror::Error;

mod config;
pub use config::*;
mod autosave;
pub use autosave::*;
mod link;
pub use link::*;
mod controller;
pub use controller::*;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Notes(#[from] notes::NotesError),

    #[error(transparent)]
    Document(#[from] document::DocumentError),

    #[error(transparent)]
    Collaboration(#[from] collaboration::CollaborationError),

    #[error("not in a shared session")]
    NotShared,

    #[error("operation requires a local note")]
    NotLocal,

    #[error("invalid link: {0}")]
    InvalidLink(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
