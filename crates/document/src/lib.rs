use serde::{Deserialize, Serialize};
use thiserror::Error;

mod history;
pub use history::*;
mod edit;
pub use edit::*;
mod stats;
pub use stats::*;
mod export;
pub use export::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("invalid range {start}..{end} for text of length {len}")]
    InvalidRange { start: usize, end: usize, len: usize },
    #[error("selection {found:?} does not match search {expected:?}")]
    SearchMismatch { expected: String, found: String },
}

pub type Result<T> = std::result::Result<T, DocumentError>;

/// Half-open range `[start, end)` of character offsets into a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub const fn caret(position: usize) -> Self {
        Self {
            start: position,
            end: position,
        }
    }

    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub const fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Clamp both ends to `len`, keeping `start <= end`.
    pub fn clamp_to(self, len: usize) -> Self {
        let end = self.end.min(len);
        Self {
            start: self.start.min(end),
            end,
        }
    }
}

/// Number of characters in `text`. Offsets everywhere in this crate count characters.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte index of the `offset`-th character, or `None` past the end.
pub(crate) fn byte_offset(text: &str, offset: usize) -> Option<usize> {
    if offset == 0 {
        return Some(0);
    }
    text.char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(text.len()))
        .nth(offset)
}

/// Byte range for a character range, validating `start <= end <= len`.
pub(crate) fn byte_range(text: &str, range: TextRange) -> Result<std::ops::Range<usize>> {
    let invalid = || DocumentError::InvalidRange {
        start: range.start,
        end: range.end,
        len: char_len(text),
    };
    if range.start > range.end {
        return Err(invalid());
    }
    let start = byte_offset(text, range.start).ok_or_else(invalid)?;
    let end = byte_offset(text, range.end).ok_or_else(invalid)?;
    Ok(start..end)
}
