/// Pure text editing operations over a document and a selection range.
/// All offsets are character offsets; see `TextRange`.
use serde::{Deserialize, Serialize};

use crate::{byte_offset, byte_range, char_len, DocumentError, Result, TextRange};

/// Inline markup style applied around a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatStyle {
    Bold,
    Italic,
    Underline,
}

impl FormatStyle {
    pub const fn marker(&self) -> &'static str {
        match self {
            Self::Bold => "**",
            Self::Italic => "*",
            Self::Underline => "_",
        }
    }

    /// Characters inserted on each side of the selection.
    pub const fn marker_len(&self) -> usize {
        self.marker().len()
    }
}

/// Wrap `content[range]` in the style's marker pair.
pub fn format(content: &str, range: TextRange, style: FormatStyle) -> Result<String> {
    let bytes = byte_range(content, range)?;
    let marker = style.marker();

    let mut out = String::with_capacity(content.len() + marker.len() * 2);
    out.push_str(&content[..bytes.start]);
    out.push_str(marker);
    out.push_str(&content[bytes.clone()]);
    out.push_str(marker);
    out.push_str(&content[bytes.end..]);
    Ok(out)
}

/// Selection covering the markers plus the original text after `format`.
pub fn formatted_selection(range: TextRange, style: FormatStyle) -> TextRange {
    TextRange::new(range.start, range.end + style.marker_len() * 2)
}

/// First occurrence of `query` at or after `from`, wrapping to the start of the
/// document when nothing follows. Empty queries never match.
pub fn find(content: &str, query: &str, from: usize) -> Option<TextRange> {
    if query.is_empty() {
        return None;
    }
    let query_len = char_len(query);
    let from = from.min(char_len(content));
    let from_byte = byte_offset(content, from).unwrap_or(content.len());

    if let Some(idx) = content[from_byte..].find(query) {
        let start = from + content[from_byte..from_byte + idx].chars().count();
        return Some(TextRange::new(start, start + query_len));
    }

    content.find(query).map(|idx| {
        let start = content[..idx].chars().count();
        TextRange::new(start, start + query_len)
    })
}

/// Replace the current selection, but only if it is exactly the search term.
pub fn replace_one(
    content: &str,
    selection: TextRange,
    query: &str,
    replacement: &str,
) -> Result<String> {
    let bytes = byte_range(content, selection)?;
    let selected = &content[bytes.clone()];
    if query.is_empty() || selected != query {
        return Err(DocumentError::SearchMismatch {
            expected: query.to_string(),
            found: selected.to_string(),
        });
    }

    let mut out = String::with_capacity(content.len() + replacement.len());
    out.push_str(&content[..bytes.start]);
    out.push_str(replacement);
    out.push_str(&content[bytes.end..]);
    Ok(out)
}

/// Replace every non-overlapping occurrence, left to right.
pub fn replace_all(content: &str, query: &str, replacement: &str) -> String {
    if query.is_empty() {
        return content.to_string();
    }
    content.replace(query, replacement)
}

pub fn count_matches(content: &str, query: &str) -> usize {
    if query.is_empty() {
        return 0;
    }
    content.matches(query).count()
}
