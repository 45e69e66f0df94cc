/// Linear undo/redo log of content snapshots for one open document.
/// Every call to `push` is one undo step; rapid edits are not coalesced.
#[derive(Debug, Default, Clone)]
pub struct History {
    entries: Vec<String>,
    index: Option<usize>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the log with the content as it was before the first edit.
    /// Has no effect once the log holds any entry.
    pub fn record(&mut self, prior: &str) {
        if self.entries.is_empty() {
            self.entries.push(prior.to_string());
            self.index = Some(0);
        }
    }

    /// Append a snapshot, discarding any redo branch beyond the cursor.
    pub fn push(&mut self, snapshot: impl Into<String>) {
        if let Some(index) = self.index {
            self.entries.truncate(index + 1);
        }
        self.entries.push(snapshot.into());
        self.index = Some(self.entries.len() - 1);
    }

    pub fn undo(&mut self) -> Option<&str> {
        match self.index {
            Some(index) if index > 0 => {
                self.index = Some(index - 1);
                Some(self.entries[index - 1].as_str())
            }
            _ => None,
        }
    }

    pub fn redo(&mut self) -> Option<&str> {
        let next = self.index.map_or(0, |index| index + 1);
        if next < self.entries.len() {
            self.index = Some(next);
            Some(self.entries[next].as_str())
        } else {
            None
        }
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.index, Some(index) if index > 0)
    }

    pub fn can_redo(&self) -> bool {
        self.index.map_or(0, |index| index + 1) < self.entries.len()
    }

    /// Cursor position, `-1` while the log is empty.
    pub fn index(&self) -> isize {
        self.index.map_or(-1, |index| index as isize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index = None;
    }
}
