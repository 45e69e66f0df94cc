/// Plain-text export of a document, offered as a named download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl ExportFile {
    pub fn new(title: &str, content: &str) -> Self {
        Self {
            filename: export_filename(title),
            bytes: content.as_bytes().to_vec(),
        }
    }
}

/// Lower-cased title with each whitespace run collapsed to a hyphen, plus `.txt`.
pub fn export_filename(title: &str) -> String {
    let mut stem = String::with_capacity(title.len());
    let mut in_space = false;
    for ch in title.chars() {
        if ch.is_whitespace() {
            if !in_space {
                stem.push('-');
            }
            in_space = true;
        } else {
            stem.extend(ch.to_lowercase());
            in_space = false;
        }
    }
    if stem.is_empty() {
        stem.push_str("untitled");
    }
    format!("{}.txt", stem)
}
