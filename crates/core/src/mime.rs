//! MIME type lookup by file extension.
//!
//! The server only sees the [`MimeLookup`] trait. [`MimeTypes`] is the table
//! implementation, parsed from a text file of `EXTENSION = MIME` lines.

use std::collections::HashMap;
use std::path::Path;

/// Extension to MIME type lookup.
pub trait MimeLookup: Send + Sync + 'static {
    /// Look up the MIME type for an extension (without the leading dot).
    fn lookup(&self, extension: &str) -> Option<String>;
}

/// Resolve the MIME type of `filename` from the text after its last `.`.
pub fn mime_for_filename(lookup: &dyn MimeLookup, filename: &str) -> Option<String> {
    let (_, extension) = filename.rsplit_once('.')?;
    if extension.is_empty() {
        return None;
    }
    lookup.lookup(extension)
}

/// In-memory MIME table.
#[derive(Clone, Debug, Default)]
pub struct MimeTypes {
    types: HashMap<String, String>,
}

impl MimeTypes {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a table from text.
    ///
    /// Blank lines and `#` comments are skipped, as are lines without `=` or
    /// with an empty extension or type.
    pub fn parse(text: &str) -> Self {
        let types = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(ext, mime)| (ext.trim(), mime.trim()))
            .filter(|(ext, mime)| !ext.is_empty() && !mime.is_empty())
            .map(|(ext, mime)| (ext.to_string(), mime.to_string()))
            .collect();
        Self { types }
    }

    /// Load a table from a file.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// Insert or replace a mapping.
    pub fn insert(&mut self, extension: impl Into<String>, mime: impl Into<String>) {
        self.types.insert(extension.into(), mime.into());
    }

    /// Number of known extensions.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl MimeLookup for MimeTypes {
    fn lookup(&self, extension: &str) -> Option<String> {
        self.types.get(extension).cloned()
    }
}
