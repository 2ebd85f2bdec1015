//! Text extraction from linked files.
//!
//! The index never reads files itself; it asks a [`TextExtractor`]. Failures
//! are per file and never abort indexing.

use std::fs;
use std::path::Path;

/// Errors that can occur while extracting text.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Unsupported file type: {0}")]
    Unsupported(String),

    #[error("Failed to read {path}: {source}")]
    ReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Source of plain text for a linked file.
pub trait TextExtractor: Send + Sync {
    /// Extract the text of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `ExtractError` if the file is missing, unreadable, or of a
    /// type this extractor does not handle.
    fn extract_text(&self, path: &Path) -> Result<String, ExtractError>;
}

/// Extensions read as UTF-8 text.
const TEXT_EXTENSIONS: &[&str] = &["txt", "text", "md", "markdown", "tex", "bib", "html", "htm", "xml", "csv", "rst", "org"];

/// Reads text-like files from the filesystem.
///
/// Invalid UTF-8 sequences are replaced rather than rejected.
#[derive(Debug, Clone, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn supports(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| TEXT_EXTENSIONS.iter().any(|t| t.eq_ignore_ascii_case(ext)))
    }
}

impl TextExtractor for PlainTextExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, ExtractError> {
        if !path.exists() {
            return Err(ExtractError::NotFound(path.display().to_string()));
        }
        if !Self::supports(path) {
            return Err(ExtractError::Unsupported(path.display().to_string()));
        }

        let bytes = fs::read(path).map_err(|source| ExtractError::ReadError {
            path: path.display().to_string(),
            source,
        })?;

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
