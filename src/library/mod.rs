//! Bibliography library loading and entry types.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Field whose values name groups, not content; skipped by any-field search.
pub const GROUPS_FIELD: &str = "groups";

/// Errors that can occur when loading a library.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Library not found at {0}")]
    NotFound(PathBuf),

    #[error("Failed to read library: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse library: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// A file attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkedFile {
    /// Link as written in the library, relative to the library directory
    /// unless absolute.
    pub path: PathBuf,
    /// Optional description shown next to the link.
    #[serde(default)]
    pub description: String,
}

impl LinkedFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            description: String::new(),
        }
    }

    /// The link as stored in the full-text index.
    #[must_use]
    pub fn link(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// A bibliography entry.
///
/// Field names are case-insensitive; they are stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BibEntry {
    /// Citation key; identifies the entry in search results and the index.
    #[serde(rename = "key")]
    pub citation_key: String,
    /// Entry type (e.g., "article", "book").
    #[serde(rename = "type", default = "default_entry_type")]
    pub entry_type: String,
    #[serde(default, deserialize_with = "lowercase_keys")]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub files: Vec<LinkedFile>,
}

fn default_entry_type() -> String {
    "misc".to_string()
}

fn lowercase_keys<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| (k.to_lowercase(), v))
        .collect())
}

impl BibEntry {
    pub fn new(citation_key: impl Into<String>) -> Self {
        Self {
            citation_key: citation_key.into(),
            entry_type: default_entry_type(),
            fields: BTreeMap::new(),
            files: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.insert(name.to_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_file(mut self, file: LinkedFile) -> Self {
        self.files.push(file);
        self
    }

    /// Value of a field, including the `key`/`citationkey` and `entrytype`
    /// pseudo fields. Absent fields are `None`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "key" | "citationkey" => Some(&self.citation_key),
            "entrytype" => Some(&self.entry_type),
            _ => self.fields.get(name).map(String::as_str),
        }
    }

    /// Values searched by an unscoped term, with the field they came from.
    pub fn searchable_values(&self) -> impl Iterator<Item = (&str, &str)> {
        std::iter::once(("key", self.citation_key.as_str())).chain(
            self.fields
                .iter()
                .filter(|(name, _)| name.as_str() != GROUPS_FIELD)
                .map(|(name, value)| (name.as_str(), value.as_str())),
        )
    }
}

/// The library file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryFile {
    pub version: String,
    #[serde(default)]
    pub entries: Vec<BibEntry>,
}

/// A loaded library with the directory its file links are relative to.
#[derive(Debug, Clone)]
pub struct Library {
    pub path: PathBuf,
    pub root: PathBuf,
    pub file: LibraryFile,
}

impl Library {
    /// Load a library from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError::NotFound` if the file doesn't exist.
    /// Returns `LibraryError::ReadError` if the file cannot be read.
    /// Returns `LibraryError::ParseError` if the JSON is invalid.
    pub fn load(path: &Path) -> Result<Self, LibraryError> {
        if !path.exists() {
            return Err(LibraryError::NotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path)?;
        let file: LibraryFile = serde_json::from_str(&contents)?;
        let root = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        Ok(Self {
            path: path.to_path_buf(),
            root,
            file,
        })
    }

    #[must_use]
    pub fn entries(&self) -> &[BibEntry] {
        &self.file.entries
    }

    #[must_use]
    pub fn entry(&self, citation_key: &str) -> Option<&BibEntry> {
        self.file
            .entries
            .iter()
            .find(|e| e.citation_key == citation_key)
    }

    /// Short name used to derive the default index directory.
    #[must_use]
    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .map_or_else(|| "library".to_string(), |s| s.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_library_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("refs.json");
        fs::write(
            &path,
            r#"{
                "version": "1",
                "entries": [
                    {"key": "E1", "type": "article", "fields": {"Year": "2001", "title": "Marine finfish"},
                     "files": [{"path": "docs/e1.txt"}]},
                    {"key": "E2", "fields": {"year": "2002"}}
                ]
            }"#,
        )
        .unwrap();

        let library = Library::load(&path).unwrap();

        assert_eq!(library.entries().len(), 2);
        assert_eq!(library.root, temp_dir.path());
        assert_eq!(library.name(), "refs");

        let e1 = library.entry("E1").unwrap();
        assert_eq!(e1.field("year"), Some("2001"));
        assert_eq!(e1.files[0].link(), "docs/e1.txt");
        assert_eq!(library.entry("E2").unwrap().entry_type, "misc");
    }

    #[test]
    fn load_missing_library() {
        let temp_dir = TempDir::new().unwrap();
        let result = Library::load(&temp_dir.path().join("nope.json"));
        assert!(matches!(result, Err(LibraryError::NotFound(_))));
    }

    #[test]
    fn load_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Library::load(&path), Err(LibraryError::ParseError(_))));
    }

    #[test]
    fn pseudo_fields() {
        let entry = BibEntry::new("Smith2001").with_field("title", "T");
        assert_eq!(entry.field("key"), Some("Smith2001"));
        assert_eq!(entry.field("citationkey"), Some("Smith2001"));
        assert_eq!(entry.field("entrytype"), Some("misc"));
        assert_eq!(entry.field("author"), None);
    }

    #[test]
    fn searchable_values_skip_groups() {
        let entry = BibEntry::new("K")
            .with_field("groups", "Marine")
            .with_field("title", "Fish");
        let names: Vec<_> = entry.searchable_values().map(|(n, _)| n).collect();
        assert_eq!(names, ["key", "title"]);
    }
}
