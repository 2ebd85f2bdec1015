//! Full-text index of linked-document content, built on tantivy.
//!
//! One index directory per library. The directory carries a format version in
//! `bibsearch_index.json`; an index written with another version is wiped on
//! open and reported through [`FullTextIndex::needs_rebuild`].
//!
//! Every linked file is one document owned by its entry's citation key. When
//! metadata fields are mirrored, each entry also gets one fields document.
//! Query leaves match documents; results are always reported per entry.
//!
//! Writes go through a single writer guarded by a mutex. Searches read from a
//! snapshot of the last reload, so a write only becomes visible after
//! [`FullTextIndex::maybe_refresh_blocking`].

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::UNIX_EPOCH;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, EmptyQuery, PhraseQuery, Query, RegexQuery, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, STORED, STRING, Schema, TEXT, Value};
use tantivy::tokenizer::TokenStream;
use tantivy::{
    Index, IndexReader, IndexSettings, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::extract::TextExtractor;
use crate::library::{BibEntry, LinkedFile};
use crate::search::translate::{self, IndexQuery};
use crate::search::{ContentIndex, IndexSnapshot};

/// Bumped whenever the schema or the meaning of stored values changes.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Metadata file written next to the tantivy files.
const META_FILE: &str = "bibsearch_index.json";

/// Heap size for the index writer (50MB).
const WRITER_HEAP_SIZE: usize = 50_000_000;

/// Errors that can occur while maintaining or querying the index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("Failed to open index directory: {0}")]
    Directory(#[from] tantivy::directory::error::OpenDirectoryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid index metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Index at {} could not be opened ({source}); run `bibsearch rebuild` to recreate it", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: tantivy::TantivyError,
    },

    #[error("{} is not empty and does not contain an index", .0.display())]
    ForeignDirectory(PathBuf),

    #[error("Field '{0}' is not stored in the full-text index")]
    UnsupportedField(String),

    #[error("Pattern '{pattern}' is not supported by the full-text index: {message}")]
    UnsupportedPattern { pattern: String, message: String },

    #[error("Index is closed")]
    Closed,

    #[error("Indexing task panicked")]
    TaskPanicked,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexMeta {
    format_version: u32,
    #[serde(default)]
    mirrored_fields: Vec<String>,
}

/// Schema name of a mirrored metadata field.
fn mirrored_field_name(name: &str) -> String {
    format!("field_{name}")
}

/// Lower-case, sort and dedup mirrored field names, rejecting names the
/// schema cannot hold.
fn normalize_mirrored(fields: &[String]) -> Result<Vec<String>, IndexError> {
    let mut names = Vec::with_capacity(fields.len());
    for field in fields {
        let name = field.to_lowercase();
        let valid = !name.is_empty()
            && !translate::default_covers(&name)
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(IndexError::UnsupportedField(field.clone()));
        }
        names.push(name);
    }
    names.sort();
    names.dedup();
    Ok(names)
}

/// Schema field handles for the tantivy index.
#[derive(Debug, Clone, Copy)]
struct SchemaFields {
    doc_id: Field,
    owner: Field,
    path: Field,
    content: Field,
    modified: Field,
}

/// Text extracted from one linked file, as written to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedDocument {
    pub owner_key: String,
    pub source_path: String,
    pub extracted_text: String,
    /// Modification stamp of the source file when it was extracted.
    pub version: u64,
}

impl IndexedDocument {
    fn doc_id(&self) -> String {
        document_id(&self.owner_key, &self.source_path)
    }

    fn to_tantivy(&self, fields: SchemaFields) -> TantivyDocument {
        let mut doc = TantivyDocument::new();
        doc.add_text(fields.doc_id, self.doc_id());
        doc.add_text(fields.owner, &self.owner_key);
        doc.add_text(fields.path, &self.source_path);
        doc.add_text(fields.content, &self.extracted_text);
        doc.add_u64(fields.modified, self.version);
        doc
    }
}

fn document_id(owner: &str, path: &str) -> String {
    format!("{owner}\u{1f}{path}")
}

/// Cooperative cancellation flag shared with an indexing run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Counts from one indexing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexingStats {
    pub indexed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub removed: usize,
    pub cancelled: bool,
}

/// A background indexing run started by [`FullTextIndex::spawn_add_to_index`].
#[derive(Debug)]
pub struct IndexingTask {
    cancel: CancelToken,
    handle: JoinHandle<Result<IndexingStats, IndexError>>,
}

impl IndexingTask {
    /// Ask the run to stop after the file it is working on.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to finish.
    ///
    /// # Errors
    ///
    /// Returns the run's own error, or `IndexError::TaskPanicked`.
    pub fn join(self) -> Result<IndexingStats, IndexError> {
        self.handle.join().map_err(|_| IndexError::TaskPanicked)?
    }
}

#[derive(Debug, Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

/// Decrements the in-flight count when the task ends, panicking or not.
struct InFlightGuard(Arc<InFlight>);

impl InFlightGuard {
    fn enter(in_flight: &Arc<InFlight>) -> Self {
        *in_flight.count.lock() += 1;
        Self(Arc::clone(in_flight))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

/// Persistent full-text index of the files linked from a library.
pub struct FullTextIndex {
    index: Index,
    reader: IndexReader,
    /// Private view used by writers to look up stored stamps.
    writer_view: IndexReader,
    writer: Mutex<Option<IndexWriter>>,
    fields: SchemaFields,
    index_path: PathBuf,
    files_root: PathBuf,
    /// Mirrored metadata fields, sorted by name.
    mirrored: Vec<(String, Field)>,
    extractor: Arc<dyn TextExtractor>,
    in_flight: Arc<InFlight>,
    closed: AtomicBool,
    needs_rebuild: AtomicBool,
}

impl std::fmt::Debug for FullTextIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FullTextIndex")
            .field("index_path", &self.index_path)
            .field("files_root", &self.files_root)
            .field("mirrored", &self.mirrored.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl FullTextIndex {
    /// Build the tantivy schema for linked documents.
    ///
    /// Fields:
    /// - `doc_id`: owner and link, the unit of replacement
    /// - `owner`: citation key of the owning entry
    /// - `path`: link as written in the library
    /// - `content`: extracted text, tokenized with positions
    /// - `modified`: source file stamp at extraction time
    /// - `field_<name>`: one tokenized field per mirrored metadata field
    fn build_schema(mirrored: &[String]) -> (Schema, SchemaFields) {
        let mut schema_builder = Schema::builder();

        let doc_id = schema_builder.add_text_field("doc_id", STRING | STORED);
        let owner = schema_builder.add_text_field("owner", STRING | STORED);
        let path = schema_builder.add_text_field("path", STRING | STORED);
        let content = schema_builder.add_text_field("content", TEXT);
        let modified = schema_builder.add_u64_field("modified", STORED);
        for name in mirrored {
            schema_builder.add_text_field(&mirrored_field_name(name), TEXT);
        }

        let schema = schema_builder.build();
        let fields = SchemaFields {
            doc_id,
            owner,
            path,
            content,
            modified,
        };

        (schema, fields)
    }

    /// Open the index at `index_path`, creating it if needed.
    ///
    /// Linked files are resolved against `files_root` unless absolute.
    /// `mirrored_fields` are entry fields copied into the index; an index
    /// built with a different set is wiped like one of another format.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Open` if an index of the current format exists
    /// but cannot be read, `IndexError::UnsupportedField` for a mirrored
    /// field name the schema cannot hold, and other errors if the directory
    /// cannot be prepared.
    pub fn open(
        index_path: &Path,
        files_root: &Path,
        extractor: Arc<dyn TextExtractor>,
        mirrored_fields: &[String],
    ) -> Result<Self, IndexError> {
        let mirrored_names = normalize_mirrored(mirrored_fields)?;
        let reusable = prepare_directory(index_path, &mirrored_names)?;

        let directory = MmapDirectory::open(index_path)?;
        let index = if reusable {
            Index::open(directory).map_err(|source| IndexError::Open {
                path: index_path.to_path_buf(),
                source,
            })?
        } else {
            let (schema, _) = Self::build_schema(&mirrored_names);
            let index = Index::create(directory, schema, IndexSettings::default())?;
            write_meta(index_path, &mirrored_names)?;
            info!(path = %index_path.display(), "created full-text index");
            index
        };

        // Field handles come from the stored schema, which may differ in
        // field order from a freshly built one.
        let schema = index.schema();
        let fields = SchemaFields {
            doc_id: schema.get_field("doc_id")?,
            owner: schema.get_field("owner")?,
            path: schema.get_field("path")?,
            content: schema.get_field("content")?,
            modified: schema.get_field("modified")?,
        };
        let mirrored = mirrored_names
            .into_iter()
            .map(|name| -> Result<(String, Field), IndexError> {
                let field = schema.get_field(&mirrored_field_name(&name))?;
                Ok((name, field))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer_view: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            index,
            reader,
            writer_view,
            writer: Mutex::new(None),
            fields,
            index_path: index_path.to_path_buf(),
            files_root: files_root.to_path_buf(),
            mirrored,
            extractor,
            in_flight: Arc::default(),
            closed: AtomicBool::new(false),
            needs_rebuild: AtomicBool::new(!reusable),
        })
    }

    /// Wipe whatever is at `index_path` and create an empty index.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be removed or recreated.
    pub fn recreate(
        index_path: &Path,
        files_root: &Path,
        extractor: Arc<dyn TextExtractor>,
        mirrored_fields: &[String],
    ) -> Result<Self, IndexError> {
        if index_path.exists() {
            info!(path = %index_path.display(), "removing full-text index");
            fs::remove_dir_all(index_path)?;
        }
        Self::open(index_path, files_root, extractor, mirrored_fields)
    }

    /// Get the index path.
    #[must_use]
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// True when the index was created or wiped on open and holds nothing
    /// for the library yet.
    #[must_use]
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn resolve(&self, file: &LinkedFile) -> PathBuf {
        if file.path.is_absolute() {
            file.path.clone()
        } else {
            self.files_root.join(&file.path)
        }
    }

    /// Run `f` with the single writer, creating it on first use.
    fn with_writer<R>(
        &self,
        f: impl FnOnce(&mut IndexWriter) -> Result<R, IndexError>,
    ) -> Result<R, IndexError> {
        let mut guard = self.writer.lock();
        if self.is_closed() {
            return Err(IndexError::Closed);
        }
        if guard.is_none() {
            *guard = Some(self.index.writer(WRITER_HEAP_SIZE)?);
        }
        let Some(writer) = guard.as_mut() else {
            return Err(IndexError::Closed);
        };
        f(writer)
    }

    /// Index every file linked from `entries`, and their mirrored fields.
    ///
    /// Files whose stored stamp is at least as new as the file on disk are
    /// skipped. A file that cannot be extracted is logged and skipped.
    /// Fields documents are always rewritten and are not counted in the
    /// stats. Cancellation is checked between files; whatever was written
    /// before is committed.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be written.
    pub fn add_to_index(
        &self,
        entries: &[BibEntry],
        cancel: &CancelToken,
    ) -> Result<IndexingStats, IndexError> {
        self.with_writer(|writer| {
            self.writer_view.reload()?;
            let searcher = self.writer_view.searcher();
            let mut stats = IndexingStats::default();

            'entries: for entry in entries {
                if cancel.is_cancelled() {
                    stats.cancelled = true;
                    break;
                }
                if !self.mirrored.is_empty() {
                    let doc_id = document_id(&entry.citation_key, "");
                    writer.delete_term(Term::from_field_text(self.fields.doc_id, &doc_id));
                    writer.add_document(self.fields_document(entry))?;
                }

                for file in &entry.files {
                    if cancel.is_cancelled() {
                        stats.cancelled = true;
                        break 'entries;
                    }
                    let path = self.resolve(file);
                    let link = file.link();

                    let version = match modification_stamp(&path) {
                        Ok(version) => version,
                        Err(e) => {
                            warn!(key = %entry.citation_key, path = %path.display(), error = %e, "skipping linked file");
                            stats.failed += 1;
                            continue;
                        }
                    };

                    let doc_id = document_id(&entry.citation_key, &link);
                    if self
                        .stored_version(&searcher, &doc_id)?
                        .is_some_and(|stored| stored >= version)
                    {
                        stats.unchanged += 1;
                        continue;
                    }

                    let extracted_text = match self.extractor.extract_text(&path) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(key = %entry.citation_key, path = %path.display(), error = %e, "could not extract text");
                            stats.failed += 1;
                            continue;
                        }
                    };

                    let document = IndexedDocument {
                        owner_key: entry.citation_key.clone(),
                        source_path: link,
                        extracted_text,
                        version,
                    };
                    writer.delete_term(Term::from_field_text(self.fields.doc_id, &doc_id));
                    writer.add_document(document.to_tantivy(self.fields))?;
                    stats.indexed += 1;
                }
            }

            writer.commit()?;
            debug!(?stats, "indexing run committed");
            Ok(stats)
        })
    }

    /// The document holding an entry's mirrored fields.
    fn fields_document(&self, entry: &BibEntry) -> TantivyDocument {
        let mut doc = TantivyDocument::new();
        doc.add_text(self.fields.doc_id, document_id(&entry.citation_key, ""));
        doc.add_text(self.fields.owner, &entry.citation_key);
        doc.add_text(self.fields.path, "");
        for (name, field) in &self.mirrored {
            if let Some(value) = entry.field(name) {
                doc.add_text(*field, value);
            }
        }
        doc
    }

    /// Run [`add_to_index`](Self::add_to_index) on a background thread.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Closed` after [`close_and_wait`](Self::close_and_wait),
    /// or an I/O error if the thread cannot be started.
    pub fn spawn_add_to_index(
        self: &Arc<Self>,
        entries: Vec<BibEntry>,
    ) -> Result<IndexingTask, IndexError> {
        if self.is_closed() {
            return Err(IndexError::Closed);
        }

        let cancel = CancelToken::new();
        let token = cancel.clone();
        let index = Arc::clone(self);
        let guard = InFlightGuard::enter(&self.in_flight);

        let handle = thread::Builder::new()
            .name("bibsearch-indexer".to_string())
            .spawn(move || {
                let _guard = guard;
                index.add_to_index(&entries, &token)
            })?;

        Ok(IndexingTask { cancel, handle })
    }

    /// Delete every document owned by `entry`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be written.
    pub fn remove_from_index(&self, entry: &BibEntry) -> Result<(), IndexError> {
        self.remove_owner(&entry.citation_key)
    }

    /// Delete every document owned by `citation_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be written.
    pub fn remove_owner(&self, citation_key: &str) -> Result<(), IndexError> {
        self.with_writer(|writer| {
            writer.delete_term(Term::from_field_text(self.fields.owner, citation_key));
            writer.commit()?;
            debug!(key = citation_key, "removed documents from index");
            Ok(())
        })
    }

    /// Bring the index in line with `entries`: drop documents for links and
    /// entries that no longer exist, then index new and changed files.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read or written.
    pub fn update_index(
        &self,
        entries: &[BibEntry],
        cancel: &CancelToken,
    ) -> Result<IndexingStats, IndexError> {
        let mut linked: HashSet<String> = entries
            .iter()
            .flat_map(|e| {
                e.files
                    .iter()
                    .map(move |f| document_id(&e.citation_key, &f.link()))
            })
            .collect();
        if !self.mirrored.is_empty() {
            linked.extend(entries.iter().map(|e| document_id(&e.citation_key, "")));
        }

        let removed = self.with_writer(|writer| {
            self.writer_view.reload()?;
            let searcher = self.writer_view.searcher();
            let mut removed = 0;
            for address in searcher.search(&AllQuery, &DocSetCollector)? {
                let doc: TantivyDocument = searcher.doc(address)?;
                let Some(doc_id) = doc.get_first(self.fields.doc_id).and_then(|v| v.as_str())
                else {
                    continue;
                };
                if !linked.contains(doc_id) {
                    writer.delete_term(Term::from_field_text(self.fields.doc_id, doc_id));
                    removed += 1;
                }
            }
            if removed > 0 {
                writer.commit()?;
            }
            Ok(removed)
        })?;

        let mut stats = self.add_to_index(entries, cancel)?;
        stats.removed = removed;
        info!(?stats, "index updated");
        Ok(stats)
    }

    /// Drop every document and index `entries` from scratch.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be written.
    pub fn rebuild(
        &self,
        entries: &[BibEntry],
        cancel: &CancelToken,
    ) -> Result<IndexingStats, IndexError> {
        self.with_writer(|writer| {
            writer.delete_all_documents()?;
            writer.commit()?;
            Ok(())
        })?;

        let stats = self.add_to_index(entries, cancel)?;
        if !stats.cancelled {
            self.needs_rebuild.store(false, Ordering::Release);
        }
        info!(?stats, "index rebuilt");
        Ok(stats)
    }

    /// Make every committed write visible to later snapshots.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader cannot reload.
    pub fn maybe_refresh_blocking(&self) -> Result<(), IndexError> {
        if self.is_closed() {
            return Err(IndexError::Closed);
        }
        self.reader.reload()?;
        Ok(())
    }

    /// Wait for background indexing to finish, then release the writer.
    ///
    /// Safe to call when nothing was ever indexed, and more than once.
    ///
    /// # Errors
    ///
    /// Returns an error if pending merges fail.
    pub fn close_and_wait(&self) -> Result<(), IndexError> {
        {
            let mut count = self.in_flight.count.lock();
            while *count > 0 {
                self.in_flight.idle.wait(&mut count);
            }
        }

        let writer = {
            let mut guard = self.writer.lock();
            self.closed.store(true, Ordering::Release);
            guard.take()
        };
        if let Some(writer) = writer {
            writer.wait_merging_threads()?;
        }
        debug!(path = %self.index_path.display(), "full-text index closed");
        Ok(())
    }

    fn stored_version(&self, searcher: &Searcher, doc_id: &str) -> Result<Option<u64>, IndexError> {
        let query = TermQuery::new(
            Term::from_field_text(self.fields.doc_id, doc_id),
            IndexRecordOption::Basic,
        );
        let hits = searcher.search(&query, &TopDocs::with_limit(1))?;
        let Some((_, address)) = hits.first() else {
            return Ok(None);
        };
        let doc: TantivyDocument = searcher.doc(*address)?;
        Ok(doc.get_first(self.fields.modified).and_then(|v| v.as_u64()))
    }

    /// Schema field answering queries on `field`.
    fn index_field(&self, field: &str) -> Result<Field, IndexError> {
        if translate::default_covers(field) {
            return Ok(self.fields.content);
        }
        self.mirrored
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, f)| *f)
            .ok_or_else(|| IndexError::UnsupportedField(field.to_string()))
    }

    /// Split text into index terms with `field`'s analyzer.
    fn tokens(&self, field: Field, text: &str) -> Result<Vec<String>, IndexError> {
        let mut analyzer = self.index.tokenizer_for_field(field)?;
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        Ok(tokens)
    }

    /// Substring of a word when the text is a single plain word; otherwise
    /// the words the analyzer keeps, in order.
    ///
    /// Punctuation never reaches the index, so `C++` searches the word `c`
    /// rather than every word containing a `c`.
    fn contains_query(&self, field: &str, text: &str) -> Result<Box<dyn Query>, IndexError> {
        let field = self.index_field(field)?;
        let tokens = self.tokens(field, text)?;
        Ok(match tokens.as_slice() {
            [] => Box::new(EmptyQuery),
            [token] if *token == text.trim().to_lowercase() => Box::new(RegexQuery::from_pattern(
                &format!(".*{}.*", regex::escape(token)),
                field,
            )?),
            _ => phrase(field, &tokens),
        })
    }

    fn phrase_query(&self, field: &str, text: &str) -> Result<Box<dyn Query>, IndexError> {
        let field = self.index_field(field)?;
        Ok(phrase(field, &self.tokens(field, text)?))
    }

    fn regex_query(&self, field: &str, pattern: &str) -> Result<Box<dyn Query>, IndexError> {
        let field = self.index_field(field)?;
        RegexQuery::from_pattern(&term_pattern(pattern), field)
            .map(|q| Box::new(q) as Box<dyn Query>)
            .map_err(|e| IndexError::UnsupportedPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
    }
}

fn phrase(field: Field, tokens: &[String]) -> Box<dyn Query> {
    let terms: Vec<Term> = tokens
        .iter()
        .map(|t| Term::from_field_text(field, t))
        .collect();
    match terms.len() {
        0 => Box::new(EmptyQuery),
        1 => Box::new(TermQuery::new(
            terms[0].clone(),
            IndexRecordOption::Basic,
        )),
        _ => Box::new(PhraseQuery::new(terms)),
    }
}

/// Regex over single index terms, searched rather than fully matched.
///
/// A leading `^` or trailing `$` anchors to the start or end of a word.
fn term_pattern(pattern: &str) -> String {
    let (start, body) = match pattern.strip_prefix('^') {
        Some(rest) => ("", rest),
        None => (".*", pattern),
    };
    let (body, end) = match body.strip_suffix('$') {
        Some(rest) if !rest.ends_with('\\') => (rest, ""),
        _ => (body, ".*"),
    };
    format!("(?i){start}(?:{body}){end}")
}

fn modification_stamp(path: &Path) -> std::io::Result<u64> {
    let modified = fs::metadata(path)?.modified()?;
    let nanos = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    Ok(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Returns true if the directory holds an index of the current format and
/// mirrored fields. Anything else is cleared so a fresh index can be created
/// in its place.
fn prepare_directory(index_path: &Path, mirrored: &[String]) -> Result<bool, IndexError> {
    if !index_path.exists() {
        fs::create_dir_all(index_path)?;
        return Ok(false);
    }

    let meta_path = index_path.join(META_FILE);
    if meta_path.exists() {
        let meta = fs::read_to_string(&meta_path)
            .ok()
            .and_then(|s| serde_json::from_str::<IndexMeta>(&s).ok());
        match meta {
            Some(m) if m.format_version == INDEX_FORMAT_VERSION && m.mirrored_fields == mirrored => {
                return Ok(true);
            }
            Some(m) if m.format_version == INDEX_FORMAT_VERSION => {
                warn!(path = %index_path.display(), "mirrored fields changed, rebuilding index");
            }
            _ => warn!(path = %index_path.display(), "index format changed, rebuilding"),
        }
    } else if fs::read_dir(index_path)?.next().is_some() && !index_path.join("meta.json").exists() {
        return Err(IndexError::ForeignDirectory(index_path.to_path_buf()));
    }

    fs::remove_dir_all(index_path)?;
    fs::create_dir_all(index_path)?;
    Ok(false)
}

fn write_meta(index_path: &Path, mirrored: &[String]) -> Result<(), IndexError> {
    let meta = IndexMeta {
        format_version: INDEX_FORMAT_VERSION,
        mirrored_fields: mirrored.to_vec(),
    };
    fs::write(index_path.join(META_FILE), serde_json::to_string_pretty(&meta)?)?;
    Ok(())
}

impl ContentIndex for FullTextIndex {
    fn covers_field(&self, field: &str) -> bool {
        translate::default_covers(field) || self.mirrored.iter().any(|(name, _)| name == field)
    }

    fn check_pattern(&self, pattern: &str) -> Result<(), IndexError> {
        self.regex_query(translate::CONTENT_FIELD, pattern).map(|_| ())
    }

    fn snapshot(&self) -> Result<Box<dyn IndexSnapshot + '_>, IndexError> {
        if self.is_closed() {
            return Err(IndexError::Closed);
        }
        Ok(Box::new(Snapshot {
            index: self,
            searcher: self.reader.searcher(),
        }))
    }
}

struct Snapshot<'a> {
    index: &'a FullTextIndex,
    searcher: Searcher,
}

impl Snapshot<'_> {
    /// Owners of the documents matching one leaf.
    fn leaf_owners(&self, query: &dyn Query) -> Result<HashSet<String>, IndexError> {
        let addresses = self.searcher.search(query, &DocSetCollector)?;

        let mut owners = HashSet::new();
        for address in addresses {
            let doc: TantivyDocument = self.searcher.doc(address)?;
            if let Some(owner) = doc.get_first(self.index.fields.owner).and_then(|v| v.as_str()) {
                owners.insert(owner.to_string());
            }
        }
        Ok(owners)
    }
}

impl IndexSnapshot for Snapshot<'_> {
    fn owners_matching(&self, query: &IndexQuery) -> Result<HashSet<String>, IndexError> {
        let owners = match query {
            IndexQuery::Contains { field, text } => {
                self.leaf_owners(&*self.index.contains_query(field, text)?)?
            }
            IndexQuery::Phrase { field, text } => {
                self.leaf_owners(&*self.index.phrase_query(field, text)?)?
            }
            IndexQuery::Regex { field, pattern } => {
                self.leaf_owners(&*self.index.regex_query(field, pattern)?)?
            }
            IndexQuery::And { children } => {
                let mut owners: Option<HashSet<String>> = None;
                for child in children {
                    let matched = self.owners_matching(child)?;
                    let current = match owners.take() {
                        None => matched,
                        Some(mut previous) => {
                            previous.retain(|key| matched.contains(key));
                            previous
                        }
                    };
                    if current.is_empty() {
                        return Ok(current);
                    }
                    owners = Some(current);
                }
                owners.unwrap_or_default()
            }
            IndexQuery::Or { children } => {
                let mut owners = HashSet::new();
                for child in children {
                    owners.extend(self.owners_matching(child)?);
                }
                owners
            }
        };
        debug!(?query, owners = owners.len(), "index query");
        Ok(owners)
    }
}
