//! Command implementations used by the CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::extract::PlainTextExtractor;
use crate::library::Library;
use crate::query::{SearchFlag, SearchQuery, parse};
use crate::search::fulltext::{CancelToken, IndexingStats};
use crate::search::{
    ContentIndex, FullTextIndex, HybridSearcher, MatchedLocation, SearchError,
    UnavailableIndexPolicy,
};

/// Options for a search from the command line, on top of configured defaults.
#[derive(Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct SearchOptions {
    pub fulltext: bool,
    pub case_sensitive: bool,
    pub regex: bool,
    /// Skip reloading the index, accepting a stale view.
    pub no_refresh: bool,
}

/// One matching entry.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub key: String,
    pub entry_type: String,
    pub title: Option<String>,
    pub locations: Vec<MatchedLocation>,
}

/// Load the library named on the command line, or the configured one.
///
/// # Errors
///
/// Returns an error if the library cannot be loaded.
pub fn load_library(config: &Config, library: Option<&Path>) -> anyhow::Result<Library> {
    let path = library.map_or_else(|| config.library_path(), Path::to_path_buf);
    Ok(Library::load(&path)?)
}

fn index_path(config: &Config, library: &Library) -> anyhow::Result<PathBuf> {
    config.index_dir(&library.name())
}

fn open_index(config: &Config, library: &Library) -> anyhow::Result<FullTextIndex> {
    let path = index_path(config, library)?;
    Ok(FullTextIndex::open(
        &path,
        &library.root,
        Arc::new(PlainTextExtractor::new()),
        &config.index.fields,
    )?)
}

/// Open the index for searching without creating one that does not exist.
fn open_index_for_search(
    config: &Config,
    library: &Library,
    refresh: bool,
) -> anyhow::Result<FullTextIndex> {
    let path = index_path(config, library)?;
    if !path.exists() {
        anyhow::bail!(
            "No index found at {}. Run `bibsearch index` first.",
            path.display()
        );
    }
    let index = open_index(config, library)?;
    if index.needs_rebuild() {
        warn!(path = %path.display(), "full-text index is empty; run `bibsearch index`");
    }
    if refresh {
        index.maybe_refresh_blocking()?;
    }
    Ok(index)
}

/// Search the library.
///
/// # Errors
///
/// Returns an error if the library cannot be loaded, the query is invalid,
/// or the search fails. With the `degrade` policy an unusable index only
/// logs a warning.
pub fn search(
    config: &Config,
    library: Option<&Path>,
    expression: &str,
    options: &SearchOptions,
) -> anyhow::Result<Vec<SearchHit>> {
    let library = load_library(config, library)?;

    let mut flags = config.search.flags();
    if options.fulltext {
        flags.set(SearchFlag::Fulltext, true);
    }
    if options.case_sensitive {
        flags.set(SearchFlag::CaseSensitive, true);
    }
    if options.regex {
        flags.set(SearchFlag::RegularExpression, true);
    }

    let query = SearchQuery::with_empty_policy(expression, flags, config.search.empty_query);
    if let Some(e) = query.error() {
        anyhow::bail!("Invalid query '{expression}': {e}");
    }

    let refresh = config.search.refresh && !options.no_refresh;
    let index = if query.flags().fulltext() {
        match open_index_for_search(config, &library, refresh) {
            Ok(index) => Some(index),
            Err(e) if config.search.unavailable_index == UnavailableIndexPolicy::Error => {
                return Err(e);
            }
            Err(e) => {
                warn!(error = %e, "full-text index unavailable");
                None
            }
        }
    } else {
        None
    };

    let searcher = HybridSearcher::new(index.as_ref().map(|i| i as &dyn ContentIndex))
        .with_policy(config.search.unavailable_index);
    let results = match searcher.search(&query, library.entries()) {
        Ok(results) => results,
        Err(SearchError::InvalidQuery(e)) => anyhow::bail!("Invalid query '{expression}': {e}"),
        Err(e) => return Err(e.into()),
    };

    if let Some(index) = &index {
        index.close_and_wait()?;
    }

    let hits = library
        .entries()
        .iter()
        .filter(|entry| results.contains(&entry.citation_key))
        .map(|entry| SearchHit {
            key: entry.citation_key.clone(),
            entry_type: entry.entry_type.clone(),
            title: entry.field("title").map(str::to_string),
            locations: results
                .explanation(&entry.citation_key)
                .map(<[_]>::to_vec)
                .unwrap_or_default(),
        })
        .collect();

    Ok(hits)
}

/// Bring the full-text index up to date with the library.
///
/// # Errors
///
/// Returns an error if the library or index cannot be opened or written.
pub fn index(config: &Config, library: Option<&Path>) -> anyhow::Result<IndexingStats> {
    let library = load_library(config, library)?;
    let index = open_index(config, &library)?;

    let stats = index.update_index(library.entries(), &CancelToken::new())?;
    index.close_and_wait()?;

    info!(path = %index.index_path().display(), "indexed library");
    Ok(stats)
}

/// Recreate the full-text index from scratch.
///
/// Works on an index that can no longer be opened.
///
/// # Errors
///
/// Returns an error if the index directory cannot be recreated or written.
pub fn rebuild(config: &Config, library: Option<&Path>) -> anyhow::Result<IndexingStats> {
    let library = load_library(config, library)?;
    let path = index_path(config, &library)?;
    let index = FullTextIndex::recreate(
        &path,
        &library.root,
        Arc::new(PlainTextExtractor::new()),
        &config.index.fields,
    )?;

    let stats = index.rebuild(library.entries(), &CancelToken::new())?;
    index.close_and_wait()?;
    Ok(stats)
}

/// Remove an entry's documents from the full-text index.
///
/// Returns whether the key belongs to an entry of the library; documents are
/// removed either way.
///
/// # Errors
///
/// Returns an error if the index cannot be opened or written.
pub fn remove(config: &Config, library: Option<&Path>, key: &str) -> anyhow::Result<bool> {
    let library = load_library(config, library)?;
    let index = open_index(config, &library)?;

    index.remove_owner(key)?;
    index.close_and_wait()?;
    Ok(library.entry(key).is_some())
}

/// Parse a query and render its syntax tree as pretty JSON.
///
/// # Errors
///
/// Returns an error if the query does not parse.
pub fn parse_query(expression: &str) -> anyhow::Result<String> {
    let node = parse(expression).map_err(|e| anyhow::anyhow!("Invalid query '{expression}': {e}"))?;
    Ok(serde_json::to_string_pretty(&node)?)
}
