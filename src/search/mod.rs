//! Search over bibliography entries.
//!
//! [`hybrid::HybridSearcher`] is the entry point. It evaluates metadata
//! predicates with [`matcher`] and hands content predicates to a
//! [`ContentIndex`], which [`fulltext::FullTextIndex`] implements on tantivy.

pub mod fulltext;
pub mod hybrid;
pub mod matcher;
pub mod translate;

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::QueryError;

pub use fulltext::{FullTextIndex, IndexError};
pub use hybrid::HybridSearcher;
pub use translate::IndexQuery;

/// A store of linked-document content that can answer [`IndexQuery`]s.
pub trait ContentIndex: Send + Sync {
    /// Whether the index stores content for `field`.
    fn covers_field(&self, field: &str) -> bool;

    /// Check that the index can run `pattern` from an [`IndexQuery::Regex`].
    ///
    /// # Errors
    ///
    /// Returns an error describing why the pattern is not supported.
    fn check_pattern(&self, _pattern: &str) -> Result<(), IndexError> {
        Ok(())
    }

    /// A point-in-time view of the index.
    ///
    /// Writes made after the snapshot was taken are not visible through it.
    ///
    /// # Errors
    ///
    /// Returns an error if the index can no longer be read.
    fn snapshot(&self) -> Result<Box<dyn IndexSnapshot + '_>, IndexError>;
}

/// A point-in-time view of a [`ContentIndex`].
pub trait IndexSnapshot {
    /// Citation keys of the entries that satisfy `query`.
    ///
    /// Each leaf is met by any one of an entry's documents; `And` and `Or`
    /// combine entries, not documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the query cannot be executed.
    fn owners_matching(&self, query: &IndexQuery) -> Result<HashSet<String>, IndexError>;
}

/// What to do when a full-text search is requested but no index is usable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnavailableIndexPolicy {
    /// Answer from metadata only and log a warning.
    #[default]
    Degrade,
    /// Fail the search with [`SearchError::IndexUnavailable`].
    Error,
}

/// Where a match was found.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedLocation {
    /// A metadata field, by lower-cased name.
    Field(String),
    /// The content of a linked document.
    Content,
}

/// The outcome of a search.
///
/// Equality only considers which entries matched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResults {
    matched: BTreeSet<String>,
    explanation: BTreeMap<String, Vec<MatchedLocation>>,
}

impl SearchResults {
    /// Results matching the given citation keys, without explanations.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            matched: keys.into_iter().map(Into::into).collect(),
            explanation: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, key: &str, mut locations: Vec<MatchedLocation>) {
        self.matched.insert(key.to_string());
        if !locations.is_empty() {
            locations.sort();
            locations.dedup();
            self.explanation.insert(key.to_string(), locations);
        }
    }

    /// Matched citation keys, sorted.
    #[must_use]
    pub fn matched(&self) -> &BTreeSet<String> {
        &self.matched
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.matched.contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.matched.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matched.is_empty()
    }

    /// Where the query matched for `key`, if recorded.
    #[must_use]
    pub fn explanation(&self, key: &str) -> Option<&[MatchedLocation]> {
        self.explanation.get(key).map(Vec::as_slice)
    }
}

impl PartialEq for SearchResults {
    fn eq(&self, other: &Self) -> bool {
        self.matched == other.matched
    }
}

impl Eq for SearchResults {}

/// Errors returned by a search.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid query: {0}")]
    InvalidQuery(#[source] QueryError),

    #[error("full-text index is unavailable: {reason}")]
    IndexUnavailable { reason: String },

    #[error(transparent)]
    Index(#[from] IndexError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_equality_ignores_explanation() {
        let mut a = SearchResults::default();
        a.insert("E1", vec![MatchedLocation::Content]);
        let b = SearchResults::from_keys(["E1"]);
        assert_eq!(a, b);
        assert_eq!(a.explanation("E1"), Some(&[MatchedLocation::Content][..]));
        assert_eq!(b.explanation("E1"), None);
    }

    #[test]
    fn insert_dedups_locations() {
        let mut results = SearchResults::default();
        results.insert(
            "E1",
            vec![
                MatchedLocation::Field("title".into()),
                MatchedLocation::Content,
                MatchedLocation::Field("title".into()),
            ],
        );
        assert_eq!(results.explanation("E1").map(<[_]>::len), Some(2));
    }

    #[test]
    fn unavailable_error_message() {
        let err = SearchError::IndexUnavailable {
            reason: "index is closed".into(),
        };
        assert_eq!(err.to_string(), "full-text index is unavailable: index is closed");
    }
}
