//! Search queries: flags, parsing, and validity.
//!
//! A [`SearchQuery`] is built once per search from an expression and a set
//! of [`SearchFlag`]s. Parse errors never escape this module; they are kept on
//! the query and reported through [`SearchQuery::is_valid`] and
//! [`SearchQuery::error`].

pub mod ast;
pub mod parser;

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::search::matcher;

pub use ast::{BoolOp, FieldRef, Node, Term, TermOperator};
pub use parser::{ParseError, parse};

/// Options that change how a query is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchFlag {
    /// Compare text case-sensitively.
    CaseSensitive,
    /// Treat substring terms as regular expressions.
    RegularExpression,
    /// Also search the content of linked documents.
    Fulltext,
}

/// A set of [`SearchFlag`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchFlags(BTreeSet<SearchFlag>);

impl SearchFlags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, flag: SearchFlag) -> Self {
        self.0.insert(flag);
        self
    }

    #[must_use]
    pub fn without(mut self, flag: SearchFlag) -> Self {
        self.0.remove(&flag);
        self
    }

    pub fn set(&mut self, flag: SearchFlag, enabled: bool) {
        if enabled {
            self.0.insert(flag);
        } else {
            self.0.remove(&flag);
        }
    }

    #[must_use]
    pub fn contains(&self, flag: SearchFlag) -> bool {
        self.0.contains(&flag)
    }

    #[must_use]
    pub fn case_sensitive(&self) -> bool {
        self.contains(SearchFlag::CaseSensitive)
    }

    #[must_use]
    pub fn regular_expression(&self) -> bool {
        self.contains(SearchFlag::RegularExpression)
    }

    #[must_use]
    pub fn fulltext(&self) -> bool {
        self.contains(SearchFlag::Fulltext)
    }
}

impl FromIterator<SearchFlag> for SearchFlags {
    fn from_iter<I: IntoIterator<Item = SearchFlag>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What an empty or whitespace-only expression means.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmptyQueryPolicy {
    /// An empty query is valid and matches every entry.
    #[default]
    MatchAll,
    /// An empty query is invalid.
    Invalid,
}

/// Why a query is not valid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("invalid regular expression '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("pattern '{pattern}' cannot be searched in the full-text index: {message}")]
    UnsupportedIndexPattern { pattern: String, message: String },
}

/// A query expression together with its flags and parse outcome.
///
/// Two queries are equal when their expression and flags are equal; the
/// parsed tree does not take part in equality.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    expression: String,
    flags: SearchFlags,
    ast: Option<Node>,
    error: Option<QueryError>,
}

impl SearchQuery {
    /// Parse `expression` with the default empty-query policy.
    pub fn new(expression: impl Into<String>, flags: SearchFlags) -> Self {
        Self::with_empty_policy(expression, flags, EmptyQueryPolicy::default())
    }

    /// Parse `expression`, deciding what an empty expression means.
    pub fn with_empty_policy(
        expression: impl Into<String>,
        flags: SearchFlags,
        empty: EmptyQueryPolicy,
    ) -> Self {
        let expression = expression.into();

        let (ast, error) = match parser::parse(&expression) {
            Ok(node) => match matcher::compile(&node, &flags) {
                Ok(_) => (Some(node), None),
                Err(e) => (None, Some(e)),
            },
            Err(ParseError::Empty) if empty == EmptyQueryPolicy::MatchAll => (None, None),
            Err(e) => (None, Some(QueryError::Parse(e))),
        };

        if let Some(e) = &error {
            tracing::debug!(expression = %expression, error = %e, "query is not valid");
        }

        Self {
            expression,
            flags,
            ast,
            error,
        }
    }

    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    #[must_use]
    pub fn flags(&self) -> &SearchFlags {
        &self.flags
    }

    /// The parsed tree; `None` for an invalid query or a match-all empty query.
    #[must_use]
    pub fn ast(&self) -> Option<&Node> {
        self.ast.as_ref()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    /// Valid and without a tree: every entry matches.
    #[must_use]
    pub fn matches_all(&self) -> bool {
        self.is_valid() && self.ast.is_none()
    }

    #[must_use]
    pub fn error(&self) -> Option<&QueryError> {
        self.error.as_ref()
    }
}

impl PartialEq for SearchQuery {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression && self.flags == other.flags
    }
}

impl Eq for SearchQuery {}

impl Hash for SearchQuery {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.expression.hash(state);
        self.flags.hash(state);
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_query_has_ast() {
        let query = SearchQuery::new("year:2001", SearchFlags::new());
        assert!(query.is_valid());
        assert!(query.ast().is_some());
        assert!(!query.matches_all());
    }

    #[test]
    fn invalid_query_has_no_ast() {
        let query = SearchQuery::new("(year:2001", SearchFlags::new());
        assert!(!query.is_valid());
        assert!(query.ast().is_none());
        assert!(matches!(
            query.error(),
            Some(QueryError::Parse(ParseError::UnbalancedParen { .. }))
        ));
    }

    #[test]
    fn empty_query_match_all_policy() {
        let query = SearchQuery::with_empty_policy("  ", SearchFlags::new(), EmptyQueryPolicy::MatchAll);
        assert!(query.is_valid());
        assert!(query.matches_all());
    }

    #[test]
    fn empty_query_invalid_policy() {
        let query = SearchQuery::with_empty_policy("", SearchFlags::new(), EmptyQueryPolicy::Invalid);
        assert!(!query.is_valid());
        assert_eq!(query.error(), Some(&QueryError::Parse(ParseError::Empty)));
    }

    #[test]
    fn regex_flag_validates_substring_terms() {
        let plain = SearchQuery::new("title:\"a(b\"", SearchFlags::new());
        assert!(plain.is_valid());

        let regex = SearchQuery::new(
            "title:\"a(b\"",
            SearchFlags::new().with(SearchFlag::RegularExpression),
        );
        assert!(!regex.is_valid());
        assert!(matches!(regex.error(), Some(QueryError::InvalidRegex { .. })));
    }

    #[test]
    fn equality_ignores_ast_identity() {
        let flags = SearchFlags::new().with(SearchFlag::Fulltext);
        let a = SearchQuery::new("a OR b", flags.clone());
        let b = SearchQuery::new("a OR b", flags);
        assert_eq!(a, b);

        let c = SearchQuery::new("a OR b", SearchFlags::new());
        assert_ne!(a, c);
    }

    #[test]
    fn flags_set_and_clear() {
        let mut flags = SearchFlags::new().with(SearchFlag::CaseSensitive);
        assert!(flags.case_sensitive());
        flags.set(SearchFlag::CaseSensitive, false);
        assert!(!flags.case_sensitive());
        flags.set(SearchFlag::Fulltext, true);
        assert!(flags.fulltext());
        assert!(!flags.clone().without(SearchFlag::Fulltext).fulltext());
    }
}
