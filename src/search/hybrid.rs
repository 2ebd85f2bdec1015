//! Hybrid search coordinator.
//!
//! Without `FULLTEXT` every entry is checked by the structured matcher alone.
//! With it, the query tree is planned once: each maximal index-answerable
//! subtree becomes one index query, each remaining leaf a metadata matcher,
//! and a term touching both becomes the OR of the two. Every index query runs
//! once against a single snapshot; entries are then evaluated by plain boolean
//! algebra over the answers, so a node means the same thing whichever backend
//! resolved its children.
//!
//! A regex the index cannot run makes an index-only subtree invalid; for a
//! term that also searches metadata, only the content half is dropped.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::library::BibEntry;
use crate::query::{BoolOp, Node, QueryError, SearchFlags, SearchQuery};
use crate::search::matcher::{self, Scope, TermMatcher};
use crate::search::translate::{self, IndexQuery, Resolution};
use crate::search::{
    ContentIndex, IndexError, MatchedLocation, SearchError, SearchResults, UnavailableIndexPolicy,
};

/// Runs [`SearchQuery`]s over entries, consulting a content index when the
/// query asks for full-text search.
#[derive(Clone, Copy)]
pub struct HybridSearcher<'a> {
    index: Option<&'a dyn ContentIndex>,
    policy: UnavailableIndexPolicy,
}

impl<'a> HybridSearcher<'a> {
    #[must_use]
    pub fn new(index: Option<&'a dyn ContentIndex>) -> Self {
        Self {
            index,
            policy: UnavailableIndexPolicy::default(),
        }
    }

    /// A searcher with no content index.
    #[must_use]
    pub fn metadata_only() -> Self {
        Self::new(None)
    }

    #[must_use]
    pub fn with_policy(mut self, policy: UnavailableIndexPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Search `entries` for `query`.
    ///
    /// A valid empty query matches every entry.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::InvalidQuery` for an invalid query (nothing is
    /// searched), `SearchError::IndexUnavailable` when the index is needed,
    /// cannot be read and the policy is [`UnavailableIndexPolicy::Error`],
    /// and `SearchError::Index` if an index query fails.
    pub fn search(
        &self,
        query: &SearchQuery,
        entries: &[BibEntry],
    ) -> Result<SearchResults, SearchError> {
        if let Some(error) = query.error() {
            return Err(SearchError::InvalidQuery(error.clone()));
        }
        let Some(ast) = query.ast() else {
            return Ok(SearchResults::from_keys(
                entries.iter().map(|e| e.citation_key.clone()),
            ));
        };

        if !query.flags().fulltext() {
            let matcher = matcher::compile(ast, query.flags()).map_err(SearchError::InvalidQuery)?;
            let mut results = SearchResults::default();
            for entry in entries {
                if let Some(locations) = matcher.explain(entry) {
                    results.insert(&entry.citation_key, locations);
                }
            }
            return Ok(results);
        }

        let covers = |field: &str| match self.index {
            Some(index) => index.covers_field(field),
            None => translate::default_covers(field),
        };
        let (plan, slots) = self.plan(ast, query.flags(), &covers)?;
        debug!(expression = %query, index_queries = slots.len(), "planned hybrid search");

        let (plan, answers) = match self.answer(&slots)? {
            Some(answers) => (plan, answers),
            None => {
                // Mirrored fields are matched from metadata when the index is gone.
                let (plan, slots) = self.plan(ast, query.flags(), &translate::default_covers)?;
                (plan, vec![HashSet::new(); slots.len()])
            }
        };

        let mut results = SearchResults::default();
        for entry in entries {
            let mut locations = Vec::new();
            if plan.eval(entry, &answers, &mut locations) {
                results.insert(&entry.citation_key, locations);
            }
        }
        Ok(results)
    }

    fn plan(
        &self,
        ast: &Node,
        flags: &SearchFlags,
        covers: &dyn Fn(&str) -> bool,
    ) -> Result<(Plan, Vec<IndexQuery>), SearchError> {
        let mut planner = Planner {
            flags,
            covers,
            index: self.index,
            slots: Vec::new(),
            slot_ids: HashMap::new(),
        };
        let plan = planner.plan(ast).map_err(SearchError::InvalidQuery)?;
        Ok((plan, planner.slots))
    }

    /// Run each index query once against one snapshot.
    ///
    /// Returns `None` when the index cannot be read and the policy degrades.
    fn answer(&self, slots: &[IndexQuery]) -> Result<Option<Vec<HashSet<String>>>, SearchError> {
        if slots.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let snapshot = match self.index {
            None => Err("no full-text index is open".to_string()),
            Some(index) => index.snapshot().map_err(|e| e.to_string()),
        };

        match snapshot {
            Ok(snapshot) => slots
                .iter()
                .map(|q| snapshot.owners_matching(q).map_err(SearchError::from))
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Err(reason) => match self.policy {
                UnavailableIndexPolicy::Error => Err(SearchError::IndexUnavailable { reason }),
                UnavailableIndexPolicy::Degrade => {
                    warn!(%reason, "full-text index unavailable, searching metadata only");
                    Ok(None)
                }
            },
        }
    }
}

struct Planner<'q> {
    flags: &'q SearchFlags,
    covers: &'q dyn Fn(&str) -> bool,
    index: Option<&'q dyn ContentIndex>,
    slots: Vec<IndexQuery>,
    slot_ids: HashMap<IndexQuery, usize>,
}

impl Planner<'_> {
    /// Check that the index can run every regex in `query`.
    fn supported(&self, query: &IndexQuery) -> Result<(), QueryError> {
        let Some(index) = self.index else {
            return Ok(());
        };
        for pattern in query.regex_patterns() {
            index.check_pattern(pattern).map_err(|e| {
                let message = match e {
                    IndexError::UnsupportedPattern { message, .. } => message,
                    other => other.to_string(),
                };
                QueryError::UnsupportedIndexPattern {
                    pattern: pattern.to_string(),
                    message,
                }
            })?;
        }
        Ok(())
    }

    fn slot(&mut self, query: IndexQuery) -> usize {
        if let Some(&id) = self.slot_ids.get(&query) {
            return id;
        }
        let id = self.slots.len();
        self.slots.push(query.clone());
        self.slot_ids.insert(query, id);
        id
    }

    fn plan(&mut self, node: &Node) -> Result<Plan, QueryError> {
        if let Some(query) = translate::translate(node, self.flags, self.covers) {
            self.supported(&query)?;
            return Ok(Plan::Index(self.slot(query)));
        }

        match node {
            Node::Term(term) => {
                if translate::classify(node, self.covers) == Resolution::Metadata {
                    return Ok(Plan::Metadata(TermMatcher::compile(term, self.flags)?));
                }

                let scope = match &term.field {
                    None => Scope::Any,
                    Some(field) => Scope::Fields(
                        field
                            .names()
                            .iter()
                            .filter(|name| !(self.covers)(name.as_str()))
                            .cloned()
                            .collect(),
                    ),
                };
                let metadata = TermMatcher::with_scope(term, scope, self.flags)?;
                match translate::content_leaf(term, self.flags, self.covers) {
                    Some(query) => match self.supported(&query) {
                        Ok(()) => Ok(Plan::Either {
                            metadata,
                            index: self.slot(query),
                        }),
                        Err(e) => {
                            warn!(error = %e, "searching metadata only for this term");
                            Ok(Plan::Metadata(metadata))
                        }
                    },
                    None => Ok(Plan::Metadata(metadata)),
                }
            }
            Node::Boolean { op, children } => {
                let mut plans = children
                    .iter()
                    .map(|c| self.plan(c))
                    .collect::<Result<Vec<_>, _>>()?;
                if plans.len() == 1 {
                    return Ok(plans.swap_remove(0));
                }
                Ok(match op {
                    BoolOp::And => Plan::And(plans),
                    BoolOp::Or => Plan::Or(plans),
                })
            }
            // Taken per entry: an entry with no linked documents satisfies
            // NOT content:x.
            Node::Not { child } => Ok(Plan::Not(Box::new(self.plan(child)?))),
        }
    }
}

/// How each node of the query tree is resolved.
enum Plan {
    Metadata(TermMatcher),
    Index(usize),
    /// A term answered by metadata OR content.
    Either {
        metadata: TermMatcher,
        index: usize,
    },
    And(Vec<Plan>),
    Or(Vec<Plan>),
    Not(Box<Plan>),
}

impl Plan {
    fn eval(
        &self,
        entry: &BibEntry,
        answers: &[HashSet<String>],
        locations: &mut Vec<MatchedLocation>,
    ) -> bool {
        match self {
            Plan::Metadata(term) => Plan::eval_term(term, entry, locations),
            Plan::Index(slot) => {
                let matched = answers
                    .get(*slot)
                    .is_some_and(|owners| owners.contains(&entry.citation_key));
                if matched {
                    locations.push(MatchedLocation::Content);
                }
                matched
            }
            Plan::Either { metadata, index } => {
                let in_metadata = Plan::eval_term(metadata, entry, locations);
                let in_content = Plan::Index(*index).eval(entry, answers, locations);
                in_metadata || in_content
            }
            Plan::And(children) => {
                let mut found = Vec::new();
                for child in children {
                    if !child.eval(entry, answers, &mut found) {
                        return false;
                    }
                }
                locations.append(&mut found);
                true
            }
            Plan::Or(children) => {
                let mut any = false;
                for child in children {
                    any |= child.eval(entry, answers, locations);
                }
                any
            }
            Plan::Not(child) => !child.eval(entry, answers, &mut Vec::new()),
        }
    }

    fn eval_term(term: &TermMatcher, entry: &BibEntry, locations: &mut Vec<MatchedLocation>) -> bool {
        let fields = term.matched_fields(entry);
        let matched = !fields.is_empty();
        locations.extend(fields.into_iter().map(MatchedLocation::Field));
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{EmptyQueryPolicy, SearchFlag};
    use crate::search::IndexSnapshot;
    use regex::Regex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory content index: one text per document, keyed by owner.
    ///
    /// Mirrored metadata is stored as `(owner, field, value)`; leaves are
    /// matched per document and `And`/`Or` combine owners.
    struct FakeIndex {
        documents: Vec<(String, String)>,
        mirrored: Vec<(String, String, String)>,
        rejects_word_boundaries: bool,
        queries: AtomicUsize,
        snapshots: AtomicUsize,
        available: bool,
    }

    impl FakeIndex {
        fn new(documents: &[(&str, &str)]) -> Self {
            Self {
                documents: documents
                    .iter()
                    .map(|(k, t)| ((*k).to_string(), (*t).to_string()))
                    .collect(),
                mirrored: Vec::new(),
                rejects_word_boundaries: false,
                queries: AtomicUsize::new(0),
                snapshots: AtomicUsize::new(0),
                available: true,
            }
        }

        fn unavailable() -> Self {
            Self {
                available: false,
                ..Self::new(&[])
            }
        }

        fn mirroring(mut self, entries: &[BibEntry], field: &str) -> Self {
            for entry in entries {
                if let Some(value) = entry.field(field) {
                    self.mirrored
                        .push((entry.citation_key.clone(), field.to_string(), value.to_string()));
                }
            }
            self
        }

        fn texts<'a>(&'a self, field: &'a str) -> Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a> {
            if translate::default_covers(field) {
                Box::new(self.documents.iter().map(|(k, t)| (k.as_str(), t.as_str())))
            } else {
                Box::new(
                    self.mirrored
                        .iter()
                        .filter(move |(_, f, _)| f == field)
                        .map(|(k, _, v)| (k.as_str(), v.as_str())),
                )
            }
        }

        fn owners(&self, query: &IndexQuery) -> HashSet<String> {
            let leaf = |field: &str, test: &dyn Fn(&str) -> bool| -> HashSet<String> {
                self.texts(field)
                    .filter(|(_, text)| test(&text.to_lowercase()))
                    .map(|(key, _)| key.to_string())
                    .collect()
            };
            match query {
                IndexQuery::Contains { field, text } | IndexQuery::Phrase { field, text } => {
                    let text = text.to_lowercase();
                    leaf(field.as_str(), &|t| t.contains(&text))
                }
                IndexQuery::Regex { field, pattern } => {
                    let regex = Regex::new(&format!("(?i){pattern}")).unwrap();
                    leaf(field.as_str(), &|t| regex.is_match(t))
                }
                IndexQuery::And { children } => children
                    .iter()
                    .map(|c| self.owners(c))
                    .reduce(|a, b| a.intersection(&b).cloned().collect())
                    .unwrap_or_default(),
                IndexQuery::Or { children } => children.iter().flat_map(|c| self.owners(c)).collect(),
            }
        }
    }

    impl ContentIndex for FakeIndex {
        fn covers_field(&self, field: &str) -> bool {
            translate::default_covers(field) || self.mirrored.iter().any(|(_, f, _)| f == field)
        }

        fn check_pattern(&self, pattern: &str) -> Result<(), IndexError> {
            if self.rejects_word_boundaries && pattern.contains("\\b") {
                return Err(IndexError::UnsupportedPattern {
                    pattern: pattern.to_string(),
                    message: "word boundaries are not supported".into(),
                });
            }
            Ok(())
        }

        fn snapshot(&self) -> Result<Box<dyn IndexSnapshot + '_>, IndexError> {
            if !self.available {
                return Err(IndexError::Closed);
            }
            self.snapshots.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSnapshot(self)))
        }
    }

    struct FakeSnapshot<'a>(&'a FakeIndex);

    impl IndexSnapshot for FakeSnapshot<'_> {
        fn owners_matching(&self, query: &IndexQuery) -> Result<HashSet<String>, IndexError> {
            self.0.queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.0.owners(query))
        }
    }

    fn entries() -> Vec<BibEntry> {
        vec![
            BibEntry::new("E1")
                .with_field("year", "2001")
                .with_field("title", "Marine finfish"),
            BibEntry::new("E2")
                .with_field("year", "2002")
                .with_field("title", "Other"),
            BibEntry::new("E3").with_field("author", "Jane Name"),
        ]
    }

    fn fake() -> FakeIndex {
        FakeIndex::new(&[
            ("E3", "Department of Biology, University of Kiel"),
            ("E2", "A study of marine kelp"),
        ])
    }

    fn fulltext() -> SearchFlags {
        SearchFlags::new().with(SearchFlag::Fulltext)
    }

    fn keys(results: &SearchResults) -> Vec<&str> {
        results.matched().iter().map(String::as_str).collect()
    }

    fn run(index: &FakeIndex, expression: &str, flags: SearchFlags) -> SearchResults {
        HybridSearcher::new(Some(index))
            .search(&SearchQuery::new(expression, flags), &entries())
            .unwrap()
    }

    #[test]
    fn metadata_search_does_not_touch_index() {
        let index = fake();
        let results = run(&index, "year:2001 AND title:Marine", SearchFlags::new());
        assert_eq!(keys(&results), ["E1"]);
        assert_eq!(index.snapshots.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn mixed_conjunction_needs_both_backends() {
        let index = fake();
        let expression = "author=~.*Name AND Univer";

        assert_eq!(keys(&run(&index, expression, fulltext())), ["E3"]);
        assert!(keys(&run(&index, expression, SearchFlags::new())).is_empty());
    }

    #[test]
    fn unscoped_term_is_metadata_or_content() {
        let index = fake();
        let results = run(&index, "marine", fulltext());
        assert_eq!(keys(&results), ["E1", "E2"]);
        assert_eq!(
            results.explanation("E1"),
            Some(&[MatchedLocation::Field("title".into())][..])
        );
        assert_eq!(results.explanation("E2"), Some(&[MatchedLocation::Content][..]));
    }

    #[test]
    fn boolean_algebra_over_mixed_leaves() {
        let index = fake();
        let flags = fulltext();
        let a = run(&index, "content:kiel", flags.clone());
        let b = run(&index, "year:2002 OR author:jane", flags.clone());

        let and = run(&index, "content:kiel AND (year:2002 OR author:jane)", flags.clone());
        let or = run(&index, "content:kiel OR (year:2002 OR author:jane)", flags.clone());

        let intersection: Vec<_> = a.matched().intersection(b.matched()).cloned().collect();
        let union: Vec<_> = a.matched().union(b.matched()).cloned().collect();
        assert_eq!(and.matched().iter().cloned().collect::<Vec<_>>(), intersection);
        assert_eq!(or.matched().iter().cloned().collect::<Vec<_>>(), union);
    }

    #[test]
    fn double_negation() {
        let index = fake();
        for expression in ["content:kiel", "marine", "year:2001 OR content:kelp"] {
            let q = run(&index, expression, fulltext());
            let nn = run(&index, &format!("NOT NOT ({expression})"), fulltext());
            assert_eq!(q, nn, "{expression}");
        }
    }

    #[test]
    fn negated_content_matches_entries_without_documents() {
        let index = fake();
        assert_eq!(keys(&run(&index, "NOT content:kiel", fulltext())), ["E1", "E2"]);
    }

    #[test]
    fn identical_subtrees_are_queried_once() {
        let index = fake();
        run(&index, "content:kiel OR (year:2001 AND content:kiel) OR NOT content:kiel", fulltext());
        assert_eq!(index.snapshots.load(Ordering::SeqCst), 1);
        assert_eq!(index.queries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn maximal_index_subtree_is_one_query() {
        let index = fake();
        let results = run(&index, "(content:kiel OR content:kelp) AND year:2002", fulltext());
        assert_eq!(keys(&results), ["E2"]);
        assert_eq!(index.queries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unavailable_index_degrades() {
        let index = FakeIndex::unavailable();
        let searcher = HybridSearcher::new(Some(&index));

        let mixed = searcher
            .search(&SearchQuery::new("marine", fulltext()), &entries())
            .unwrap();
        assert_eq!(keys(&mixed), ["E1"]);

        let content_only = searcher
            .search(&SearchQuery::new("content:kiel", fulltext()), &entries())
            .unwrap();
        assert!(content_only.is_empty());

        let no_index = HybridSearcher::metadata_only()
            .search(&SearchQuery::new("marine", fulltext()), &entries())
            .unwrap();
        assert_eq!(keys(&no_index), ["E1"]);
    }

    #[test]
    fn unavailable_index_errors_under_error_policy() {
        let index = FakeIndex::unavailable();
        let searcher = HybridSearcher::new(Some(&index)).with_policy(UnavailableIndexPolicy::Error);

        let result = searcher.search(&SearchQuery::new("marine", fulltext()), &entries());
        assert!(matches!(result, Err(SearchError::IndexUnavailable { .. })));

        // metadata-only plans never need the index
        let metadata = searcher.search(&SearchQuery::new("year:2001", fulltext()), &entries());
        assert_eq!(keys(&metadata.unwrap()), ["E1"]);
    }

    #[test]
    fn invalid_query_is_an_error() {
        let result = HybridSearcher::metadata_only()
            .search(&SearchQuery::new("(year:2001", SearchFlags::new()), &entries());
        assert!(matches!(result, Err(SearchError::InvalidQuery(_))));
    }

    #[test]
    fn empty_query_policies() {
        let searcher = HybridSearcher::metadata_only();
        let all = searcher
            .search(&SearchQuery::new("", SearchFlags::new()), &entries())
            .unwrap();
        assert_eq!(all.len(), 3);

        let invalid = SearchQuery::with_empty_policy("", SearchFlags::new(), EmptyQueryPolicy::Invalid);
        assert!(matches!(
            searcher.search(&invalid, &entries()),
            Err(SearchError::InvalidQuery(_))
        ));
    }

    #[test]
    fn alias_group_across_backends() {
        let index = fake();
        let results = run(&index, "title|content:kiel", fulltext());
        assert_eq!(keys(&results), ["E3"]);
        let results = run(&index, "title|content:finfish", fulltext());
        assert_eq!(keys(&results), ["E1"]);
    }

    #[test]
    fn conjunction_spans_documents_of_one_entry() {
        let index = FakeIndex::new(&[
            ("E3", "Sampling alpha diversity"),
            ("E3", "Appendix on beta diversity"),
            ("E2", "alpha only"),
        ]);
        let flags = fulltext();

        assert_eq!(keys(&run(&index, "content:alpha AND content:beta", flags.clone())), ["E3"]);
        assert_eq!(keys(&run(&index, "content:alpha AND NOT content:beta", flags.clone())), ["E2"]);
        assert_eq!(keys(&run(&index, "content:alpha OR content:beta", flags.clone())), ["E2", "E3"]);

        // Grouping must not change which entries match.
        let flat = run(&index, "content:alpha AND content:beta AND author:jane", flags.clone());
        let grouped = run(&index, "(content:alpha AND content:beta) AND author:jane", flags.clone());
        assert_eq!(flat, grouped);
        assert_eq!(keys(&flat), ["E3"]);

        for expression in ["content:alpha AND content:beta", "content:alpha AND NOT content:beta"] {
            let nn = run(&index, &format!("NOT NOT ({expression})"), flags.clone());
            assert_eq!(run(&index, expression, flags.clone()), nn, "{expression}");
        }
    }

    #[test]
    fn mirrored_field_joins_index_subtree() {
        let index = fake().mirroring(&entries(), "title");
        let results = run(&index, "title:other AND content:kelp", fulltext());
        assert_eq!(keys(&results), ["E2"]);
        assert_eq!(index.queries.load(Ordering::SeqCst), 1);

        assert!(keys(&run(&index, "title:marine AND content:kelp", fulltext())).is_empty());
    }

    #[test]
    fn mirrored_field_falls_back_to_metadata_when_index_unavailable() {
        let index = FakeIndex::unavailable().mirroring(&entries(), "title");
        assert!(index.covers_field("title"));
        assert_eq!(keys(&run(&index, "title:marine", fulltext())), ["E1"]);
        assert_eq!(keys(&run(&index, "title:other OR content:kiel", fulltext())), ["E2"]);
    }

    #[test]
    fn unsupported_index_pattern() {
        let index = FakeIndex {
            rejects_word_boundaries: true,
            ..fake()
        };
        let flags = fulltext();

        // the term still searches metadata
        let mixed = run(&index, r"/\bname/", flags.clone());
        assert_eq!(keys(&mixed), ["E3"]);
        assert_eq!(mixed.explanation("E3"), Some(&[MatchedLocation::Field("author".into())][..]));

        let content_only = HybridSearcher::new(Some(&index))
            .search(&SearchQuery::new(r#"content=~"\bkiel""#, flags.clone()), &entries());
        assert!(matches!(
            content_only,
            Err(SearchError::InvalidQuery(QueryError::UnsupportedIndexPattern { .. }))
        ));

        assert_eq!(keys(&run(&index, "content=~kiel$", flags)), ["E3"]);
    }
}
