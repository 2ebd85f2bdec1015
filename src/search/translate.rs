//! Translation of query subtrees into index queries.
//!
//! A subtree is index-answerable when every field it references is covered by
//! the index, as reported by [`ContentIndex::covers_field`]. Only such
//! subtrees translate; anything else is left to the coordinator.
//!
//! Negation never translates. The index only knows entries that own
//! documents, so the complement is taken by the coordinator over all entries.
//!
//! [`ContentIndex::covers_field`]: crate::search::ContentIndex::covers_field

use serde::Serialize;

use crate::query::{BoolOp, Node, SearchFlags, Term, TermOperator};

/// Field an unscoped term is searched in on the index side.
pub const CONTENT_FIELD: &str = "content";

/// Fields answered from document content when no index is at hand to ask.
#[must_use]
pub fn default_covers(field: &str) -> bool {
    matches!(field, "content" | "fulltext")
}

/// A query the full-text index can execute.
///
/// Leaves are evaluated per indexed document; `And` and `Or` combine the
/// owning entries, so an entry satisfies `And` when each child is met by any
/// of its documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexQuery {
    /// The field contains the text as a substring of its words.
    Contains { field: String, text: String },
    /// The field contains the text's words, in order.
    Phrase { field: String, text: String },
    /// The regular expression matches inside the field.
    Regex { field: String, pattern: String },
    And { children: Vec<IndexQuery> },
    Or { children: Vec<IndexQuery> },
}

impl IndexQuery {
    /// Regular expressions the index has to compile for this query.
    #[must_use]
    pub fn regex_patterns(&self) -> Vec<&str> {
        let mut patterns = Vec::new();
        self.collect_patterns(&mut patterns);
        patterns
    }

    fn collect_patterns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            IndexQuery::Regex { pattern, .. } => out.push(pattern),
            IndexQuery::And { children } | IndexQuery::Or { children } => {
                for child in children {
                    child.collect_patterns(out);
                }
            }
            IndexQuery::Contains { .. } | IndexQuery::Phrase { .. } => {}
        }
    }
}

/// Which backend can answer a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Every referenced field is covered by the index.
    Index,
    /// No referenced field is covered by the index.
    Metadata,
    /// Both backends are needed.
    Mixed,
}

impl Resolution {
    fn combine(self, other: Resolution) -> Resolution {
        if self == other { self } else { Resolution::Mixed }
    }
}

/// Classify a node against the index's field coverage.
///
/// Unscoped terms search metadata and content together, so they are mixed.
#[must_use]
pub fn classify(node: &Node, covers: &dyn Fn(&str) -> bool) -> Resolution {
    match node {
        Node::Term(term) => classify_term(term, covers),
        Node::Boolean { children, .. } => children
            .iter()
            .map(|c| classify(c, covers))
            .reduce(Resolution::combine)
            .unwrap_or(Resolution::Metadata),
        Node::Not { child } => classify(child, covers),
    }
}

fn classify_term(term: &Term, covers: &dyn Fn(&str) -> bool) -> Resolution {
    let Some(field) = &term.field else {
        return Resolution::Mixed;
    };
    field
        .names()
        .iter()
        .map(|name| {
            if covers(name) {
                Resolution::Index
            } else {
                Resolution::Metadata
            }
        })
        .reduce(Resolution::combine)
        .unwrap_or(Resolution::Metadata)
}

/// Translate a node, or return `None` if it is not entirely index-answerable.
#[must_use]
pub fn translate(
    node: &Node,
    flags: &SearchFlags,
    covers: &dyn Fn(&str) -> bool,
) -> Option<IndexQuery> {
    match node {
        Node::Term(term) => {
            if classify_term(term, covers) != Resolution::Index {
                return None;
            }
            let fields: Vec<&str> = term
                .field
                .iter()
                .flat_map(|f| f.names())
                .map(String::as_str)
                .collect();
            Some(leaf_over(&fields, term, flags))
        }
        Node::Boolean { op, children } => {
            let mut translated = children
                .iter()
                .map(|c| translate(c, flags, covers))
                .collect::<Option<Vec<_>>>()?;
            if translated.len() == 1 {
                return translated.pop();
            }
            Some(match op {
                BoolOp::And => IndexQuery::And {
                    children: translated,
                },
                BoolOp::Or => IndexQuery::Or {
                    children: translated,
                },
            })
        }
        Node::Not { .. } => None,
    }
}

/// The index half of a term that also touches metadata.
///
/// Covers the term's indexed fields, or the content field for an unscoped
/// term. Returns `None` when the term names no indexed field.
#[must_use]
pub fn content_leaf(
    term: &Term,
    flags: &SearchFlags,
    covers: &dyn Fn(&str) -> bool,
) -> Option<IndexQuery> {
    let fields: Vec<&str> = match &term.field {
        None => vec![CONTENT_FIELD],
        Some(field) => field
            .names()
            .iter()
            .map(String::as_str)
            .filter(|name| covers(name))
            .collect(),
    };
    if fields.is_empty() {
        return None;
    }
    Some(leaf_over(&fields, term, flags))
}

fn leaf_over(fields: &[&str], term: &Term, flags: &SearchFlags) -> IndexQuery {
    let mut leaves: Vec<IndexQuery> = fields
        .iter()
        .map(|field| leaf(field, term, flags))
        .collect();
    if leaves.len() == 1 {
        leaves.swap_remove(0)
    } else {
        IndexQuery::Or { children: leaves }
    }
}

fn leaf(field: &str, term: &Term, flags: &SearchFlags) -> IndexQuery {
    let field = field.to_string();
    let text = term.text.clone();
    match term.operator {
        TermOperator::Substring if flags.regular_expression() => IndexQuery::Regex {
            field,
            pattern: text,
        },
        TermOperator::Substring => IndexQuery::Contains { field, text },
        TermOperator::Exact => IndexQuery::Phrase { field, text },
        TermOperator::Regex => IndexQuery::Regex {
            field,
            pattern: text,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{SearchFlag, parse};

    fn contains(text: &str) -> IndexQuery {
        IndexQuery::Contains {
            field: "content".into(),
            text: text.into(),
        }
    }

    #[test]
    fn classify_nodes() {
        let cases = [
            ("content:fish", Resolution::Index),
            ("title:fish", Resolution::Metadata),
            ("fish", Resolution::Mixed),
            ("title|content:fish", Resolution::Mixed),
            ("content:a AND fulltext:b", Resolution::Index),
            ("content:a AND title:b", Resolution::Mixed),
            ("NOT content:a", Resolution::Index),
            ("NOT (year:1 OR title:b)", Resolution::Metadata),
        ];
        for (expression, expected) in cases {
            let node = parse(expression).unwrap();
            assert_eq!(classify(&node, &default_covers), expected, "{expression}");
        }
    }

    #[test]
    fn translate_index_subtrees() {
        let flags = SearchFlags::new();
        let node = parse("content:a AND (content:b OR fulltext:c)").unwrap();
        assert_eq!(
            translate(&node, &flags, &default_covers),
            Some(IndexQuery::And {
                children: vec![
                    contains("a"),
                    IndexQuery::Or {
                        children: vec![
                            contains("b"),
                            IndexQuery::Contains {
                                field: "fulltext".into(),
                                text: "c".into(),
                            },
                        ],
                    },
                ],
            })
        );
    }

    #[test]
    fn negation_is_left_to_the_coordinator() {
        let flags = SearchFlags::new();
        assert_eq!(translate(&parse("NOT content:a").unwrap(), &flags, &default_covers), None);
        assert_eq!(
            translate(&parse("content:a AND NOT content:b").unwrap(), &flags, &default_covers),
            None
        );
    }

    #[test]
    fn mirrored_fields_translate_with_content() {
        let flags = SearchFlags::new();
        let covers = |field: &str| default_covers(field) || field == "title";
        let node = parse("title:coral AND content:reef").unwrap();

        assert_eq!(classify(&node, &covers), Resolution::Index);
        assert_eq!(
            translate(&node, &flags, &covers),
            Some(IndexQuery::And {
                children: vec![
                    IndexQuery::Contains {
                        field: "title".into(),
                        text: "coral".into(),
                    },
                    contains("reef"),
                ],
            })
        );
        assert_eq!(translate(&node, &flags, &default_covers), None);
    }

    #[test]
    fn regex_patterns_are_collected() {
        let flags = SearchFlags::new();
        let query = translate(&parse("content=~^univ OR (content:x AND content=~kiel$)").unwrap(), &flags, &default_covers)
            .unwrap();
        assert_eq!(query.regex_patterns(), ["^univ", "kiel$"]);
    }

    #[test]
    fn mixed_subtree_does_not_translate() {
        let flags = SearchFlags::new();
        assert_eq!(translate(&parse("content:a OR title:b").unwrap(), &flags, &default_covers), None);
        assert_eq!(translate(&parse("fish").unwrap(), &flags, &default_covers), None);
    }

    #[test]
    fn operators_map_to_index_queries() {
        let flags = SearchFlags::new();
        assert_eq!(
            translate(&parse("content=\"marine fish\"").unwrap(), &flags, &default_covers),
            Some(IndexQuery::Phrase {
                field: "content".into(),
                text: "marine fish".into(),
            })
        );
        assert_eq!(
            translate(&parse("content=~univ.*").unwrap(), &flags, &default_covers),
            Some(IndexQuery::Regex {
                field: "content".into(),
                pattern: "univ.*".into(),
            })
        );

        let regex = SearchFlags::new().with(SearchFlag::RegularExpression);
        assert!(matches!(
            translate(&parse("content:univ.").unwrap(), &regex, &default_covers),
            Some(IndexQuery::Regex { .. })
        ));
    }

    #[test]
    fn content_leaf_of_mixed_terms() {
        let flags = SearchFlags::new();
        let Node::Term(unscoped) = parse("Univer").unwrap() else {
            panic!("expected a term");
        };
        assert_eq!(content_leaf(&unscoped, &flags, &default_covers), Some(contains("Univer")));

        let Node::Term(alias) = parse("title|fulltext:x").unwrap() else {
            panic!("expected a term");
        };
        assert_eq!(
            content_leaf(&alias, &flags, &default_covers),
            Some(IndexQuery::Contains {
                field: "fulltext".into(),
                text: "x".into(),
            })
        );

        let Node::Term(metadata) = parse("title:x").unwrap() else {
            panic!("expected a term");
        };
        assert_eq!(content_leaf(&metadata, &flags, &default_covers), None);
    }
}
