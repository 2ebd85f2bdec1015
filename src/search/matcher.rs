//! Structured matcher: compiles a query tree into a predicate over entries.
//!
//! Compilation does all fallible work (regex construction) up front, so
//! evaluating a compiled matcher never fails and is safe to share between
//! threads.

use regex::{Regex, RegexBuilder};

use crate::library::BibEntry;
use crate::query::{BoolOp, Node, QueryError, SearchFlags, Term, TermOperator};
use crate::search::MatchedLocation;

/// Compile a query tree with the given flags.
///
/// # Errors
///
/// Returns `QueryError::InvalidRegex` if a term that is evaluated as a
/// regular expression does not compile.
pub fn compile(node: &Node, flags: &SearchFlags) -> Result<EntryMatcher, QueryError> {
    Ok(EntryMatcher {
        root: Compiled::build(node, flags)?,
    })
}

/// Compiled predicate over [`BibEntry`] values.
#[derive(Debug, Clone)]
pub struct EntryMatcher {
    root: Compiled,
}

impl EntryMatcher {
    #[must_use]
    pub fn matches(&self, entry: &BibEntry) -> bool {
        self.root.eval(entry, &mut Vec::new())
    }

    /// Fields that made the entry match, or `None` if it does not match.
    ///
    /// Only leaves that contributed positively are reported; terms under a
    /// `NOT` never are.
    #[must_use]
    pub fn explain(&self, entry: &BibEntry) -> Option<Vec<MatchedLocation>> {
        let mut locations = Vec::new();
        self.root.eval(entry, &mut locations).then_some(locations)
    }
}

#[derive(Debug, Clone)]
enum Compiled {
    Term(TermMatcher),
    And(Vec<Compiled>),
    Or(Vec<Compiled>),
    Not(Box<Compiled>),
}

impl Compiled {
    fn build(node: &Node, flags: &SearchFlags) -> Result<Self, QueryError> {
        Ok(match node {
            Node::Term(term) => Compiled::Term(TermMatcher::compile(term, flags)?),
            Node::Boolean { op, children } => {
                let children = children
                    .iter()
                    .map(|c| Compiled::build(c, flags))
                    .collect::<Result<Vec<_>, _>>()?;
                match op {
                    BoolOp::And => Compiled::And(children),
                    BoolOp::Or => Compiled::Or(children),
                }
            }
            Node::Not { child } => Compiled::Not(Box::new(Compiled::build(child, flags)?)),
        })
    }

    fn eval(&self, entry: &BibEntry, locations: &mut Vec<MatchedLocation>) -> bool {
        match self {
            Compiled::Term(term) => {
                let fields = term.matched_fields(entry);
                if fields.is_empty() {
                    return false;
                }
                locations.extend(fields.into_iter().map(MatchedLocation::Field));
                true
            }
            Compiled::And(children) => {
                let mut found = Vec::new();
                for child in children {
                    if !child.eval(entry, &mut found) {
                        return false;
                    }
                }
                locations.append(&mut found);
                true
            }
            Compiled::Or(children) => {
                // Every child is evaluated so all matching leaves are reported.
                let mut any = false;
                for child in children {
                    any |= child.eval(entry, locations);
                }
                any
            }
            Compiled::Not(child) => !child.eval(entry, &mut Vec::new()),
        }
    }
}

/// Which values a term looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// The citation key and every field except `groups`.
    Any,
    /// The listed fields; an absent field reads as the empty string.
    Fields(Vec<String>),
}

#[derive(Debug, Clone)]
enum TextTest {
    Contains { needle: String, case_sensitive: bool },
    Equals { expected: String, case_sensitive: bool },
    Regex(Regex),
}

impl TextTest {
    fn matches(&self, value: &str) -> bool {
        match self {
            TextTest::Contains {
                needle,
                case_sensitive: true,
            } => value.contains(needle.as_str()),
            TextTest::Contains { needle, .. } => value.to_lowercase().contains(needle.as_str()),
            TextTest::Equals {
                expected,
                case_sensitive: true,
            } => value == expected,
            TextTest::Equals { expected, .. } => value.to_lowercase() == *expected,
            TextTest::Regex(re) => re.is_match(value),
        }
    }
}

/// A single compiled leaf.
#[derive(Debug, Clone)]
pub struct TermMatcher {
    scope: Scope,
    test: TextTest,
}

impl TermMatcher {
    /// Compile a term against every field it names.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidRegex` for a regex that does not compile.
    pub fn compile(term: &Term, flags: &SearchFlags) -> Result<Self, QueryError> {
        let scope = match &term.field {
            None => Scope::Any,
            Some(field) => Scope::Fields(field.names().to_vec()),
        };
        Self::with_scope(term, scope, flags)
    }

    /// Compile a term restricted to an explicit scope.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidRegex` for a regex that does not compile.
    pub fn with_scope(term: &Term, scope: Scope, flags: &SearchFlags) -> Result<Self, QueryError> {
        let case_sensitive = flags.case_sensitive();
        let fold = |s: &str| {
            if case_sensitive {
                s.to_string()
            } else {
                s.to_lowercase()
            }
        };

        let test = match term.operator {
            TermOperator::Substring if flags.regular_expression() => {
                TextTest::Regex(build_regex(&term.text, case_sensitive)?)
            }
            TermOperator::Substring => TextTest::Contains {
                needle: fold(&term.text),
                case_sensitive,
            },
            TermOperator::Exact => TextTest::Equals {
                expected: fold(&term.text),
                case_sensitive,
            },
            TermOperator::Regex => TextTest::Regex(build_regex(&term.text, case_sensitive)?),
        };

        Ok(Self { scope, test })
    }

    /// Names of the fields whose value satisfies this term.
    #[must_use]
    pub fn matched_fields(&self, entry: &BibEntry) -> Vec<String> {
        match &self.scope {
            Scope::Any => entry
                .searchable_values()
                .filter(|(_, v)| self.test.matches(v))
                .map(|(name, _)| name.to_string())
                .collect(),
            Scope::Fields(names) => names
                .iter()
                .filter(|name| self.test.matches(entry.field(name).unwrap_or("")))
                .cloned()
                .collect(),
        }
    }
}

fn build_regex(pattern: &str, case_sensitive: bool) -> Result<Regex, QueryError> {
    RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| QueryError::InvalidRegex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{SearchFlag, parse};

    fn e1() -> BibEntry {
        BibEntry::new("E1")
            .with_field("year", "2001")
            .with_field("title", "Marine finfish")
            .with_field("groups", "Ocean")
    }

    fn e2() -> BibEntry {
        BibEntry::new("E2")
            .with_field("year", "2002")
            .with_field("title", "Other")
    }

    fn matches(expression: &str, flags: &SearchFlags, entry: &BibEntry) -> bool {
        compile(&parse(expression).unwrap(), flags)
            .unwrap()
            .matches(entry)
    }

    #[test]
    fn unscoped_term_matches_any_field() {
        let flags = SearchFlags::new();
        assert!(matches("finfish", &flags, &e1()));
        assert!(matches("E1", &flags, &e1()));
        assert!(!matches("finfish", &flags, &e2()));
    }

    #[test]
    fn unscoped_term_ignores_groups() {
        assert!(!matches("Ocean", &SearchFlags::new(), &e1()));
        assert!(matches("groups:Ocean", &SearchFlags::new(), &e1()));
    }

    #[test]
    fn case_folding() {
        let insensitive = SearchFlags::new();
        let sensitive = SearchFlags::new().with(SearchFlag::CaseSensitive);
        assert!(matches("MARINE", &insensitive, &e1()));
        assert!(!matches("MARINE", &sensitive, &e1()));
        assert!(matches("Marine", &sensitive, &e1()));
        assert!(matches("title=~^marine", &insensitive, &e1()));
        assert!(!matches("title=~^marine", &sensitive, &e1()));
    }

    #[test]
    fn exact_is_whole_value() {
        let flags = SearchFlags::new();
        assert!(matches("year=2001", &flags, &e1()));
        assert!(!matches("year=200", &flags, &e1()));
        assert!(matches("year:200", &flags, &e1()));
        assert!(matches("title=\"marine finfish\"", &flags, &e1()));
    }

    #[test]
    fn regex_searches_within_value() {
        let flags = SearchFlags::new();
        assert!(matches("title=~fin.ish", &flags, &e1()));
        assert!(!matches("title=~^finfish$", &flags, &e1()));
    }

    #[test]
    fn metacharacters_are_literal_without_regex_flag() {
        let entry = BibEntry::new("K").with_field("title", "C++ (2nd ed.)");
        assert!(matches("title:\"C++ (2nd\"", &SearchFlags::new(), &entry));
        assert!(!matches("title:\"C.. \"", &SearchFlags::new(), &entry));
    }

    #[test]
    fn regex_flag_applies_to_substring_terms() {
        let flags = SearchFlags::new().with(SearchFlag::RegularExpression);
        assert!(matches("title:fin.ish", &flags, &e1()));
        assert!(!matches("title:fin.ish", &SearchFlags::new(), &e1()));
        // exact terms stay exact
        assert!(!matches("year=20.1", &flags, &e1()));
    }

    #[test]
    fn alias_group_is_or() {
        let flags = SearchFlags::new();
        assert!(matches("abstract|title:finfish", &flags, &e1()));
        assert!(!matches("abstract|author:finfish", &flags, &e1()));
    }

    #[test]
    fn absent_field_reads_as_empty() {
        let flags = SearchFlags::new();
        assert!(!matches("author:x", &flags, &e1()));
        assert!(matches("NOT author:x", &flags, &e1()));
        assert!(matches("author=\"\"", &flags, &e1()));
    }

    #[test]
    fn boolean_algebra() {
        let flags = SearchFlags::new();
        assert!(matches("year:2001 AND title:Marine", &flags, &e1()));
        assert!(!matches("year:2001 AND title:Marine", &flags, &e2()));
        assert!(matches("year:2001 OR title:Other", &flags, &e2()));
        assert!(matches("NOT year:2001", &flags, &e2()));
        assert!(!matches("NOT year:2001", &flags, &e1()));
        assert!(matches("NOT NOT year:2001", &flags, &e1()));
    }

    #[test]
    fn pseudo_fields() {
        let flags = SearchFlags::new();
        assert!(matches("key=E1", &flags, &e1()));
        assert!(matches("entrytype=misc", &flags, &e1()));
    }

    #[test]
    fn explain_reports_positive_leaves() {
        let matcher = compile(
            &parse("title:marine OR author:x AND NOT year:1999").unwrap(),
            &SearchFlags::new(),
        )
        .unwrap();

        let locations = matcher.explain(&e1()).unwrap();
        assert_eq!(locations, vec![MatchedLocation::Field("title".into())]);
        assert!(matcher.explain(&e2()).is_none());
    }

    #[test]
    fn invalid_regex_fails_compilation() {
        let node = Node::from(Term::field("title", "a(", TermOperator::Regex));
        assert!(matches!(
            compile(&node, &SearchFlags::new()),
            Err(QueryError::InvalidRegex { .. })
        ));
    }
}
