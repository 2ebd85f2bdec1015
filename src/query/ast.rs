//! Query AST types.
//!
//! A parsed query is an immutable tree of [`Node`]s. Equality and
//! serialization are structural.

use serde::{Deserialize, Serialize};

/// A node of the query tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    /// A leaf predicate, bare or field-scoped.
    Term(Term),
    /// Conjunction or disjunction of one or more children.
    ///
    /// A boolean with a single child behaves exactly like that child.
    Boolean { op: BoolOp, children: Vec<Node> },
    /// The child must not match.
    Not { child: Box<Node> },
}

/// Boolean connective of a [`Node::Boolean`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolOp {
    And,
    Or,
}

/// How a term's text is compared against a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermOperator {
    /// The value contains the text.
    Substring,
    /// The whole value equals the text.
    Exact,
    /// The text is a regular expression searched within the value.
    Regex,
}

/// A leaf predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Term {
    /// Fields this term is scoped to; `None` means any field.
    pub field: Option<FieldRef>,
    pub text: String,
    pub operator: TermOperator,
}

/// One field name or an alias group (`title|abstract`), lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldRef(Vec<String>);

impl FieldRef {
    /// Build a field reference from one or more names.
    ///
    /// Names are lower-cased and duplicates dropped, keeping first-seen order.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref().to_lowercase();
            if !out.contains(&name) {
                out.push(name);
            }
        }
        Self(out)
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.0
    }
}

impl Term {
    /// An unscoped substring term.
    pub fn any(text: impl Into<String>) -> Self {
        Self {
            field: None,
            text: text.into(),
            operator: TermOperator::Substring,
        }
    }

    /// A term scoped to a single field.
    pub fn field(field: &str, text: impl Into<String>, operator: TermOperator) -> Self {
        Self {
            field: Some(FieldRef::new([field])),
            text: text.into(),
            operator,
        }
    }
}

impl Node {
    pub fn and(children: Vec<Node>) -> Self {
        Self::Boolean {
            op: BoolOp::And,
            children,
        }
    }

    pub fn or(children: Vec<Node>) -> Self {
        Self::Boolean {
            op: BoolOp::Or,
            children,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: Node) -> Self {
        Self::Not {
            child: Box::new(child),
        }
    }

    /// Visit every term in the tree, depth first.
    pub fn for_each_term<'a>(&'a self, f: &mut impl FnMut(&'a Term)) {
        match self {
            Node::Term(term) => f(term),
            Node::Boolean { children, .. } => {
                for child in children {
                    child.for_each_term(f);
                }
            }
            Node::Not { child } => child.for_each_term(f),
        }
    }
}

impl From<Term> for Node {
    fn from(term: Term) -> Self {
        Node::Term(term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_ref_lowercases_and_dedups() {
        let field = FieldRef::new(["Title", "abstract", "TITLE"]);
        assert_eq!(field.names(), ["title", "abstract"]);
    }

    #[test]
    fn equality_is_structural() {
        let a = Node::and(vec![Term::any("x").into(), Term::any("y").into()]);
        let b = Node::and(vec![Term::any("x").into(), Term::any("y").into()]);
        assert_eq!(a, b);

        let c = Node::or(vec![Term::any("x").into(), Term::any("y").into()]);
        assert_ne!(a, c);
    }

    #[test]
    fn serializes_with_type_tag() {
        let node = Node::not(Term::field("year", "2001", TermOperator::Exact).into());
        let json = serde_json::to_value(&node).unwrap();

        assert_eq!(json["type"], "not");
        assert_eq!(json["child"]["type"], "term");
        assert_eq!(json["child"]["field"][0], "year");
        assert_eq!(json["child"]["operator"], "exact");

        let back: Node = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn for_each_term_visits_all_leaves() {
        let node = Node::or(vec![
            Term::any("a").into(),
            Node::not(Node::and(vec![Term::any("b").into(), Term::any("c").into()])),
        ]);
        let mut seen = Vec::new();
        node.for_each_term(&mut |t| seen.push(t.text.clone()));
        assert_eq!(seen, ["a", "b", "c"]);
    }
}
