//! Tokenizer and recursive descent parser for query strings.
//!
//! Grammar:
//! ```text
//! query      = or_expr EOF
//! or_expr    = and_expr ("OR" and_expr)*
//! and_expr   = unary_expr (["AND"] unary_expr)*
//! unary_expr = ("NOT" | "-") unary_expr | atom
//! atom       = "(" or_expr ")" | comparison
//! comparison = fields OPERATOR value | value
//! fields     = WORD ("|" WORD)*
//! value      = WORD | QUOTED | REGEX
//! OPERATOR   = ":" | "=" | "==" | "=~" | "!=" | "!=~"
//! ```
//!
//! Parsing stops at the first error; no partial tree is ever returned.

use regex::Regex;
use thiserror::Error;

use crate::query::ast::{FieldRef, Node, Term, TermOperator};

/// Field names that mean "any field".
const ANY_FIELD_NAMES: &[&str] = &["any", "anyfield"];

/// A syntax error with the byte offset where it was detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty query")]
    Empty,

    #[error("unexpected end of query, expected {expected}")]
    UnexpectedEnd { expected: &'static str },

    #[error("unexpected {found} at position {position}")]
    UnexpectedToken { found: String, position: usize },

    #[error("unbalanced parenthesis at position {position}")]
    UnbalancedParen { position: usize },

    #[error("unterminated quoted phrase starting at position {position}")]
    UnterminatedQuote { position: usize },

    #[error("unterminated regular expression starting at position {position}")]
    UnterminatedRegex { position: usize },

    #[error("missing value after '{field}' at position {position}")]
    MissingValue { field: String, position: usize },

    #[error("invalid regular expression '{pattern}' at position {position}: {message}")]
    InvalidRegex {
        pattern: String,
        position: usize,
        message: String,
    },
}

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Word(String),
    Quoted(String),
    Regex(String),
    Op(Operator),
    Pipe,
    OpenParen,
    CloseParen,
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Contains,
    Equals,
    Matches,
    NotEquals,
    NotMatches,
}

impl Operator {
    fn symbol(self) -> &'static str {
        match self {
            Operator::Contains => ":",
            Operator::Equals => "=",
            Operator::Matches => "=~",
            Operator::NotEquals => "!=",
            Operator::NotMatches => "!=~",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    position: usize,
}

impl TokenKind {
    fn describe(&self) -> String {
        match self {
            TokenKind::Word(w) => format!("'{w}'"),
            TokenKind::Quoted(s) => format!("\"{s}\""),
            TokenKind::Regex(p) => format!("/{p}/"),
            TokenKind::Op(op) => format!("operator '{}'", op.symbol()),
            TokenKind::Pipe => "'|'".to_string(),
            TokenKind::OpenParen => "'('".to_string(),
            TokenKind::CloseParen => "')'".to_string(),
            TokenKind::And => "AND".to_string(),
            TokenKind::Or => "OR".to_string(),
            TokenKind::Not => "NOT".to_string(),
        }
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    let starts_operator = |i: usize| -> bool {
        match chars.get(i).map(|&(_, c)| c) {
            Some(':' | '=' | '|') => true,
            Some('!') => matches!(chars.get(i + 1), Some((_, '='))),
            _ => false,
        }
    };

    while i < len {
        let (position, ch) = chars[i];

        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        match ch {
            '(' => {
                tokens.push(Token { kind: TokenKind::OpenParen, position });
                i += 1;
            }
            ')' => {
                tokens.push(Token { kind: TokenKind::CloseParen, position });
                i += 1;
            }
            '|' => {
                tokens.push(Token { kind: TokenKind::Pipe, position });
                i += 1;
            }
            ':' => {
                tokens.push(Token { kind: TokenKind::Op(Operator::Contains), position });
                i += 1;
            }
            '=' => {
                let (op, width) = match chars.get(i + 1).map(|&(_, c)| c) {
                    Some('~') => (Operator::Matches, 2),
                    Some('=') => (Operator::Equals, 2),
                    _ => (Operator::Equals, 1),
                };
                tokens.push(Token { kind: TokenKind::Op(op), position });
                i += width;
            }
            '!' if starts_operator(i) => {
                let (op, width) = if matches!(chars.get(i + 2), Some((_, '~'))) {
                    (Operator::NotMatches, 3)
                } else {
                    (Operator::NotEquals, 2)
                };
                tokens.push(Token { kind: TokenKind::Op(op), position });
                i += width;
            }
            '"' => {
                i += 1;
                let mut text = String::new();
                let mut closed = false;
                while i < len {
                    let c = chars[i].1;
                    if c == '\\' && i + 1 < len && matches!(chars[i + 1].1, '"' | '\\') {
                        text.push(chars[i + 1].1);
                        i += 2;
                    } else if c == '"' {
                        closed = true;
                        i += 1;
                        break;
                    } else {
                        text.push(c);
                        i += 1;
                    }
                }
                if !closed {
                    return Err(ParseError::UnterminatedQuote { position });
                }
                tokens.push(Token { kind: TokenKind::Quoted(text), position });
            }
            '/' => {
                i += 1;
                let mut pattern = String::new();
                let mut closed = false;
                while i < len {
                    let c = chars[i].1;
                    if c == '\\' && i + 1 < len {
                        // `\/` is a literal slash, other escapes go to the regex engine
                        if chars[i + 1].1 != '/' {
                            pattern.push('\\');
                        }
                        pattern.push(chars[i + 1].1);
                        i += 2;
                    } else if c == '/' {
                        closed = true;
                        i += 1;
                        break;
                    } else {
                        pattern.push(c);
                        i += 1;
                    }
                }
                if !closed {
                    return Err(ParseError::UnterminatedRegex { position });
                }
                tokens.push(Token { kind: TokenKind::Regex(pattern), position });
            }
            '-' => {
                tokens.push(Token { kind: TokenKind::Not, position });
                i += 1;
            }
            _ => {
                let start = i;
                while i < len {
                    let c = chars[i].1;
                    if c.is_whitespace() || matches!(c, '(' | ')' | '"') || starts_operator(i) {
                        break;
                    }
                    i += 1;
                }
                let word: String = chars[start..i].iter().map(|&(_, c)| c).collect();

                // A keyword directly followed by an operator is a field name.
                let kind = if starts_operator(i) {
                    TokenKind::Word(word)
                } else {
                    match word.to_uppercase().as_str() {
                        "AND" => TokenKind::And,
                        "OR" => TokenKind::Or,
                        "NOT" => TokenKind::Not,
                        _ => TokenKind::Word(word),
                    }
                };
                tokens.push(Token { kind, position });
            }
        }
    }

    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |t| t.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn unexpected(&self, expected: &'static str) -> ParseError {
        match self.tokens.get(self.pos) {
            Some(tok) => ParseError::UnexpectedToken {
                found: tok.kind.describe(),
                position: tok.position,
            },
            None => ParseError::UnexpectedEnd { expected },
        }
    }

    /// or_expr = and_expr ("OR" and_expr)*
    fn parse_or_expr(&mut self) -> Result<Node, ParseError> {
        let mut children = vec![self.parse_and_expr()?];

        while self.peek() == Some(&TokenKind::Or) {
            self.advance();
            children.push(self.parse_and_expr()?);
        }

        Ok(collapse(children, Node::or))
    }

    /// and_expr = unary_expr (["AND"] unary_expr)*
    fn parse_and_expr(&mut self) -> Result<Node, ParseError> {
        let mut children = vec![self.parse_unary_expr()?];

        loop {
            match self.peek() {
                None | Some(TokenKind::Or | TokenKind::CloseParen) => break,
                Some(TokenKind::And) => {
                    self.advance();
                    children.push(self.parse_unary_expr()?);
                }
                Some(_) => children.push(self.parse_unary_expr()?),
            }
        }

        Ok(collapse(children, Node::and))
    }

    /// unary_expr = ("NOT" | "-") unary_expr | atom
    fn parse_unary_expr(&mut self) -> Result<Node, ParseError> {
        if self.peek() == Some(&TokenKind::Not) {
            self.advance();
            let child = self.parse_unary_expr()?;
            Ok(Node::not(child))
        } else {
            self.parse_atom()
        }
    }

    /// atom = "(" or_expr ")" | comparison
    fn parse_atom(&mut self) -> Result<Node, ParseError> {
        match self.peek() {
            Some(TokenKind::OpenParen) => {
                let open = self.position();
                self.advance();
                let inner = self.parse_or_expr()?;
                match self.peek() {
                    Some(TokenKind::CloseParen) => {
                        self.advance();
                        Ok(inner)
                    }
                    None => Err(ParseError::UnbalancedParen { position: open }),
                    Some(_) => Err(self.unexpected("')'")),
                }
            }
            Some(TokenKind::Word(_)) => {
                if matches!(self.peek_at(1), Some(TokenKind::Op(_) | TokenKind::Pipe)) {
                    self.parse_comparison()
                } else {
                    let Some(Token { kind: TokenKind::Word(w), .. }) = self.advance() else {
                        return Err(self.unexpected("a search term"));
                    };
                    Ok(Term::any(w).into())
                }
            }
            Some(TokenKind::Quoted(_)) => {
                let Some(Token { kind: TokenKind::Quoted(s), .. }) = self.advance() else {
                    return Err(self.unexpected("a search term"));
                };
                Ok(Term::any(s).into())
            }
            Some(TokenKind::Regex(_)) => {
                let Some(Token { kind: TokenKind::Regex(p), position }) = self.advance() else {
                    return Err(self.unexpected("a search term"));
                };
                check_regex(&p, position)?;
                Ok(Node::Term(Term {
                    field: None,
                    text: p,
                    operator: TermOperator::Regex,
                }))
            }
            _ => Err(self.unexpected("a search term")),
        }
    }

    /// comparison = fields OPERATOR value
    fn parse_comparison(&mut self) -> Result<Node, ParseError> {
        let mut names = Vec::new();
        loop {
            let Some(TokenKind::Word(name)) = self.peek() else {
                return Err(self.unexpected("a field name"));
            };
            names.push(name.clone());
            self.advance();

            if self.peek() == Some(&TokenKind::Pipe) {
                self.advance();
            } else {
                break;
            }
        }

        let op_position = self.position();
        let Some(&TokenKind::Op(op)) = self.peek() else {
            return Err(self.unexpected("an operator"));
        };
        self.advance();

        let field_label = names.join("|");
        let value_position = self.position();
        let (text, is_regex_literal) = match self.peek() {
            Some(TokenKind::Word(w) | TokenKind::Quoted(w)) => (w.clone(), false),
            Some(TokenKind::Regex(p)) => (p.clone(), true),
            _ => {
                return Err(ParseError::MissingValue {
                    field: field_label,
                    position: op_position,
                });
            }
        };
        self.advance();

        let operator = match op {
            Operator::Contains | Operator::Equals | Operator::NotEquals if is_regex_literal => {
                TermOperator::Regex
            }
            Operator::Contains => TermOperator::Substring,
            Operator::Equals | Operator::NotEquals => TermOperator::Exact,
            Operator::Matches | Operator::NotMatches => TermOperator::Regex,
        };
        if operator == TermOperator::Regex {
            check_regex(&text, value_position)?;
        }

        let field = if names
            .iter()
            .any(|n| ANY_FIELD_NAMES.contains(&n.to_lowercase().as_str()))
        {
            None
        } else {
            Some(FieldRef::new(&names))
        };

        let term = Node::Term(Term {
            field,
            text,
            operator,
        });

        Ok(match op {
            Operator::NotEquals | Operator::NotMatches => Node::not(term),
            _ => term,
        })
    }
}

/// A single child is returned as-is rather than wrapped in a boolean.
fn collapse(mut children: Vec<Node>, wrap: fn(Vec<Node>) -> Node) -> Node {
    if children.len() == 1 {
        children.remove(0)
    } else {
        wrap(children)
    }
}

fn check_regex(pattern: &str, position: usize) -> Result<(), ParseError> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| ParseError::InvalidRegex {
            pattern: pattern.to_string(),
            position,
            message: e.to_string(),
        })
}

// ============================================================================
// Public API
// ============================================================================

/// Parse a query string into an AST.
///
/// # Errors
///
/// Returns the first syntax error found. Whitespace-only input yields
/// [`ParseError::Empty`].
pub fn parse(expression: &str) -> Result<Node, ParseError> {
    if expression.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: expression.len(),
    };
    let node = parser.parse_or_expr()?;

    if let Some(tok) = parser.tokens.get(parser.pos) {
        return Err(match tok.kind {
            TokenKind::CloseParen => ParseError::UnbalancedParen {
                position: tok.position,
            },
            _ => ParseError::UnexpectedToken {
                found: tok.kind.describe(),
                position: tok.position,
            },
        });
    }

    Ok(node)
}

// ============================================================================
// Tests
// ============================================================================
