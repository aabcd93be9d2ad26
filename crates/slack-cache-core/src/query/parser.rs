//! Slack search query parsing.
//!
//! The normalizer consumes parsing as a capability ([`SearchQueryParser`]) so
//! that callers can plug in the same parser their search tools use.
//! [`SlackQueryParser`] understands the subset of Slack's search syntax that
//! matters for caching: quoted phrases, `modifier:value` operators, upper-case
//! boolean operators and parenthesised groups. Everything else is a term.

use crate::{Error, Result};
use serde::Serialize;

/// Slack search modifiers recognised as operators.
pub const SLACK_MODIFIERS: &[&str] = &[
    "in", "from", "to", "after", "before", "on", "during", "has", "is", "with",
];

/// A `type:value` search modifier such as `in:#general`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct QueryOperator {
    /// Modifier name, lower-case (`in`, `from`, `after`, ...).
    pub kind: String,
    /// Modifier argument as written.
    pub value: String,
}

/// Boolean connective kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BooleanKind {
    /// `AND`
    And,
    /// `OR`
    Or,
    /// `NOT`
    Not,
}

impl BooleanKind {
    /// The keyword as it appears in a query.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
            Self::Not => "NOT",
        }
    }

    fn from_word(word: &str) -> Option<Self> {
        match word {
            "AND" => Some(Self::And),
            "OR" => Some(Self::Or),
            "NOT" => Some(Self::Not),
            _ => None,
        }
    }
}

/// A boolean operator and its token position in the original query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BooleanOperator {
    /// Which connective.
    pub kind: BooleanKind,
    /// Zero-based token index.
    pub position: usize,
}

/// A parenthesised group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryGroup {
    /// Text between the parentheses, as written.
    pub content: String,
    /// Nesting depth, starting at 1 for top-level groups.
    pub depth: usize,
}

/// Structured form of a raw query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedQuery {
    /// Bare words.
    pub terms: Vec<String>,
    /// Quoted phrases without their quotes.
    pub phrases: Vec<String>,
    /// Search modifiers.
    pub operators: Vec<QueryOperator>,
    /// Boolean connectives in positional order.
    pub boolean_operators: Vec<BooleanOperator>,
    /// Parenthesised groups in order of their closing parenthesis.
    pub groups: Vec<QueryGroup>,
}

impl ParsedQuery {
    /// Whether the query contains nothing searchable.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.phrases.is_empty() && self.operators.is_empty()
    }

    /// Values of every operator of the given kind.
    pub fn operator_values<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.operators
            .iter()
            .filter(move |op| op.kind == kind)
            .map(|op| op.value.as_str())
    }
}

/// Capability that turns a raw query string into a [`ParsedQuery`].
pub trait SearchQueryParser: Send + Sync {
    /// Parse `raw`, failing on malformed input.
    fn parse(&self, raw: &str) -> Result<ParsedQuery>;
}

/// Parser for Slack's search syntax.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlackQueryParser;

impl SlackQueryParser {
    /// Create a parser.
    pub const fn new() -> Self {
        Self
    }
}

impl SearchQueryParser for SlackQueryParser {
    fn parse(&self, raw: &str) -> Result<ParsedQuery> {
        let mut parsed = ParsedQuery::default();
        let mut open_groups: Vec<usize> = Vec::new();
        let mut position = 0usize;
        let mut chars = raw.char_indices().peekable();

        while let Some(&(idx, ch)) = chars.peek() {
            match ch {
                c if c.is_whitespace() => {
                    chars.next();
                },
                '"' => {
                    chars.next();
                    let start = idx + 1;
                    let mut end = None;
                    for (i, c) in chars.by_ref() {
                        if c == '"' {
                            end = Some(i);
                            break;
                        }
                    }
                    let end = end.ok_or_else(|| {
                        Error::QueryParse(format!("unterminated quoted phrase at offset {idx}"))
                    })?;
                    let phrase = raw[start..end].split_whitespace().collect::<Vec<_>>().join(" ");
                    if !phrase.is_empty() {
                        parsed.phrases.push(phrase);
                        position += 1;
                    }
                },
                '(' => {
                    chars.next();
                    open_groups.push(idx + 1);
                },
                ')' => {
                    chars.next();
                    let start = open_groups.pop().ok_or_else(|| {
                        Error::QueryParse(format!("unmatched ')' at offset {idx}"))
                    })?;
                    parsed.groups.push(QueryGroup {
                        content: raw[start..idx].trim().to_string(),
                        depth: open_groups.len() + 1,
                    });
                },
                _ => {
                    let start = idx;
                    let mut end = raw.len();
                    while let Some(&(i, c)) = chars.peek() {
                        if c.is_whitespace() || matches!(c, '(' | ')' | '"') {
                            end = i;
                            break;
                        }
                        chars.next();
                    }
                    classify_word(&raw[start..end], position, &mut parsed);
                    position += 1;
                },
            }
        }

        if let Some(start) = open_groups.pop() {
            return Err(Error::QueryParse(format!(
                "unclosed '(' at offset {}",
                start.saturating_sub(1)
            )));
        }
        Ok(parsed)
    }
}

fn classify_word(word: &str, position: usize, parsed: &mut ParsedQuery) {
    if let Some(kind) = BooleanKind::from_word(word) {
        parsed.boolean_operators.push(BooleanOperator { kind, position });
        return;
    }
    if let Some((kind, value)) = word.split_once(':') {
        let kind = kind.to_lowercase();
        if !value.is_empty() && SLACK_MODIFIERS.contains(&kind.as_str()) {
            parsed.operators.push(QueryOperator {
                kind,
                value: value.to_string(),
            });
            return;
        }
    }
    parsed.terms.push(word.to_string());
}
