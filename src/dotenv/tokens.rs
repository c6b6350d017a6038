//! Token types produced by the dotenv [`Reader`](super::Reader).

use serde::{Deserialize, Serialize};

/// How a value was delimited in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capture {
    /// Unquoted scalar, terminated by a line break, end of input or `#`.
    #[default]
    None,
    /// `"..."` with backslash escapes.
    DoubleQuote,
    /// `'...'`, literal except for an escaped closing quote.
    SingleQuote,
    /// `` `...` `` with the same escapes as double quotes.
    Backtick,
    /// `{ ... }` JSON block closed by a `}` at the start of a line.
    Json,
    /// `---` front-matter block closed by a line holding only `---`.
    Yaml,
}

/// The classification of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Name,
    String(Capture),
    Number,
    Boolean,
    Null,
    Comment,
    Json,
    Yaml,
}

impl TokenKind {
    /// Whether this token carries the value half of a `NAME=value` pair.
    pub fn is_value(&self) -> bool {
        !matches!(self, TokenKind::Name | TokenKind::Comment)
    }
}

/// A single token with its text and the position where it started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            column,
        }
    }

    /// Classify an unquoted scalar: null, then boolean, then number, else string.
    pub fn scalar(text: String, line: usize, column: usize) -> Self {
        let kind = if is_null_literal(&text) {
            TokenKind::Null
        } else if is_boolean_literal(&text) {
            TokenKind::Boolean
        } else if is_number_literal(&text) {
            TokenKind::Number
        } else {
            TokenKind::String(Capture::None)
        };

        Self::new(kind, text, line, column)
    }
}

fn is_null_literal(text: &str) -> bool {
    text.eq_ignore_ascii_case("null")
}

fn is_boolean_literal(text: &str) -> bool {
    text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("false")
}

fn is_number_literal(text: &str) -> bool {
    // `f64::from_str` also accepts "inf" and "NaN"; restrict to numeric spelling first.
    let numeric_spelling = text
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));

    numeric_spelling
        && text.chars().any(|c| c.is_ascii_digit())
        && (text.parse::<i64>().is_ok() || text.parse::<f64>().is_ok())
}
