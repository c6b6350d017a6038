use thiserror::Error;

/// Category of a dotenv parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// `=` with nothing in front of it.
    MissingName,
    /// A character that cannot appear in a variable name.
    UnexpectedCharacter,
    /// A name that runs into a line break or end of input without `=`.
    MissingAssignment,
    /// A value without a name in front of it.
    OrphanValue,
    /// End of input inside a quoted, JSON or YAML capture.
    UnterminatedCapture,
    /// End of input inside a `\uXXXX` escape.
    UnterminatedEscape,
}

/// A fatal error raised while tokenizing dotenv text.
///
/// Parsing stops at the first error; expansion never starts for a document
/// that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (line {line}, column {column})")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl ParseError {
    pub(crate) fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        line: usize,
        column: usize,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            line,
            column,
        }
    }
}
