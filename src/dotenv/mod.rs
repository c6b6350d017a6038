//! Dotenv parsing: tokenizer, token types and the document model.

pub mod document;
pub mod error;
pub mod reader;
pub mod tokens;

pub use document::{Document, Entry, Node};
pub use error::{ParseError, ParseErrorKind};
pub use reader::{Reader, ReaderOptions};
pub use tokens::{Capture, Token, TokenKind};

/// Parse dotenv text into a [`Document`].
pub fn parse_document(text: &str, options: ReaderOptions) -> Result<Document, ParseError> {
    Document::parse_with(text, options)
}
