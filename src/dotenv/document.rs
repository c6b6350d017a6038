use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{ParseError, ParseErrorKind};
use super::reader::{Reader, ReaderOptions};
use super::tokens::TokenKind;

/// A `NAME=value` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub value: String,
}

impl Entry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    Entry(Entry),
    Comment { text: String },
}

/// Ordered dotenv content. Duplicate names are kept; lookups see the first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse with the default reader options.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        Self::parse_with(text, ReaderOptions::default())
    }

    /// Parse dotenv text into a document.
    ///
    /// A name followed directly by another name or a comment becomes an
    /// entry with an empty value. A value without a name is an error.
    pub fn parse_with(text: &str, options: ReaderOptions) -> Result<Self, ParseError> {
        let mut document = Document::new();
        let mut pending: Option<String> = None;

        for token in Reader::new(text, options) {
            let token = token?;
            match token.kind {
                TokenKind::Name => {
                    if let Some(name) = pending.replace(token.text) {
                        document.push_entry(name, "");
                    }
                }
                TokenKind::Comment => {
                    if let Some(name) = pending.take() {
                        document.push_entry(name, "");
                    }
                    document.push_comment(token.text);
                }
                _ => match pending.take() {
                    Some(name) => document.push_entry(name, token.text),
                    None => {
                        return Err(ParseError::new(
                            ParseErrorKind::OrphanValue,
                            format!("Unexpected value token on line {}, missing name", token.line),
                            token.line,
                            token.column,
                        ));
                    }
                },
            }
        }

        if let Some(name) = pending {
            document.push_entry(name, "");
        }

        Ok(document)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn push_entry(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.nodes.push(Node::Entry(Entry::new(name, value)));
    }

    pub fn push_comment(&mut self, text: impl Into<String>) {
        self.nodes.push(Node::Comment { text: text.into() });
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.nodes.iter().filter_map(|node| match node {
            Node::Entry(entry) => Some(entry),
            Node::Comment { .. } => None,
        })
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.nodes.iter_mut().filter_map(|node| match node {
            Node::Entry(entry) => Some(entry),
            Node::Comment { .. } => None,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Value of the first entry called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries()
            .find(|entry| entry.name == name)
            .map(|entry| entry.value.as_str())
    }

    /// Update the first entry called `name`, or append a new one.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(entry) = self.entries_mut().find(|entry| entry.name == name) {
            entry.value = value;
            return;
        }
        self.push_entry(name, value);
    }

    /// Entry stored at node `index`, if that node is an entry.
    pub fn entry_at(&self, index: usize) -> Option<&Entry> {
        match self.nodes.get(index) {
            Some(Node::Entry(entry)) => Some(entry),
            _ => None,
        }
    }

    /// Move every node of `other` to the end of this document.
    pub fn append(&mut self, other: Document) {
        self.nodes.extend(other.nodes);
    }

    pub(crate) fn set_value_at(&mut self, index: usize, value: String) {
        if let Some(Node::Entry(entry)) = self.nodes.get_mut(index) {
            entry.value = value;
        }
    }
}

impl FromIterator<(String, String)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut document = Document::new();
        for (name, value) in iter {
            document.push_entry(name, value);
        }
        document
    }
}

fn is_bare_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | ':' | '@' | '+' | ',' | '%' | '-')
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    if value.chars().all(is_bare_safe) {
        return f.write_str(value);
    }

    f.write_str("\"")?;
    for c in value.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '"' => f.write_str("\\\"")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            '\u{8}' => f.write_str("\\b")?,
            other => write!(f, "{other}")?,
        }
    }
    f.write_str("\"")
}

/// Serializes back to dotenv text that parses to the same entries.
impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            match node {
                Node::Entry(entry) => {
                    write!(f, "{}=", entry.name)?;
                    write_value(f, &entry.value)?;
                    writeln!(f)?;
                }
                Node::Comment { text } => writeln!(f, "#{text}")?,
            }
        }
        Ok(())
    }
}
