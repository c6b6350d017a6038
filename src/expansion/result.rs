use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::dotenv::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionErrorKind {
    /// Malformed substitution syntax or an invalid name.
    BadSubstitution,
    /// `$NAME`, `${NAME}` or `${NAME:?msg}` with NAME unset.
    UnsetVariable,
    /// A capture still open at the end of the value.
    UnterminatedCapture,
    /// A vault backend could not resolve or create a secret.
    SecretVault,
    /// A subshell command failed to start, timed out or exited non-zero.
    Process,
    /// The run was cancelled before this step started.
    Cancelled,
}

/// Failure while expanding one value. `position` is the character offset in
/// the raw value where the failing construct starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExpansionError {
    pub kind: ExpansionErrorKind,
    pub message: String,
    pub position: usize,
}

impl ExpansionError {
    pub fn new(kind: ExpansionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            position: 0,
        }
    }

    pub fn at(mut self, position: usize) -> Self {
        self.position = position;
        self
    }

    pub fn bad_substitution(message: impl Into<String>) -> Self {
        Self::new(ExpansionErrorKind::BadSubstitution, message)
    }

    pub fn secret_vault(message: impl Into<String>) -> Self {
        Self::new(ExpansionErrorKind::SecretVault, message)
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::new(ExpansionErrorKind::Process, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ExpansionErrorKind::Cancelled, "Expansion was cancelled.")
    }
}

/// Outcome of expanding a single value or resolving a secret.
pub type ExpansionResult = Result<String, ExpansionError>;

/// An entry that failed to expand. Its value in the summary document is the
/// unexpanded raw text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryError {
    /// Node index in the document.
    pub index: usize,
    pub key: String,
    pub message: String,
    pub position: usize,
    pub kind: ExpansionErrorKind,
}

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (position {})", self.key, self.message, self.position)
    }
}

/// Expanded document plus every entry failure from the pass.
#[derive(Debug, Clone, Default)]
pub struct ExpansionSummary {
    pub document: Document,
    pub errors: Vec<EntryError>,
}

impl ExpansionSummary {
    pub fn is_error(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Entries as `(name, value)` pairs in document order.
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.document
            .entries()
            .map(|e| (e.name.clone(), e.value.clone()))
            .collect()
    }
}
