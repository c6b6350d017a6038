//! Shell-style substitution over parsed dotenv documents.

pub mod expander;
pub mod options;
pub mod result;

pub use expander::Expander;
pub use options::{ExpansionBuilder, ExpansionOptions};
pub use result::{EntryError, ExpansionError, ExpansionErrorKind, ExpansionResult, ExpansionSummary};
