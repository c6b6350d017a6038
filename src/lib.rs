//! Dotenv parsing and expansion with command and vault-backed secret
//! substitution.
//!
//! ```no_run
//! use dotvault::dotenv::Document;
//! use dotvault::expansion::{Expander, ExpansionOptions};
//!
//! let document = Document::parse("HOME_DIR=${HOME}\nGREETING=hi $USER\n").unwrap();
//! let summary = Expander::new(ExpansionOptions::default()).expand(document);
//! for (name, value) in summary.pairs() {
//!     println!("{name}={value}");
//! }
//! ```

pub mod cli;
pub mod config;
pub mod dotenv;
pub mod expansion;
pub mod infra;
pub mod logging;
pub mod secrets;

pub use dotenv::{parse_document, Document, ParseError, ReaderOptions};
pub use expansion::{Expander, ExpansionError, ExpansionOptions, ExpansionSummary};
pub use secrets::{SecretExpression, VaultExpander};
