//! Vault expander contract.

use async_trait::async_trait;

use crate::expansion::{ExpansionError, ExpansionResult};
use crate::infra::abort_signal::AbortHandle;

// ============================================================================
// Expander Trait
// ============================================================================

/// A backend that resolves (and optionally provisions) secrets named by a
/// `secret <uri> [flags]` argument vector.
///
/// Expanders are registered in an ordered list; the expander asks each one
/// in turn through [`VaultExpander::can_handle`] and the first match wins.
#[async_trait]
pub trait VaultExpander: Send + Sync {
    /// Display name for logging.
    fn name(&self) -> &str;

    /// When true the asynchronous expander calls [`VaultExpander::expand`]
    /// instead of [`VaultExpander::expand_async`].
    fn synchronous(&self) -> bool {
        false
    }

    /// Whether this backend answers `secret default ...`.
    fn is_default(&self) -> bool {
        false
    }

    /// Keyword that introduces a secret expression.
    fn secrets_expression(&self) -> &str;

    fn set_secrets_expression(&mut self, keyword: &str);

    /// Whether this backend recognises the argument vector.
    fn can_handle(&self, args: &[String]) -> bool;

    /// Resolve the secret on the calling thread.
    fn expand(&self, args: &[String]) -> ExpansionResult;

    /// Resolve the secret without blocking the runtime.
    ///
    /// The default implementation checks for cancellation and then runs
    /// [`VaultExpander::expand`] inline.
    async fn expand_async(&self, args: &[String], abort: &AbortHandle) -> ExpansionResult {
        if abort.is_aborted() {
            return Err(ExpansionError::cancelled());
        }
        self.expand(args)
    }
}

/// The URI-or-`default` argument of a secret expression, provided the
/// vector has at least three arguments and starts with `keyword`.
pub fn expression_target<'a>(args: &'a [String], keyword: &str) -> Option<&'a str> {
    if args.len() < 3 || !args[0].eq_ignore_ascii_case(keyword) {
        return None;
    }
    Some(args[1].as_str())
}

/// Whether `target` starts with `prefix`, ignoring ASCII case.
pub(crate) fn starts_with_ignore_case(target: &str, prefix: &str) -> bool {
    target
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Redacted preview of a secret for log lines.
pub fn redact_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 6 {
        return "***".to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}…{tail}")
}
