//! Substitution interpreter for dotenv values.
//!
//! A [`Scanner`] walks one raw value left to right and performs every
//! substitution it can do on its own. When it reaches a `$( ... )` capture it
//! stops and hands the expression back to the driver, which resolves it
//! (vault lookup or external command) and pushes the result before scanning
//! resumes. The blocking and the tokio driver share the scanner, so both
//! follow the same grammar.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::options::ExpansionOptions;
use super::result::{EntryError, ExpansionError, ExpansionErrorKind, ExpansionResult, ExpansionSummary};
use crate::dotenv::Document;
use crate::infra::abort_signal::AbortHandle;
use crate::infra::process::{self, CommandOutput, CommandSpec, ProcessError};
use crate::secrets::expression::parse_args;
use crate::secrets::vault::VaultExpander;

const NO_VAULT_EXPANDERS: &str = "No secret vault expanders configured.";

// ============================================================================
// Scanner
// ============================================================================

enum Step {
    Done,
    Subshell { expression: String, position: usize },
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    output: String,
}

impl Scanner {
    fn new(raw: &str) -> Self {
        let chars: Vec<char> = raw.chars().collect();
        let output = String::with_capacity(raw.len());
        Self {
            chars,
            pos: 0,
            output,
        }
    }

    fn push(&mut self, text: &str) {
        self.output.push_str(text);
    }

    fn finish(self) -> String {
        self.output
    }

    fn find(&self, from: usize, close: char) -> Option<usize> {
        self.chars[from..]
            .iter()
            .position(|&c| c == close)
            .map(|offset| from + offset)
    }

    fn slice(&self, start: usize, end: usize) -> String {
        self.chars[start..end].iter().collect()
    }

    fn unterminated(close: char, open: &str, start: usize) -> ExpansionError {
        ExpansionError::new(
            ExpansionErrorKind::UnterminatedCapture,
            format!("Bad substitution, missing closing token '{close}' for '{open}' at position {start}."),
        )
        .at(start)
    }

    /// Scan until the end of the value or the next `$( ... )` capture.
    fn scan(
        &mut self,
        document: &mut Document,
        options: &ExpansionOptions,
    ) -> Result<Step, ExpansionError> {
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            let next = self.chars.get(self.pos + 1).copied();

            match (c, next) {
                ('\\', Some('$')) => {
                    self.output.push('$');
                    self.pos += 2;
                }
                ('%', _) if options.enable_windows_variables => {
                    self.windows_variable(document, options)?;
                }
                ('$', Some('{')) => self.interpolation(document, options)?,
                ('$', Some('(')) if options.subshell_enabled() => return self.subshell(),
                ('$', Some(n))
                    if n.is_ascii_alphabetic() || (n.is_ascii_digit() && options.enable_unix_args) =>
                {
                    self.variable(document, options)?;
                }
                _ => {
                    self.output.push(c);
                    self.pos += 1;
                }
            }
        }
        Ok(Step::Done)
    }

    /// `%NAME%`. `%%` is kept as is and an unset name expands to nothing.
    fn windows_variable(
        &mut self,
        document: &Document,
        options: &ExpansionOptions,
    ) -> Result<(), ExpansionError> {
        let start = self.pos;
        if self.chars.get(start + 1) == Some(&'%') {
            self.output.push_str("%%");
            self.pos += 2;
            return Ok(());
        }

        let end = self
            .find(start + 1, '%')
            .ok_or_else(|| Self::unterminated('%', "%", start))?;
        let name = self.slice(start + 1, end);
        self.pos = end + 1;

        if let Some(value) = lookup(&name, document, options) {
            self.output.push_str(&value);
        }
        Ok(())
    }

    /// `$NAME` or, with positional arguments enabled, `$<digits>`.
    fn variable(
        &mut self,
        document: &Document,
        options: &ExpansionOptions,
    ) -> Result<(), ExpansionError> {
        let start = self.pos;
        let name_start = start + 1;
        let positional = self.chars[name_start].is_ascii_digit();

        let mut end = name_start;
        while let Some(&c) = self.chars.get(end) {
            let accepted = if positional {
                c.is_ascii_digit()
            } else {
                c.is_ascii_alphanumeric() || c == '_'
            };
            if !accepted {
                break;
            }
            end += 1;
        }

        let name = self.slice(name_start, end);
        self.pos = end;
        // `$HOME\_TEST`: the backslash only ends the name.
        if self.chars.get(self.pos) == Some(&'\\') {
            self.pos += 1;
        }

        if positional {
            let value = name
                .parse::<usize>()
                .ok()
                .and_then(|index| options.args.get(index))
                .ok_or_else(|| {
                    ExpansionError::bad_substitution(format!(
                        "Bad substitution, invalid index {name}."
                    ))
                    .at(start)
                })?;
            self.output.push_str(value);
            return Ok(());
        }

        let value = lookup(&name, document, options).ok_or_else(|| not_set(&name, start))?;
        self.output.push_str(&value);
        Ok(())
    }

    /// `${NAME}`, `${NAME:-default}`, `${NAME:=default}`, `${NAME:?message}`
    /// and `${NAME:default}`.
    fn interpolation(
        &mut self,
        document: &mut Document,
        options: &ExpansionOptions,
    ) -> Result<(), ExpansionError> {
        let start = self.pos;
        let end = self
            .find(start + 2, '}')
            .ok_or_else(|| Self::unterminated('}', "${", start))?;
        let body = self.slice(start + 2, end);
        self.pos = end + 1;

        if body.is_empty() {
            return Err(ExpansionError::bad_substitution(
                "${} is a bad substitution. Variable name not provided.",
            )
            .at(start));
        }

        let (name, operation) = match body.split_once(':') {
            None => (body.as_str(), None),
            Some((name, rest)) => {
                let mut rest_chars = rest.chars();
                let operation = match rest_chars.next() {
                    Some(op @ ('-' | '=' | '?')) => (op, rest_chars.as_str()),
                    _ => ('-', rest),
                };
                (name, Some(operation))
            }
        };

        if name.is_empty() {
            return Err(
                ExpansionError::bad_substitution("Bad substitution, empty variable name.").at(start),
            );
        }
        if !is_valid_name(name) {
            return Err(ExpansionError::bad_substitution(format!(
                "Bad substitution, invalid variable name {name}."
            ))
            .at(start));
        }

        if let Some(value) = lookup(name, document, options) {
            self.output.push_str(&value);
            return Ok(());
        }

        match operation {
            None => Err(not_set(name, start)),
            Some(('?', message)) => {
                let message = if message.is_empty() {
                    format!("Bad substitution, variable {name} is not set.")
                } else {
                    message.to_string()
                };
                Err(ExpansionError::new(ExpansionErrorKind::UnsetVariable, message).at(start))
            }
            Some(('=', default)) => {
                debug!(name, "assigning default value");
                document.set(name, default);
                self.output.push_str(default);
                Ok(())
            }
            Some((_, default)) => {
                self.output.push_str(default);
                Ok(())
            }
        }
    }

    /// Consume a `$( ... )` capture and hand its body to the driver.
    fn subshell(&mut self) -> Result<Step, ExpansionError> {
        let start = self.pos;
        let end = self
            .find(start + 2, ')')
            .ok_or_else(|| Self::unterminated(')', "$(", start))?;
        let expression = self.slice(start + 2, end);
        self.pos = end + 1;

        if expression.trim().is_empty() {
            return Err(ExpansionError::bad_substitution(
                "$() is a bad substitution. Expression not provided.",
            )
            .at(start));
        }

        Ok(Step::Subshell {
            expression,
            position: start,
        })
    }
}

/// Document first, then the option variables, then the process environment.
fn lookup(name: &str, document: &Document, options: &ExpansionOptions) -> Option<String> {
    document
        .get(name)
        .map(str::to_string)
        .or_else(|| options.variables.get(name).cloned())
        .or_else(|| std::env::var(name).ok())
}

fn not_set(name: &str, position: usize) -> ExpansionError {
    ExpansionError::new(
        ExpansionErrorKind::UnsetVariable,
        format!("Bad substitution, variable {name} is not set."),
    )
    .at(position)
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ============================================================================
// Subshell resolution
// ============================================================================

enum Subshell {
    /// Emitted unchanged.
    Literal(String),
    Vault(Arc<dyn VaultExpander>, Vec<String>),
    Command(CommandSpec),
}

fn plan_subshell(expression: &str, options: &ExpansionOptions) -> Result<Subshell, ExpansionError> {
    let args = parse_args(expression);
    let is_secret = args
        .first()
        .is_some_and(|first| first.eq_ignore_ascii_case(&options.secrets_expression));

    if is_secret {
        if !options.enable_secret_substitution {
            return Err(ExpansionError::secret_vault(NO_VAULT_EXPANDERS));
        }
        return options
            .vault_expanders
            .iter()
            .find(|vault| vault.can_handle(&args))
            .map(|vault| Subshell::Vault(Arc::clone(vault), args.clone()))
            .ok_or_else(|| ExpansionError::secret_vault(NO_VAULT_EXPANDERS));
    }

    if !options.enable_command_substitution {
        return Ok(Subshell::Literal(format!("$({expression})")));
    }

    if options.enable_shell_execution {
        let shell = if options.use_shell.trim().is_empty() {
            "bash"
        } else {
            options.use_shell.as_str()
        };
        return Ok(Subshell::Command(process::shell_command(shell, expression)));
    }

    let mut args = args.into_iter();
    let program = args.next().ok_or_else(|| {
        ExpansionError::bad_substitution("$() is a bad substitution. Expression not provided.")
    })?;
    Ok(Subshell::Command(CommandSpec::new(program).args(args)))
}

fn command_value(
    spec: &CommandSpec,
    output: Result<CommandOutput, ProcessError>,
) -> ExpansionResult {
    let output = output.map_err(|e| ExpansionError::process(e.to_string()))?;
    if output.success {
        return Ok(output.stdout.trim().to_string());
    }
    Err(ExpansionError::process(format!(
        "Command '{}' exited with status {}: {}",
        spec.program,
        output.status_text(),
        output.stderr.trim()
    )))
}

// ============================================================================
// Expander
// ============================================================================

/// Expands every entry of a [`Document`] in document order.
///
/// A failing entry keeps its raw text and is reported in the summary; the
/// remaining entries are still expanded. `${NAME:=default}` may append to or
/// update the document while the pass runs.
#[derive(Debug, Clone, Default)]
pub struct Expander {
    options: ExpansionOptions,
}

impl Expander {
    pub fn new(options: ExpansionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExpansionOptions {
        &self.options
    }

    /// Expand on the calling thread. External commands block it.
    pub fn expand(&self, mut document: Document) -> ExpansionSummary {
        let mut errors = Vec::new();
        let count = document.len();

        for index in 0..count {
            let Some(entry) = document.entry_at(index) else {
                continue;
            };
            let key = entry.name.clone();
            let raw = entry.value.clone();

            match self.expand_value(&mut document, &raw) {
                Ok(value) => document.set_value_at(index, value),
                Err(err) => errors.push(entry_error(index, key, err)),
            }
        }

        finish(document, errors)
    }

    /// Expand one raw value against `document`.
    pub fn expand_value(&self, document: &mut Document, raw: &str) -> ExpansionResult {
        let mut scanner = Scanner::new(raw);
        loop {
            match scanner.scan(document, &self.options)? {
                Step::Done => return Ok(scanner.finish()),
                Step::Subshell {
                    expression,
                    position,
                } => {
                    let value = self.resolve(&expression).map_err(|e| e.at(position))?;
                    scanner.push(&value);
                }
            }
        }
    }

    fn resolve(&self, expression: &str) -> ExpansionResult {
        match plan_subshell(expression, &self.options)? {
            Subshell::Literal(text) => Ok(text),
            Subshell::Vault(vault, args) => {
                debug!(vault = vault.name(), "resolving secret");
                vault.expand(&args)
            }
            Subshell::Command(spec) => command_value(&spec, process::run_blocking(&spec)),
        }
    }

    /// Expand on the tokio runtime.
    ///
    /// `abort` is checked before each entry and before each external call;
    /// once it fires, remaining entries fail with
    /// [`ExpansionErrorKind::Cancelled`] and keep their raw text.
    pub async fn expand_async(&self, mut document: Document, abort: &AbortHandle) -> ExpansionSummary {
        let mut errors = Vec::new();
        let count = document.len();

        for index in 0..count {
            let Some(entry) = document.entry_at(index) else {
                continue;
            };
            let key = entry.name.clone();
            let raw = entry.value.clone();

            if abort.is_aborted() {
                errors.push(entry_error(index, key, ExpansionError::cancelled()));
                continue;
            }

            match self.expand_value_async(&mut document, &raw, abort).await {
                Ok(value) => document.set_value_at(index, value),
                Err(err) => errors.push(entry_error(index, key, err)),
            }
        }

        finish(document, errors)
    }

    pub async fn expand_value_async(
        &self,
        document: &mut Document,
        raw: &str,
        abort: &AbortHandle,
    ) -> ExpansionResult {
        let mut scanner = Scanner::new(raw);
        loop {
            match scanner.scan(document, &self.options)? {
                Step::Done => return Ok(scanner.finish()),
                Step::Subshell {
                    expression,
                    position,
                } => {
                    let value = self
                        .resolve_async(&expression, abort)
                        .await
                        .map_err(|e| e.at(position))?;
                    scanner.push(&value);
                }
            }
        }
    }

    async fn resolve_async(&self, expression: &str, abort: &AbortHandle) -> ExpansionResult {
        let plan = plan_subshell(expression, &self.options)?;
        if !matches!(plan, Subshell::Literal(_)) && abort.is_aborted() {
            return Err(ExpansionError::cancelled());
        }

        match plan {
            Subshell::Literal(text) => Ok(text),
            Subshell::Vault(vault, args) => {
                debug!(vault = vault.name(), "resolving secret");
                if vault.synchronous() {
                    vault.expand(&args)
                } else {
                    vault.expand_async(&args, abort).await
                }
            }
            Subshell::Command(spec) => {
                let output = process::run(&spec, self.options.command_timeout).await;
                command_value(&spec, output)
            }
        }
    }
}

fn entry_error(index: usize, key: String, err: ExpansionError) -> EntryError {
    warn!(key = %key, position = err.position, "failed to expand entry: {}", err.message);
    EntryError {
        index,
        key,
        message: err.message,
        position: err.position,
        kind: err.kind,
    }
}

fn finish(document: Document, errors: Vec<EntryError>) -> ExpansionSummary {
    info!(
        entries = document.entries().count(),
        errors = errors.len(),
        "expansion finished"
    );
    ExpansionSummary { document, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::vault::expression_target;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    // ------------------------------------------------------------------
    // In-memory vault
    // ------------------------------------------------------------------

    struct MemoryVault {
        keyword: String,
        scheme: &'static str,
        secrets: Mutex<HashMap<String, String>>,
        calls: Mutex<Vec<String>>,
    }

    impl MemoryVault {
        fn new(scheme: &'static str, secrets: &[(&str, &str)]) -> Self {
            Self {
                keyword: "secret".into(),
                scheme,
                secrets: Mutex::new(
                    secrets
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VaultExpander for MemoryVault {
        fn name(&self) -> &str {
            self.scheme
        }

        fn secrets_expression(&self) -> &str {
            &self.keyword
        }

        fn set_secrets_expression(&mut self, keyword: &str) {
            self.keyword = keyword.to_string();
        }

        fn can_handle(&self, args: &[String]) -> bool {
            expression_target(args, &self.keyword)
                .is_some_and(|t| t.starts_with(&format!("{}://", self.scheme)))
        }

        fn expand(&self, args: &[String]) -> ExpansionResult {
            let key = args[1].rsplit('/').next().unwrap_or_default().to_string();
            self.calls.lock().push(key.clone());
            match self.secrets.lock().get(&key) {
                Some(v) => Ok(v.clone()),
                None => Err(ExpansionError::secret_vault(format!("secret {key} not found"))),
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn doc(text: &str) -> Document {
        Document::parse(text).unwrap()
    }

    fn expand_one(options: ExpansionOptions, text: &str) -> ExpansionSummary {
        Expander::new(options).expand(doc(text))
    }

    fn value(summary: &ExpansionSummary, name: &str) -> String {
        summary.document.get(name).unwrap().to_string()
    }

    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    #[test]
    fn plain_values_are_untouched() {
        let summary = expand_one(ExpansionOptions::default(), "A=hello world\nB=\nC='$'");
        assert!(!summary.is_error());
        assert_eq!(value(&summary, "A"), "hello world");
        assert_eq!(value(&summary, "B"), "");
        assert_eq!(value(&summary, "C"), "$");
    }

    #[test]
    fn bare_variable_from_document_variables_and_env() {
        std::env::set_var("DOTVAULT_EXPANDER_TEST_ENV", "from-env");
        let options = ExpansionOptions::builder()
            .with_variable("FROM_VARS", "vars")
            .build();
        let summary = expand_one(
            options,
            "BASE=/opt\nA=$BASE/bin\nB=$FROM_VARS-x\nC=$DOTVAULT_EXPANDER_TEST_ENV",
        );
        assert!(!summary.is_error(), "{:?}", summary.errors);
        assert_eq!(value(&summary, "A"), "/opt/bin");
        assert_eq!(value(&summary, "B"), "vars-x");
        assert_eq!(value(&summary, "C"), "from-env");
    }

    #[test]
    fn document_wins_over_variables() {
        let options = ExpansionOptions::builder().with_variable("X", "vars").build();
        let summary = expand_one(options, "X=doc\nY=$X");
        assert_eq!(value(&summary, "Y"), "doc");
    }

    #[test]
    fn backslash_ends_variable_name() {
        let summary = expand_one(ExpansionOptions::default(), "HOMEDIR=/home/me\nA=$HOMEDIR\\_TEST");
        assert_eq!(value(&summary, "A"), "/home/me_TEST");
    }

    #[test]
    fn escaped_dollar() {
        let summary = expand_one(ExpansionOptions::default(), r#"A="cost \\$5 and \\${X}""#);
        assert!(!summary.is_error(), "{:?}", summary.errors);
        assert_eq!(value(&summary, "A"), "cost $5 and ${X}");
    }

    #[test]
    fn unset_bare_variable_fails_and_keeps_raw() {
        let summary = expand_one(
            ExpansionOptions::default(),
            "A=x $DOTVAULT_SURELY_UNSET_VAR y\nB=ok",
        );
        assert_eq!(summary.errors.len(), 1);
        let error = &summary.errors[0];
        assert_eq!(error.key, "A");
        assert_eq!(error.index, 0);
        assert_eq!(error.position, 2);
        assert_eq!(error.kind, ExpansionErrorKind::UnsetVariable);
        assert_eq!(
            error.message,
            "Bad substitution, variable DOTVAULT_SURELY_UNSET_VAR is not set."
        );
        assert_eq!(value(&summary, "A"), "x $DOTVAULT_SURELY_UNSET_VAR y");
        assert_eq!(value(&summary, "B"), "ok");
    }

    #[test]
    fn dollar_not_followed_by_name_is_literal() {
        let summary = expand_one(ExpansionOptions::default(), "A=$ and $_x and $1 and 5$");
        assert!(!summary.is_error(), "{:?}", summary.errors);
        assert_eq!(value(&summary, "A"), "$ and $_x and $1 and 5$");
    }

    #[test]
    fn positional_arguments() {
        let options = ExpansionOptions::builder()
            .with_unix_args(true)
            .with_args(["zero", "one"])
            .build();
        let summary = expand_one(options.clone(), "A=$0-$1");
        assert_eq!(value(&summary, "A"), "zero-one");

        let summary = expand_one(options, "A=$7");
        assert_eq!(summary.errors[0].message, "Bad substitution, invalid index 7.");
    }

    // ------------------------------------------------------------------
    // Braces
    // ------------------------------------------------------------------

    #[test]
    fn default_value_does_not_mutate() {
        let options = ExpansionOptions::builder().with_variable("HOME_X", "/me").build();
        let summary = expand_one(options, "A=${HOME_X:-/x}\nB=${NOPE_X:-/x}\nC=${NOPE_X:/y}");
        assert_eq!(value(&summary, "A"), "/me");
        assert_eq!(value(&summary, "B"), "/x");
        assert_eq!(value(&summary, "C"), "/y");
        assert!(!summary.document.contains("NOPE_X"));
    }

    #[test]
    fn empty_default_yields_empty() {
        let summary = expand_one(ExpansionOptions::default(), "A=[${NOPE_X:-}]");
        assert!(!summary.is_error());
        assert_eq!(value(&summary, "A"), "[]");
    }

    #[test]
    fn assign_default_writes_back_when_unset() {
        let summary = expand_one(ExpansionOptions::default(), "A=${NEW_X:=/x}\nB=$NEW_X");
        assert!(!summary.is_error(), "{:?}", summary.errors);
        assert_eq!(value(&summary, "A"), "/x");
        assert_eq!(value(&summary, "B"), "/x");
        assert_eq!(value(&summary, "NEW_X"), "/x");
    }

    #[test]
    fn assign_default_keeps_existing_value() {
        let summary = expand_one(ExpansionOptions::default(), "SET=orig\nA=${SET:=/x}");
        assert_eq!(value(&summary, "A"), "orig");
        assert_eq!(value(&summary, "SET"), "orig");
        assert_eq!(summary.document.entries().count(), 2);
    }

    #[test]
    fn required_message() {
        let summary = expand_one(ExpansionOptions::default(), "A=abc${MISSING_X:?boom}");
        let error = &summary.errors[0];
        assert_eq!(error.message, "boom");
        assert_eq!(error.position, 3);
    }

    #[test]
    fn brace_errors() {
        let summary = expand_one(
            ExpansionOptions::default(),
            "A=${}\nB=${1X}\nC=${OPEN\nD=${NOPE_UNSET_X}",
        );
        let messages: Vec<&str> = summary.errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "${} is a bad substitution. Variable name not provided.",
                "Bad substitution, invalid variable name 1X.",
                "Bad substitution, missing closing token '}' for '${' at position 0.",
                "Bad substitution, variable NOPE_UNSET_X is not set.",
            ]
        );
        assert_eq!(summary.errors[2].kind, ExpansionErrorKind::UnterminatedCapture);
    }

    #[test]
    fn nested_opening_is_literal() {
        let summary = expand_one(ExpansionOptions::default(), "A=${NOPE_X:-$(cmd)}");
        assert_eq!(value(&summary, "A"), "$(cmd)");
    }

    // ------------------------------------------------------------------
    // Windows variables
    // ------------------------------------------------------------------

    #[test]
    fn windows_variables() {
        let options = ExpansionOptions::builder()
            .with_windows_variables(true)
            .with_variable("USER_X", "me")
            .build();
        let summary = expand_one(options.clone(), "A=%USER_X%@%NOPE_X%!\nB=100%%");
        assert!(!summary.is_error(), "{:?}", summary.errors);
        assert_eq!(value(&summary, "A"), "me@!");
        assert_eq!(value(&summary, "B"), "100%%");

        let summary = expand_one(options, "A=50%");
        assert_eq!(summary.errors[0].kind, ExpansionErrorKind::UnterminatedCapture);
        assert_eq!(summary.errors[0].position, 2);
    }

    #[test]
    fn percent_is_literal_when_disabled() {
        let summary = expand_one(ExpansionOptions::default(), "A=%USER%");
        assert_eq!(value(&summary, "A"), "%USER%");
    }

    // ------------------------------------------------------------------
    // Subshells
    // ------------------------------------------------------------------

    #[test]
    fn subshell_is_literal_when_disabled() {
        let text = "SECRET1=$(az keyvault secret show --name x)";
        let summary = expand_one(ExpansionOptions::default(), text);
        assert!(!summary.is_error());
        assert_eq!(value(&summary, "SECRET1"), "$(az keyvault secret show --name x)");
    }

    #[test]
    fn command_is_verbatim_with_only_secrets_enabled() {
        let options = ExpansionOptions::builder().with_secret_substitution(true).build();
        let summary = expand_one(options, "A=$(echo hi)");
        assert!(!summary.is_error());
        assert_eq!(value(&summary, "A"), "$(echo hi)");
    }

    #[test]
    fn subshell_errors() {
        let options = ExpansionOptions::builder().with_command_substitution(true).build();
        let summary = expand_one(options, "A=x$()\nB=$(echo");
        assert_eq!(
            summary.errors[0].message,
            "$() is a bad substitution. Expression not provided."
        );
        assert_eq!(summary.errors[0].position, 1);
        assert_eq!(
            summary.errors[1].message,
            "Bad substitution, missing closing token ')' for '$(' at position 0."
        );
    }

    #[cfg(unix)]
    #[test]
    fn direct_command_execution() {
        let options = ExpansionOptions::builder().with_command_substitution(true).build();
        let summary = expand_one(options, "A=pre-$(echo hello)-post");
        assert!(!summary.is_error(), "{:?}", summary.errors);
        assert_eq!(value(&summary, "A"), "pre-hello-post");
    }

    #[cfg(unix)]
    #[test]
    fn shell_command_execution() {
        let options = ExpansionOptions::builder()
            .with_command_substitution(true)
            .with_shell(true, "sh")
            .build();
        let summary = expand_one(options, "A=$(printf '%s' one | tr a-z A-Z)");
        assert!(!summary.is_error(), "{:?}", summary.errors);
        assert_eq!(value(&summary, "A"), "ONE");
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_is_an_error() {
        let options = ExpansionOptions::builder()
            .with_command_substitution(true)
            .with_shell(true, "sh")
            .build();
        let summary = expand_one(options, "A=ab$(echo broken >&2; exit 4)");
        let error = &summary.errors[0];
        assert_eq!(error.kind, ExpansionErrorKind::Process);
        assert_eq!(error.position, 2);
        assert!(error.message.contains("status 4"), "{}", error.message);
        assert!(error.message.contains("broken"));
    }

    // ------------------------------------------------------------------
    // Secrets
    // ------------------------------------------------------------------

    fn vault_options(vaults: Vec<Box<dyn VaultExpander>>) -> ExpansionOptions {
        ExpansionOptions::builder()
            .with_secret_substitution(true)
            .with_vault_expanders(vaults)
            .build()
    }

    #[test]
    fn secret_resolved_by_first_matching_vault() {
        let options = vault_options(vec![
            Box::new(MemoryVault::new("mem", &[("db", "first")])),
            Box::new(MemoryVault::new("mem", &[("db", "second")])),
        ]);
        let summary = expand_one(options, "DB=$(secret mem://vault/db --create)");
        assert!(!summary.is_error(), "{:?}", summary.errors);
        assert_eq!(value(&summary, "DB"), "first");
    }

    #[test]
    fn secret_routed_by_scheme() {
        let options = vault_options(vec![
            Box::new(MemoryVault::new("one", &[("a", "from-one")])),
            Box::new(MemoryVault::new("two", &[("a", "from-two")])),
        ]);
        let summary = expand_one(options, "A=$(secret two://v/a -C)");
        assert_eq!(value(&summary, "A"), "from-two");
    }

    #[test]
    fn no_vault_message() {
        let message = "No secret vault expanders configured.";

        let summary = expand_one(vault_options(vec![]), "A=$(secret mem://v/a -C)");
        assert_eq!(summary.errors[0].message, message);

        let options = vault_options(vec![Box::new(MemoryVault::new("mem", &[]))]);
        let summary = expand_one(options, "A=$(secret other://v/a -C)");
        assert_eq!(summary.errors[0].message, message);
        assert_eq!(summary.errors[0].kind, ExpansionErrorKind::SecretVault);

        let options = ExpansionOptions::builder().with_command_substitution(true).build();
        let summary = expand_one(options, "A=$(secret mem://v/a -C)");
        assert_eq!(summary.errors[0].message, message);
    }

    #[test]
    fn custom_keyword() {
        let options = ExpansionOptions::builder()
            .with_secret_substitution(true)
            .with_secrets_expression("vault")
            .add_vault_expander(MemoryVault::new("mem", &[("a", "A!")]))
            .build();
        let summary = expand_one(options, "A=$(vault mem://v/a -C)");
        assert_eq!(value(&summary, "A"), "A!");
    }

    #[test]
    fn vault_error_positions_at_subshell() {
        let options = vault_options(vec![Box::new(MemoryVault::new("mem", &[]))]);
        let summary = expand_one(options, "A=key:$(secret mem://v/missing -C)");
        let error = &summary.errors[0];
        assert_eq!(error.message, "secret missing not found");
        assert_eq!(error.position, 4);
    }

    // ------------------------------------------------------------------
    // Async
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn async_matches_sync() {
        let text = "BASE=/opt\nA=$BASE/x\nB=${NEW_ASYNC_X:=v}\nC=$NEW_ASYNC_X\nD=$(secret mem://v/k -C)";
        let options = ExpansionOptions::builder()
            .with_secret_substitution(true)
            .add_vault_expander(MemoryVault::new("mem", &[("k", "secret-value")]))
            .build();
        let expander = Expander::new(options);

        let sync = expander.expand(doc(text));
        let asynchronous = expander.expand_async(doc(text), &AbortHandle::new()).await;
        assert!(!asynchronous.is_error(), "{:?}", asynchronous.errors);
        assert_eq!(sync.pairs(), asynchronous.pairs());
        assert_eq!(value(&asynchronous, "D"), "secret-value");
    }

    #[tokio::test]
    async fn cancelled_run_marks_every_entry() {
        let abort = AbortHandle::new();
        abort.abort();
        let summary = Expander::default().expand_async(doc("A=1\nB=2"), &abort).await;
        assert_eq!(summary.errors.len(), 2);
        assert!(summary
            .errors
            .iter()
            .all(|e| e.kind == ExpansionErrorKind::Cancelled));
        assert_eq!(value(&summary, "A"), "1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn async_command_timeout() {
        let options = ExpansionOptions::builder()
            .with_command_substitution(true)
            .with_command_timeout(Some(std::time::Duration::from_millis(100)))
            .build();
        let summary = Expander::new(options)
            .expand_async(doc("A=$(sleep 5)"), &AbortHandle::new())
            .await;
        assert_eq!(summary.errors[0].kind, ExpansionErrorKind::Process);
        assert!(summary.errors[0].message.contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn async_command_execution() {
        let options = ExpansionOptions::builder().with_command_substitution(true).build();
        let summary = Expander::new(options)
            .expand_async(doc("A=$(echo async)"), &AbortHandle::new())
            .await;
        assert_eq!(value(&summary, "A"), "async");
    }
}
