use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::infra::process::DEFAULT_COMMAND_TIMEOUT_SECS;
use crate::secrets::expression::DEFAULT_SECRETS_EXPRESSION;
use crate::secrets::vault::VaultExpander;

/// Switches and inputs for one expansion pass.
#[derive(Clone)]
pub struct ExpansionOptions {
    /// `$1`, `$2`, ... resolve to entries of `args`.
    pub enable_unix_args: bool,
    /// `%NAME%` substitution.
    pub enable_windows_variables: bool,
    /// `$( ... )` runs commands.
    pub enable_command_substitution: bool,
    /// `$(secret ...)` is routed to the vault expanders.
    pub enable_secret_substitution: bool,
    /// Commands run through `use_shell` instead of being executed directly.
    pub enable_shell_execution: bool,
    pub use_shell: String,
    /// Keyword that introduces a secret expression.
    pub secrets_expression: String,
    /// Consulted after the document and before the process environment.
    pub variables: HashMap<String, String>,
    /// Tried in order; the first whose `can_handle` matches resolves.
    pub vault_expanders: Vec<Arc<dyn VaultExpander>>,
    /// Positional arguments for `$<digits>`.
    pub args: Vec<String>,
    /// Limit for a single command in the asynchronous expander.
    pub command_timeout: Option<Duration>,
}

impl Default for ExpansionOptions {
    fn default() -> Self {
        Self {
            enable_unix_args: false,
            enable_windows_variables: false,
            enable_command_substitution: false,
            enable_secret_substitution: false,
            enable_shell_execution: false,
            use_shell: "bash".to_string(),
            secrets_expression: DEFAULT_SECRETS_EXPRESSION.to_string(),
            variables: HashMap::new(),
            vault_expanders: Vec::new(),
            args: Vec::new(),
            command_timeout: Some(Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS)),
        }
    }
}

impl fmt::Debug for ExpansionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expanders: Vec<&str> = self.vault_expanders.iter().map(|v| v.name()).collect();
        let mut variables: Vec<&str> = self.variables.keys().map(String::as_str).collect();
        variables.sort_unstable();
        f.debug_struct("ExpansionOptions")
            .field("enable_unix_args", &self.enable_unix_args)
            .field("enable_windows_variables", &self.enable_windows_variables)
            .field("enable_command_substitution", &self.enable_command_substitution)
            .field("enable_secret_substitution", &self.enable_secret_substitution)
            .field("enable_shell_execution", &self.enable_shell_execution)
            .field("use_shell", &self.use_shell)
            .field("secrets_expression", &self.secrets_expression)
            .field("variables", &variables)
            .field("vault_expanders", &expanders)
            .field("args", &self.args.len())
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl ExpansionOptions {
    pub fn builder() -> ExpansionBuilder {
        ExpansionBuilder::default()
    }

    /// Whether `$(` starts a subshell capture.
    pub(crate) fn subshell_enabled(&self) -> bool {
        self.enable_command_substitution || self.enable_secret_substitution
    }
}

/// Builds [`ExpansionOptions`]. Vault expanders are owned until
/// [`ExpansionBuilder::build`] so the secrets keyword can be pushed into each.
#[derive(Default)]
pub struct ExpansionBuilder {
    options: ExpansionOptions,
    expanders: Vec<Box<dyn VaultExpander>>,
}

impl ExpansionBuilder {
    pub fn with_unix_args(mut self, enable: bool) -> Self {
        self.options.enable_unix_args = enable;
        self
    }

    pub fn with_windows_variables(mut self, enable: bool) -> Self {
        self.options.enable_windows_variables = enable;
        self
    }

    pub fn with_command_substitution(mut self, enable: bool) -> Self {
        self.options.enable_command_substitution = enable;
        self
    }

    pub fn with_secret_substitution(mut self, enable: bool) -> Self {
        self.options.enable_secret_substitution = enable;
        self
    }

    pub fn with_shell(mut self, enable: bool, shell: impl Into<String>) -> Self {
        self.options.enable_shell_execution = enable;
        self.options.use_shell = shell.into();
        self
    }

    pub fn with_secrets_expression(mut self, keyword: impl Into<String>) -> Self {
        self.options.secrets_expression = keyword.into();
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_variables<I, K, V>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.options
            .variables
            .extend(variables.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.command_timeout = timeout;
        self
    }

    pub fn add_vault_expander(mut self, expander: impl VaultExpander + 'static) -> Self {
        self.expanders.push(Box::new(expander));
        self
    }

    pub fn with_vault_expanders(mut self, expanders: Vec<Box<dyn VaultExpander>>) -> Self {
        self.expanders.extend(expanders);
        self
    }

    pub fn build(self) -> ExpansionOptions {
        let mut options = self.options;
        let keyword = options.secrets_expression.clone();
        for mut expander in self.expanders {
            expander.set_secrets_expression(&keyword);
            options.vault_expanders.push(Arc::from(expander));
        }
        options
    }
}
