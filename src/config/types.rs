use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::defaults::{DEFAULT_AZ_PATH, DEFAULT_SHELL, DEFAULT_SOPS_PATH};
use crate::infra::process::DEFAULT_COMMAND_TIMEOUT_SECS;
use crate::secrets::expression::DEFAULT_SECRETS_EXPRESSION;

// ============================================================================
// Expansion Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpansionConfig {
    #[serde(default)]
    pub enable_unix_args: bool,
    #[serde(default)]
    pub enable_windows_variables: bool,
    #[serde(default)]
    pub enable_command_substitution: bool,
    #[serde(default)]
    pub enable_secret_substitution: bool,
    #[serde(default)]
    pub enable_shell_execution: bool,
    #[serde(default = "default_shell")]
    pub use_shell: String,
    #[serde(default = "default_secrets_expression")]
    pub secrets_expression: String,
    /// Per-command limit in seconds; `0` disables it.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Extra variables consulted after the document.
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

fn default_shell() -> String {
    DEFAULT_SHELL.to_string()
}

fn default_secrets_expression() -> String {
    DEFAULT_SECRETS_EXPRESSION.to_string()
}

fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            enable_unix_args: false,
            enable_windows_variables: false,
            enable_command_substitution: false,
            enable_secret_substitution: false,
            enable_shell_execution: false,
            use_shell: default_shell(),
            secrets_expression: default_secrets_expression(),
            command_timeout_secs: default_command_timeout_secs(),
            variables: HashMap::new(),
        }
    }
}

// ============================================================================
// Vault Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VaultsConfig {
    pub azure_key_vault: Option<AzureKeyVaultConfig>,
    pub sops_env: Option<SopsEnvConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AzureKeyVaultConfig {
    pub az_path: Option<String>,
    pub vault_name: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub auto_login: bool,
    #[serde(default)]
    pub managed_identity: bool,
    #[serde(default)]
    pub use_device_code: bool,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub tenant_id: Option<String>,
}

impl AzureKeyVaultConfig {
    pub fn az_path(&self) -> &str {
        self.az_path.as_deref().unwrap_or(DEFAULT_AZ_PATH)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SopsEnvConfig {
    pub sops_path: Option<String>,
    /// Default encrypted file; may start with `$CWD` or `$PWD`.
    pub env_path: Option<String>,
    pub sops_config_path: Option<String>,
    pub age_key_file: Option<String>,
    pub age_key: Option<String>,
    pub age_recipients: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl SopsEnvConfig {
    pub fn sops_path(&self) -> &str {
        self.sops_path.as_deref().unwrap_or(DEFAULT_SOPS_PATH)
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Silent,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    /// Level name as understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Silent => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl std::str::FromStr for LoggingLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" | "off" => Ok(Self::Silent),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(format!("invalid log level: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LoggingLevel,
    /// One JSON object per line instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}
