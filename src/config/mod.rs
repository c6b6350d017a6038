mod defaults;
mod io;
mod types;
mod validation;

pub use defaults::*;
pub use io::*;
pub use types::*;
pub use validation::*;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::dotenv::ReaderOptions;
use crate::expansion::{Expander, ExpansionOptions};
use crate::secrets::{AzKeyVaultExpander, SopsEnvExpander, VaultExpander};

/// Top-level dotvault configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub expansion: ExpansionConfig,
    #[serde(default)]
    pub reader: ReaderOptions,
    #[serde(default)]
    pub vaults: VaultsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,

    /// File the configuration was read from.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file, environment, and defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(explicit) => {
                let explicit = PathBuf::from(explicit);
                if !explicit.exists() {
                    bail!("Config file '{}' does not exist", explicit.display());
                }
                Some(explicit)
            }
            None => find_config_file(),
        };

        let mut config = match config_path {
            Some(ref config_path) => {
                info!("Loading config from {}", config_path.display());
                let mut config = load_config_file(config_path)?;
                config.source = Some(config_path.clone());
                config
            }
            None => {
                info!("No config file found, using defaults");
                Config::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Write default configuration to a file.
    pub fn write_default(path: &str) -> Result<()> {
        write_config_file(std::path::Path::new(path), &Config::default())
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(shell) = lookup("DOTVAULT_SHELL") {
            self.expansion.use_shell = shell;
        }

        if let Some(keyword) = lookup("DOTVAULT_SECRETS_EXPRESSION") {
            self.expansion.secrets_expression = keyword;
        }

        let flags = [
            ("DOTVAULT_ENABLE_COMMANDS", &mut self.expansion.enable_command_substitution),
            ("DOTVAULT_ENABLE_SECRETS", &mut self.expansion.enable_secret_substitution),
            ("DOTVAULT_ENABLE_SHELL", &mut self.expansion.enable_shell_execution),
        ];
        for (key, target) in flags {
            if let Some(value) = lookup(key) {
                match parse_bool(&value) {
                    Some(flag) => *target = flag,
                    None => warn!("Ignoring {key}={value}: expected a boolean"),
                }
            }
        }

        if let Some(level) = lookup("DOTVAULT_LOG") {
            match level.parse() {
                Ok(level) => self.logging.level = level,
                Err(e) => warn!("Ignoring DOTVAULT_LOG: {e}"),
            }
        }
    }

    /// Vault backends in registration order: key vault, then sops.
    pub fn vault_expanders(&self) -> Vec<Box<dyn VaultExpander>> {
        let mut expanders: Vec<Box<dyn VaultExpander>> = Vec::new();

        if let Some(ref akv) = self.vaults.azure_key_vault {
            expanders.push(Box::new(AzKeyVaultExpander {
                az_path: akv.az_path().to_string(),
                vault_name: akv.vault_name.clone(),
                is_default: akv.is_default,
                auto_login: akv.auto_login,
                managed_identity: akv.managed_identity,
                use_device_code: akv.use_device_code,
                client_id: akv.client_id.clone(),
                client_secret: akv.client_secret.clone(),
                tenant_id: akv.tenant_id.clone(),
                ..AzKeyVaultExpander::default()
            }));
        }

        if let Some(ref sops) = self.vaults.sops_env {
            expanders.push(Box::new(SopsEnvExpander {
                sops_path: sops.sops_path().to_string(),
                env_path: sops.env_path.clone(),
                sops_config_path: sops.sops_config_path.clone(),
                age_key_file: sops.age_key_file.clone(),
                age_key: sops.age_key.clone(),
                age_recipients: sops.age_recipients.clone(),
                is_default: sops.is_default,
                ..SopsEnvExpander::default()
            }));
        }

        expanders
    }

    /// Expansion options for this configuration with `args` as the
    /// positional arguments.
    pub fn expansion_options(&self, args: Vec<String>) -> ExpansionOptions {
        let expansion = &self.expansion;
        let timeout = (expansion.command_timeout_secs > 0)
            .then(|| Duration::from_secs(expansion.command_timeout_secs));

        ExpansionOptions::builder()
            .with_unix_args(expansion.enable_unix_args)
            .with_windows_variables(expansion.enable_windows_variables)
            .with_command_substitution(expansion.enable_command_substitution)
            .with_secret_substitution(expansion.enable_secret_substitution)
            .with_shell(expansion.enable_shell_execution, expansion.use_shell.clone())
            .with_secrets_expression(expansion.secrets_expression.clone())
            .with_variables(expansion.variables.clone())
            .with_args(args)
            .with_command_timeout(timeout)
            .with_vault_expanders(self.vault_expanders())
            .build()
    }

    pub fn expander(&self, args: Vec<String>) -> Expander {
        Expander::new(self.expansion_options(args))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Find the configuration file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILE_NAMES {
        let path = PathBuf::from(name);
        if path.exists() {
            return Some(path);
        }
    }

    // Check home directory
    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(HOME_CONFIG_DIR).join("config.json");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DOTVAULT_SHELL", "pwsh"),
            ("DOTVAULT_SECRETS_EXPRESSION", "vault"),
            ("DOTVAULT_ENABLE_COMMANDS", "yes"),
            ("DOTVAULT_ENABLE_SECRETS", "nonsense"),
            ("DOTVAULT_LOG", "trace"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.expansion.use_shell, "pwsh");
        assert_eq!(config.expansion.secrets_expression, "vault");
        assert!(config.expansion.enable_command_substitution);
        assert!(!config.expansion.enable_secret_substitution);
        assert_eq!(config.logging.level, LoggingLevel::Trace);
    }

    #[test]
    fn vault_registration_order_and_keyword() {
        let mut config = Config::default();
        config.expansion.secrets_expression = "vault".into();
        config.vaults.sops_env = Some(SopsEnvConfig::default());
        config.vaults.azure_key_vault = Some(AzureKeyVaultConfig::default());

        let options = config.expansion_options(vec!["a".into()]);
        let names: Vec<&str> = options.vault_expanders.iter().map(|v| v.name()).collect();
        assert_eq!(names, vec!["akv", "sops-env"]);
        assert!(options
            .vault_expanders
            .iter()
            .all(|v| v.secrets_expression() == "vault"));
        assert_eq!(options.args, vec!["a"]);
    }

    #[test]
    fn zero_timeout_disables_limit() {
        let mut config = Config::default();
        assert_eq!(
            config.expansion_options(Vec::new()).command_timeout,
            Some(Duration::from_secs(300))
        );
        config.expansion.command_timeout_secs = 0;
        assert_eq!(config.expansion_options(Vec::new()).command_timeout, None);
    }

    #[test]
    fn expander_uses_configured_variables() {
        let mut config = Config::default();
        config
            .expansion
            .variables
            .insert("REGION".into(), "eu".into());
        let summary = config
            .expander(Vec::new())
            .expand(crate::dotenv::Document::parse("URL=https://${REGION}.example\n").unwrap());
        assert!(!summary.is_error());
        assert_eq!(summary.document.get("URL"), Some("https://eu.example"));
    }

    #[test]
    fn written_default_loads_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("dotvault.json");
        let path = path.to_str().unwrap();

        Config::write_default(path).unwrap();
        let config = Config::load(Some(path)).unwrap();

        assert_eq!(config.expansion.command_timeout_secs, 300);
        assert!(config.vaults.sops_env.is_none());
        assert_eq!(config.source.as_deref(), Some(std::path::Path::new(path)));
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let err = Config::load(Some("/definitely/not/here/dotvault.json")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
