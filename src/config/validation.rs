use super::Config;
use anyhow::Result;
use tracing::warn;

/// Validation errors for configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn error(path: &str, message: &str) -> ConfigValidationError {
    ConfigValidationError {
        path: path.to_string(),
        message: message.to_string(),
    }
}

/// Validate a configuration object.
pub fn validate_config(config: &Config) -> Vec<ConfigValidationError> {
    let mut errors = Vec::new();
    let expansion = &config.expansion;

    if expansion.use_shell.trim().is_empty() {
        errors.push(error("expansion.useShell", "Shell name cannot be empty"));
    }

    if expansion.secrets_expression.trim().is_empty() {
        errors.push(error(
            "expansion.secretsExpression",
            "Secrets keyword cannot be blank",
        ));
    }

    if let Some(ref akv) = config.vaults.azure_key_vault {
        let has_vault = akv.vault_name.as_deref().is_some_and(|v| !v.trim().is_empty());
        if akv.is_default && !has_vault {
            errors.push(error(
                "vaults.azureKeyVault.vaultName",
                "A default key vault requires a vault name",
            ));
        }
        if akv.client_secret.is_some() && akv.client_id.is_none() {
            warn!("vaults.azureKeyVault has a client secret but no client id");
        }
    }

    if let Some(ref sops) = config.vaults.sops_env {
        match sops.env_path.as_deref() {
            Some(path) if !is_absolute_env_path(path) => {
                errors.push(error(
                    "vaults.sopsEnv.envPath",
                    "Path must be absolute or start with $CWD or $PWD",
                ));
            }
            None if sops.is_default => {
                errors.push(error(
                    "vaults.sopsEnv.envPath",
                    "A default sops vault requires an env path",
                ));
            }
            _ => {}
        }
    }

    errors
}

fn is_absolute_env_path(path: &str) -> bool {
    path.starts_with("$CWD")
        || path.starts_with("$PWD")
        || std::path::Path::new(path).is_absolute()
        || path.starts_with('/')
}

/// Validate configuration and return Result.
pub fn validate_config_object(config: &Config) -> Result<()> {
    let errors = validate_config(config);
    if errors.is_empty() {
        Ok(())
    } else {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        anyhow::bail!("Configuration validation failed:\n{}", messages.join("\n"));
    }
}
