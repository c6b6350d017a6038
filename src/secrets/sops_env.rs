//! Encrypted dotenv file vault backed by the `sops` CLI.
//!
//! Resolves `secret sops-env:///path/to/.env.secrets --name db-password`.
//! The file is decrypted once per backend instance and kept in memory.
//! Creating a missing secret rewrites and re-encrypts the whole file, so every
//! decrypt and encrypt runs under one lock per backend.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error, info};
use url::Url;

use super::expression::{SecretExpression, DEFAULT_SECRETS_EXPRESSION};
use super::vault::{expression_target, redact_secret, starts_with_ignore_case, VaultExpander};
use crate::dotenv::{Document, ReaderOptions};
use crate::expansion::{ExpansionError, ExpansionResult};
use crate::infra::abort_signal::AbortHandle;
use crate::infra::process::{self, CommandSpec};

pub const SOPS_ENV_SCHEME: &str = "sops-env";

/// Vault over a sops-encrypted dotenv file.
///
/// Clones share the decrypted-file cache and the lock.
#[derive(Clone)]
pub struct SopsEnvExpander {
    pub sops_path: String,
    pub secrets_expression: String,
    /// Absolute path of the default file. Narrows `can_handle` to that file.
    pub env_path: Option<String>,
    pub sops_config_path: Option<String>,
    pub age_key_file: Option<String>,
    /// Age private key material.
    pub age_key: Option<String>,
    pub age_recipients: Option<String>,
    /// Substituted for `$CWD` and `$PWD` in URIs.
    pub working_directory: Option<PathBuf>,
    pub is_default: bool,
    pub(crate) cache: Arc<Mutex<HashMap<String, Document>>>,
}

impl Default for SopsEnvExpander {
    fn default() -> Self {
        Self {
            sops_path: "sops".to_string(),
            secrets_expression: DEFAULT_SECRETS_EXPRESSION.to_string(),
            env_path: None,
            sops_config_path: None,
            age_key_file: None,
            age_key: None,
            age_recipients: None,
            working_directory: None,
            is_default: false,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl fmt::Debug for SopsEnvExpander {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SopsEnvExpander")
            .field("sops_path", &self.sops_path)
            .field("secrets_expression", &self.secrets_expression)
            .field("env_path", &self.env_path)
            .field("sops_config_path", &self.sops_config_path)
            .field("age_key_file", &self.age_key_file)
            .field("age_key", &self.age_key.as_ref().map(|_| "<redacted>"))
            .field("age_recipients", &self.age_recipients)
            .field("working_directory", &self.working_directory)
            .field("is_default", &self.is_default)
            .finish()
    }
}

/// Key material and flags for one sops invocation.
struct SopsSettings {
    config: Option<String>,
    envs: Vec<(String, String)>,
}

impl SopsEnvExpander {
    pub fn new() -> Self {
        Self::default()
    }

    fn default_uri(&self) -> Option<String> {
        if !self.is_default {
            return None;
        }
        let path = self.env_path.as_deref()?;
        Some(format!("{SOPS_ENV_SCHEME}:///{}", path.trim_start_matches('/')))
    }

    /// Number of decrypted files held in memory.
    pub fn cached_files(&self) -> usize {
        self.cache.lock().len()
    }

    fn resolve(&self, args: &[String], abort: Option<&AbortHandle>) -> ExpansionResult {
        let default_uri = self.default_uri();
        let expr = SecretExpression::parse(
            args,
            &self.secrets_expression,
            self.working_directory.as_deref(),
            default_uri.as_deref(),
        )
        .map_err(|e| {
            ExpansionError::secret_vault(format!("Failed to parse the secret expression: {e}"))
        })?;

        let name = secret_name(&expr)?;
        let path = file_path(&expr.uri)?;
        let key = cache_key(&expr.uri);

        let mut cache = self.cache.lock();

        if !cache.contains_key(&key) {
            check_abort(abort)?;
            let document = self.decrypt(&expr, &path)?;
            cache.insert(key.clone(), document);
        }

        let Some(document) = cache.get(&key) else {
            return Err(ExpansionError::secret_vault("The env file is empty or not found."));
        };

        if let Some(value) = document.get(&name) {
            debug!(name = %name, file = %path.display(), "secret found");
            return Ok(value.to_string());
        }

        if !expr.create {
            return Err(ExpansionError::secret_vault(format!(
                "The secret '{name}' was not found in the env file."
            )));
        }

        check_abort(abort)?;
        let value = expr.generate();
        let mut updated = document.clone();
        updated.set(&name, value.clone());

        self.encrypt(&expr, &path, &updated)?;
        cache.insert(key, updated);
        info!(
            name = %name,
            file = %path.display(),
            preview = %redact_secret(&value),
            "created secret"
        );
        Ok(value)
    }

    fn settings(&self, expr: &SecretExpression, path: &Path) -> SopsSettings {
        let query: HashMap<String, String> = expr
            .uri
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        // Expression flag, then URI query, then backend field.
        let pick = |field: &Option<String>, key: &str| -> Option<String> {
            expr.flag_value(&format!("--{key}"))
                .filter(|v| !v.is_empty() && !v.starts_with('-'))
                .map(str::to_string)
                .or_else(|| query.get(key).filter(|v| !v.trim().is_empty()).cloned())
                .or_else(|| field.clone().filter(|v| !v.trim().is_empty()))
        };

        let age_key_file = pick(&self.age_key_file, "age-key-file");
        let recipients = pick(&self.age_recipients, "age-recipients");
        let config = pick(&self.sops_config_path, "sops-config").or_else(|| {
            let beside = path.parent()?.join(".sops.yaml");
            beside
                .is_file()
                .then(|| beside.to_string_lossy().into_owned())
        });

        // `age-key` in a query or flag names an environment variable.
        let age_key = expr
            .flag_value("--age-key")
            .filter(|v| !v.starts_with('-'))
            .or_else(|| query.get("age-key").map(String::as_str))
            .and_then(|var| std::env::var(var).ok())
            .or_else(|| self.age_key.clone())
            .filter(|v| !v.trim().is_empty());

        let mut envs = Vec::new();
        if let Some(file) = age_key_file {
            envs.push(("SOPS_AGE_KEY_FILE".to_string(), file));
        }
        if let Some(key) = age_key {
            envs.push(("SOPS_AGE_KEY".to_string(), key));
        }
        if let Some(recipients) = recipients {
            envs.push(("SOPS_AGE_RECIPIENTS".to_string(), recipients));
        }

        SopsSettings { config, envs }
    }

    fn sops_command(&self, settings: &SopsSettings, mode: &[&str], path: &Path) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.sops_path);
        if let Some(ref config) = settings.config {
            spec = spec.args(["--config", config.as_str()]);
        }
        spec = spec
            .args(["--input-type", "dotenv", "--output-type", "dotenv"])
            .args(mode.iter().copied())
            .arg(path.to_string_lossy());
        for (key, value) in &settings.envs {
            spec = spec.env(key, value);
        }
        match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => spec.current_dir(dir),
            None => spec,
        }
    }

    fn decrypt(&self, expr: &SecretExpression, path: &Path) -> Result<Document, ExpansionError> {
        if !path.is_file() {
            return Err(ExpansionError::secret_vault(format!(
                "The file does not exist: {}",
                path.display()
            )));
        }

        debug!(file = %path.display(), "decrypting env file");
        let settings = self.settings(expr, path);
        let spec = self.sops_command(&settings, &["-d"], path);
        let output =
            process::run_blocking(&spec).map_err(|e| ExpansionError::secret_vault(e.to_string()))?;

        if !output.success {
            return Err(ExpansionError::secret_vault(format!(
                "Failed to decrypt {}: {}",
                path.display(),
                output.stderr.trim()
            )));
        }
        if output.stdout.trim().is_empty() {
            return Err(ExpansionError::secret_vault("The env file is empty or not found."));
        }

        Document::parse_with(&output.stdout, ReaderOptions::default()).map_err(|e| {
            ExpansionError::secret_vault(format!(
                "Failed to parse decrypted {}: {e}",
                path.display()
            ))
        })
    }

    /// Write `document` over `path` and encrypt it in place. On failure the
    /// previous file content is restored from a backup beside it.
    fn encrypt(
        &self,
        expr: &SecretExpression,
        path: &Path,
        document: &Document,
    ) -> Result<(), ExpansionError> {
        let content = document.to_string();
        if content.trim().is_empty() {
            return Err(ExpansionError::secret_vault("The content to encrypt is empty."));
        }

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let backup = tempfile::Builder::new()
            .prefix(".dotvault-backup-")
            .tempfile_in(dir)
            .map_err(|e| ExpansionError::secret_vault(format!("Failed to create backup: {e}")))?;
        std::fs::copy(path, backup.path())
            .map_err(|e| ExpansionError::secret_vault(format!("Failed to create backup: {e}")))?;

        let settings = self.settings(expr, path);
        let spec = self.sops_command(&settings, &["-e", "-i"], path);

        let attempt = || -> Result<(), String> {
            std::fs::write(path, &content)
                .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
            let output = process::run_blocking(&spec).map_err(|e| e.to_string())?;
            if !output.success {
                return Err(format!(
                    "sops exited with status {}: {}",
                    output.status_text(),
                    output.stderr.trim()
                ));
            }
            Ok(())
        };

        let Err(message) = attempt() else {
            return Ok(());
        };

        if let Err(restore) = std::fs::copy(backup.path(), path) {
            let kept = backup
                .keep()
                .map(|(_, kept)| kept.display().to_string())
                .unwrap_or_else(|e| e.to_string());
            error!(file = %path.display(), backup = %kept, "failed to restore env file: {restore}");
            return Err(ExpansionError::secret_vault(format!(
                "Failed to encrypt the file: {message}. Restoring the previous file also failed ({restore}); backup kept at {kept}"
            )));
        }

        Err(ExpansionError::secret_vault(format!(
            "Failed to encrypt the file: {message}"
        )))
    }
}

#[async_trait]
impl VaultExpander for SopsEnvExpander {
    fn name(&self) -> &str {
        SOPS_ENV_SCHEME
    }

    fn is_default(&self) -> bool {
        self.is_default
    }

    fn secrets_expression(&self) -> &str {
        &self.secrets_expression
    }

    fn set_secrets_expression(&mut self, keyword: &str) {
        self.secrets_expression = keyword.to_string();
    }

    fn can_handle(&self, args: &[String]) -> bool {
        let Some(target) = expression_target(args, &self.secrets_expression) else {
            return false;
        };

        if self.is_default && target == "default" && self.env_path.is_some() {
            return true;
        }

        match self.env_path.as_deref() {
            Some(env_path) => starts_with_ignore_case(
                target,
                &format!("{SOPS_ENV_SCHEME}:///{}", env_path.trim_start_matches('/')),
            ),
            None => starts_with_ignore_case(target, &format!("{SOPS_ENV_SCHEME}:///")),
        }
    }

    fn expand(&self, args: &[String]) -> ExpansionResult {
        self.resolve(args, None)
    }

    async fn expand_async(&self, args: &[String], abort: &AbortHandle) -> ExpansionResult {
        check_abort(Some(abort))?;
        let this = self.clone();
        let args = args.to_vec();
        let abort = abort.clone();
        tokio::task::spawn_blocking(move || this.resolve(&args, Some(&abort)))
            .await
            .map_err(|e| ExpansionError::secret_vault(format!("sops task failed: {e}")))?
    }
}

fn check_abort(abort: Option<&AbortHandle>) -> Result<(), ExpansionError> {
    match abort {
        Some(handle) if handle.is_aborted() => Err(ExpansionError::cancelled()),
        _ => Ok(()),
    }
}

fn secret_name(expr: &SecretExpression) -> Result<String, ExpansionError> {
    let raw = expr
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .or_else(|| {
            expr.uri
                .query_pairs()
                .find(|(k, _)| k == "name")
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or_default();

    let name = normalize_name(&raw);
    if name.is_empty() {
        return Err(ExpansionError::secret_vault(
            "Secret name cannot be empty. Use the --name option or the 'name' query parameter e.g. sops-env:///path/to/file?name=secretName.",
        ));
    }
    Ok(name)
}

/// Environment-style name: ASCII upper case, separators become `_`, leading
/// separators, other punctuation and non-ASCII characters are dropped.
pub fn normalize_name(value: &str) -> String {
    let mut name = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '-' | ' ' | '_' | '.' | '/' | ':' | '\\') {
            if !name.is_empty() {
                name.push('_');
            }
            continue;
        }
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_uppercase());
        }
    }
    name
}

/// Local path named by a `sops-env:///...` URI.
fn file_path(uri: &Url) -> Result<PathBuf, ExpansionError> {
    let invalid = || ExpansionError::secret_vault(format!("The path cannot be empty {uri}."));
    if uri.path().trim_matches('/').is_empty() {
        return Err(invalid());
    }
    Url::parse(&format!("file://{}", uri.path()))
        .ok()
        .and_then(|file| file.to_file_path().ok())
        .ok_or_else(invalid)
}

/// One cache slot per file: the URI without query and fragment.
fn cache_key(uri: &Url) -> String {
    let mut key = uri.clone();
    key.set_query(None);
    key.set_fragment(None);
    key.to_string()
}
