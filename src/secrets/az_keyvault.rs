//! Cloud key-vault backend driven by the Azure CLI.
//!
//! `secret akv://my-vault/db-password --create` reads the secret through
//! `az keyvault secret show` and, when it does not exist and `--create` is
//! given, generates one and stores it with `az keyvault secret set`.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::expression::{SecretExpression, DEFAULT_SECRETS_EXPRESSION};
use super::vault::{expression_target, redact_secret, starts_with_ignore_case, VaultExpander};
use crate::expansion::{ExpansionError, ExpansionResult};
use crate::infra::abort_signal::AbortHandle;
use crate::infra::process::{self, CommandOutput, CommandSpec};

pub const AKV_SCHEME: &str = "akv";
pub const AKV_SCHEME_ALIAS: &str = "azure-key-vault";

const SCHEMES: [&str; 2] = [AKV_SCHEME, AKV_SCHEME_ALIAS];

/// Key-vault backend. Every call shells out to `az`; nothing is cached.
#[derive(Clone)]
pub struct AzKeyVaultExpander {
    pub az_path: String,
    pub secrets_expression: String,
    /// Vault used for `secret default ...` and to narrow `can_handle`.
    pub vault_name: Option<String>,
    pub is_default: bool,
    /// Run `az login` and retry once when the CLI reports no session.
    pub auto_login: bool,
    pub managed_identity: bool,
    pub use_device_code: bool,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub tenant_id: Option<String>,
    pub working_directory: Option<PathBuf>,
}

impl Default for AzKeyVaultExpander {
    fn default() -> Self {
        Self {
            az_path: "az".to_string(),
            secrets_expression: DEFAULT_SECRETS_EXPRESSION.to_string(),
            vault_name: None,
            is_default: false,
            auto_login: false,
            managed_identity: false,
            use_device_code: false,
            client_id: None,
            client_secret: None,
            tenant_id: None,
            working_directory: None,
        }
    }
}

impl std::fmt::Debug for AzKeyVaultExpander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzKeyVaultExpander")
            .field("az_path", &self.az_path)
            .field("vault_name", &self.vault_name)
            .field("is_default", &self.is_default)
            .field("auto_login", &self.auto_login)
            .field("managed_identity", &self.managed_identity)
            .field("use_device_code", &self.use_device_code)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

/// Where a secret lives inside a vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretLocation {
    pub vault: String,
    pub name: String,
    pub version: Option<String>,
}

impl SecretLocation {
    /// Vault from the host, or from the first path segment when the host is
    /// empty. The remaining path is `[version/]name`; `--name` is used when
    /// the path names no secret.
    pub fn from_expression(expr: &SecretExpression) -> Result<Self, ExpansionError> {
        let mut segments: Vec<&str> = expr
            .uri
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let vault = match expr.uri.host_str().filter(|h| !h.is_empty()) {
            Some(host) => host.to_string(),
            None if !segments.is_empty() => segments.remove(0).to_string(),
            None => {
                return Err(ExpansionError::secret_vault(format!(
                    "The vault name is missing in {}.",
                    expr.uri
                )))
            }
        };

        let (version, raw_name) = match segments.as_slice() {
            [] => (None, expr.name.clone().unwrap_or_default()),
            [name] => (None, name.to_string()),
            [version, rest @ ..] => (Some(version.to_string()), rest.join("/")),
        };

        let name = sanitize_name(&raw_name);
        if name.is_empty() {
            return Err(ExpansionError::secret_vault(
                "Secret name cannot be empty. Either use the --name flag or for akv add the name as a path e.g. akv://vault/secret-name.",
            ));
        }

        Ok(Self {
            vault,
            name,
            version,
        })
    }
}

/// Key-vault names allow ASCII letters, digits and `-`.
pub fn sanitize_name(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

/// Whether `az` output says there is no usable session.
fn is_unauthenticated(output: &CommandOutput) -> bool {
    let stderr = output.stderr.to_ascii_lowercase();
    stderr.contains("az login") || stderr.contains("aadsts") || stderr.contains("not logged in")
}

fn is_not_found(output: &CommandOutput) -> bool {
    output.stderr.contains("NotFound") || output.stdout.contains("NotFound")
}

fn check_abort(abort: Option<&AbortHandle>) -> Result<(), ExpansionError> {
    match abort {
        Some(handle) if handle.is_aborted() => Err(ExpansionError::cancelled()),
        _ => Ok(()),
    }
}

impl AzKeyVaultExpander {
    pub fn new() -> Self {
        Self::default()
    }

    fn default_uri(&self) -> Option<String> {
        if !self.is_default {
            return None;
        }
        let vault = self.vault_name.as_deref().filter(|v| !v.trim().is_empty())?;
        Some(format!("{AKV_SCHEME}://{vault}"))
    }

    fn resolve(&self, args: &[String], abort: Option<&AbortHandle>) -> ExpansionResult {
        let default_uri = self.default_uri();
        let expr = SecretExpression::parse(
            args,
            &self.secrets_expression,
            self.working_directory.as_deref(),
            default_uri.as_deref(),
        )
        .map_err(|e| ExpansionError::secret_vault(format!("Failed to parse the secret expression: {e}")))?;
        let location = SecretLocation::from_expression(&expr)?;
        let mut logged_in = false;

        let show = self.show_command(&location);
        let output = self.run_az(&show, &expr, abort, &mut logged_in)?;
        if output.success {
            debug!(vault = %location.vault, name = %location.name, "secret found");
            return Ok(output.stdout.trim().to_string());
        }

        if !(is_not_found(&output) && expr.create) {
            return Err(ExpansionError::secret_vault(format!(
                "Failed to expand secret '{}' from vault '{}': {}",
                location.name,
                location.vault,
                output.stderr.trim()
            )));
        }

        let value = expr.generate();
        let set = self.set_command(&location, &value, &expr);
        let output = self.run_az(&set, &expr, abort, &mut logged_in)?;
        if !output.success {
            return Err(ExpansionError::secret_vault(format!(
                "Failed to set secret '{}' in vault '{}': {}",
                location.name,
                location.vault,
                output.stderr.trim()
            )));
        }

        info!(
            vault = %location.vault,
            name = %location.name,
            preview = %redact_secret(&value),
            "created secret"
        );
        Ok(value)
    }

    fn base_command(&self) -> CommandSpec {
        let spec = CommandSpec::new(&self.az_path);
        match self.working_directory {
            Some(ref dir) => spec.current_dir(dir),
            None => spec,
        }
    }

    fn show_command(&self, location: &SecretLocation) -> CommandSpec {
        let mut spec = self.base_command().args([
            "keyvault",
            "secret",
            "show",
            "--vault-name",
            location.vault.as_str(),
            "--name",
            location.name.as_str(),
        ]);
        if let Some(ref version) = location.version {
            spec = spec.args(["--version", version.as_str()]);
        }
        spec.args(["-o", "tsv", "--query", "value"])
    }

    fn set_command(
        &self,
        location: &SecretLocation,
        value: &str,
        expr: &SecretExpression,
    ) -> CommandSpec {
        // Joined so a value starting with `-` is not read as a flag.
        let value = format!("--value={value}");
        let mut spec = self.base_command().args([
            "keyvault",
            "secret",
            "set",
            "--vault-name",
            location.vault.as_str(),
            "--name",
            location.name.as_str(),
            value.as_str(),
        ]);
        if let Some(expires) = expr.expires_at {
            spec = spec.args(["--expires".to_string(), expires.format("%Y-%m-%dT%H:%M:%SZ").to_string()]);
        }
        spec.args(["-o", "none"])
    }

    /// Credential from the backend field, then the expression flag, then the
    /// environment.
    fn credential(&self, field: &Option<String>, expr: &SecretExpression, flag: &str, env: &str) -> Option<String> {
        field
            .clone()
            .or_else(|| {
                expr.flag_value(flag)
                    .filter(|v| !v.starts_with('-'))
                    .map(str::to_string)
            })
            .or_else(|| std::env::var(env).ok())
            .filter(|v| !v.trim().is_empty())
    }

    fn login_command(&self, expr: &SecretExpression) -> CommandSpec {
        let client_id = self.credential(&self.client_id, expr, "--client-id", "AZURE_CLIENT_ID");
        let client_secret =
            self.credential(&self.client_secret, expr, "--client-secret", "AZURE_CLIENT_SECRET");
        let tenant_id = self.credential(&self.tenant_id, expr, "--tenant-id", "AZURE_TENANT_ID");

        let mut spec = self.base_command().arg("login");
        if self.managed_identity {
            spec = spec.arg("--identity");
            if let Some(id) = client_id {
                spec = spec.args(["--username".to_string(), id]);
            }
        } else if let (Some(id), Some(secret), Some(tenant)) =
            (client_id, client_secret, tenant_id.clone())
        {
            spec = spec.args([
                "--service-principal".to_string(),
                "-u".to_string(),
                id,
                "-p".to_string(),
                secret,
                "--tenant".to_string(),
                tenant,
            ]);
        } else {
            if self.use_device_code {
                spec = spec.arg("--use-device-code");
            }
            if let Some(tenant) = tenant_id {
                spec = spec.args(["--tenant".to_string(), tenant]);
            }
        }
        spec.args(["-o", "none"])
    }

    /// Run an `az` command. When the CLI reports no session and auto-login
    /// is enabled, log in and retry once per expansion.
    fn run_az(
        &self,
        spec: &CommandSpec,
        expr: &SecretExpression,
        abort: Option<&AbortHandle>,
        logged_in: &mut bool,
    ) -> Result<CommandOutput, ExpansionError> {
        check_abort(abort)?;
        let output = process::run_blocking(spec).map_err(|e| ExpansionError::secret_vault(e.to_string()))?;
        if output.success || !self.auto_login || *logged_in || !is_unauthenticated(&output) {
            return Ok(output);
        }

        *logged_in = true;
        warn!("az is not logged in, running az login");
        check_abort(abort)?;
        let login = self.login_command(expr);
        let result = process::run_blocking(&login).map_err(|e| ExpansionError::secret_vault(e.to_string()))?;
        if !result.success {
            return Err(ExpansionError::secret_vault(format!(
                "Azure CLI login failed: {}",
                result.stderr.trim()
            )));
        }

        check_abort(abort)?;
        process::run_blocking(spec).map_err(|e| ExpansionError::secret_vault(e.to_string()))
    }
}

#[async_trait]
impl VaultExpander for AzKeyVaultExpander {
    fn name(&self) -> &str {
        AKV_SCHEME
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

        if target == "default" {
            return self.default_uri().is_some();
        }

        SCHEMES.iter().any(|scheme| match self.vault_name.as_deref() {
            Some(vault) if !self.is_default => {
                starts_with_ignore_case(target, &format!("{scheme}://{vault}"))
                    || starts_with_ignore_case(target, &format!("{scheme}:///{vault}"))
            }
            _ => starts_with_ignore_case(target, &format!("{scheme}://")),
        })
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
            .map_err(|e| ExpansionError::secret_vault(format!("az task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::expression::parse_args;
    use pretty_assertions::assert_eq;

    fn expression(text: &str) -> SecretExpression {
        SecretExpression::parse(&parse_args(text), "secret", None, None).unwrap()
    }

    #[test]
    fn location_from_host_and_path() {
        let loc = SecretLocation::from_expression(&expression("secret akv://kv1/db-password")).unwrap();
        assert_eq!(loc.vault, "kv1");
        assert_eq!(loc.name, "db-password");
        assert_eq!(loc.version, None);

        let loc = SecretLocation::from_expression(&expression("secret akv:///kv2/abc123/api_key")).unwrap();
        assert_eq!(loc.vault, "kv2");
        assert_eq!(loc.version.as_deref(), Some("abc123"));
        assert_eq!(loc.name, "api-key");

        let loc = SecretLocation::from_expression(&expression("secret akv://kv3 --name token")).unwrap();
        assert_eq!(loc.name, "token");
    }

    #[test]
    fn location_requires_name() {
        let err = SecretLocation::from_expression(&expression("secret akv://kv1")).unwrap_err();
        assert!(err.message.starts_with("Secret name cannot be empty"));
    }

    #[test]
    fn can_handle_schemes_and_default() {
        let args = |t: &str| parse_args(t);
        let mut akv = AzKeyVaultExpander::new();
        assert!(akv.can_handle(&args("secret akv://kv/name -C")));
        assert!(akv.can_handle(&args("secret azure-key-vault://kv/name -C")));
        assert!(!akv.can_handle(&args("secret sops-env:///x --name a")));
        assert!(!akv.can_handle(&args("secret default --name a")));
        assert!(!akv.can_handle(&args("secret akv://kv/name")));

        akv.vault_name = Some("kv".into());
        assert!(!akv.can_handle(&args("secret akv://other/name -C")));

        akv.is_default = true;
        assert!(akv.can_handle(&args("secret default --name a")));
        assert!(akv.can_handle(&args("secret akv://other/name -C")));
    }

    #[test]
    fn unauthenticated_markers() {
        let output = |stderr: &str| CommandOutput {
            success: false,
            code: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        };
        assert!(is_unauthenticated(&output("ERROR: Please run 'az login' to setup account.")));
        assert!(is_unauthenticated(&output("AADSTS700082: The refresh token has expired")));
        assert!(!is_unauthenticated(&output("(SecretNotFound) A secret was not found")));
        assert!(is_not_found(&output("(SecretNotFound) A secret was not found")));
    }

    #[test]
    fn login_command_precedence() {
        let mut akv = AzKeyVaultExpander::new();
        akv.client_id = Some("field-id".into());
        let expr = expression(
            "secret akv://kv/n --client-id flag-id --client-secret s3cret --tenant-id t1",
        );
        let login = akv.login_command(&expr);
        assert_eq!(
            login.args,
            vec!["login", "--service-principal", "-u", "field-id", "-p", "s3cret", "--tenant", "t1", "-o", "none"]
        );

        akv.managed_identity = true;
        let login = akv.login_command(&expr);
        assert_eq!(login.args, vec!["login", "--identity", "--username", "field-id", "-o", "none"]);
    }

    #[test]
    fn set_command_carries_expiry() {
        let akv = AzKeyVaultExpander::new();
        let expr = expression("secret akv://kv/n --create --expires-at 2030-01-02");
        let loc = SecretLocation::from_expression(&expr).unwrap();
        let set = akv.set_command(&loc, "v", &expr);
        assert!(set.args.windows(2).any(|w| w == ["--expires", "2030-01-02T00:00:00Z"]));
        assert_eq!(set.args.last().map(String::as_str), Some("none"));
    }

    #[test]
    fn set_command_joins_value_to_flag() {
        let akv = AzKeyVaultExpander::new();
        let expr = expression("secret akv://kv/n --create");
        let loc = SecretLocation::from_expression(&expr).unwrap();
        let set = akv.set_command(&loc, "-leading|dash", &expr);
        assert!(set.args.iter().any(|a| a == "--value=-leading|dash"));
        assert!(!set.args.iter().any(|a| a == "--value"));
    }

    #[cfg(unix)]
    mod fake_az {
        use super::*;
        use pretty_assertions::assert_eq;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;
        use tempfile::TempDir;

        /// A fake `az` storing secrets as files named `<vault>.<name>`.
        struct FakeAz {
            dir: TempDir,
            path: PathBuf,
        }

        impl FakeAz {
            fn new() -> Self {
                let dir = TempDir::new().unwrap();
                let state = dir.path().display().to_string();
                let script = format!(
                    r#"#!/bin/sh
state="{state}"
echo "$*" >> "$state/calls.log"
if [ "$1" = "login" ]; then
  [ -f "$state/login-broken" ] || touch "$state/logged-in"
  exit 0
fi
if [ -f "$state/require-login" ] && [ ! -f "$state/logged-in" ]; then
  echo "ERROR: Please run 'az login' to setup account." >&2
  exit 1
fi
sub="$3"
vault=""
name=""
value=""
while [ $# -gt 0 ]; do
  case "$1" in
    --vault-name) vault="$2"; shift 2 ;;
    --name) name="$2"; shift 2 ;;
    --value=*) value="${{1#--value=}}"; shift ;;
    *) shift ;;
  esac
done
file="$state/$vault.$name"
case "$sub" in
  show)
    if [ -f "$file" ]; then cat "$file"; echo; exit 0; fi
    echo "ERROR: (SecretNotFound) A secret with (name/id) $name was not found in this key vault." >&2
    exit 3
    ;;
  set)
    printf '%s' "$value" > "$file"
    exit 0
    ;;
esac
exit 9
"#
                );
                let path = dir.path().join("fake-az");
                std::fs::write(&path, script).unwrap();
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
                Self { dir, path }
            }

            fn state(&self) -> &Path {
                self.dir.path()
            }

            fn expander(&self) -> AzKeyVaultExpander {
                AzKeyVaultExpander {
                    az_path: self.path.display().to_string(),
                    ..AzKeyVaultExpander::default()
                }
            }

            fn put(&self, vault: &str, name: &str, value: &str) {
                std::fs::write(self.state().join(format!("{vault}.{name}")), value).unwrap();
            }

            fn calls(&self) -> Vec<String> {
                std::fs::read_to_string(self.state().join("calls.log"))
                    .unwrap_or_default()
                    .lines()
                    .map(str::to_string)
                    .collect()
            }
        }

        #[test]
        fn reads_existing_secret() {
            let az = FakeAz::new();
            az.put("kv", "db-password", "hunter2");
            let value = az
                .expander()
                .expand(&parse_args("secret akv://kv/db-password -C"))
                .unwrap();
            assert_eq!(value, "hunter2");
            assert_eq!(
                az.calls(),
                vec!["keyvault secret show --vault-name kv --name db-password -o tsv --query value"]
            );
        }

        #[test]
        fn missing_secret_without_create_fails() {
            let az = FakeAz::new();
            let err = az
                .expander()
                .expand(&parse_args("secret akv://kv/nope --size 8"))
                .unwrap_err();
            assert!(err.message.contains("SecretNotFound"), "{}", err.message);
            assert_eq!(az.calls().len(), 1);
        }

        #[test]
        fn creates_missing_secret() {
            let az = FakeAz::new();
            let value = az
                .expander()
                .expand(&parse_args("secret akv://kv/new-one --create --size 20 --no-special"))
                .unwrap();
            assert_eq!(value.len(), 20);
            assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
            let stored = std::fs::read_to_string(az.state().join("kv.new-one")).unwrap();
            assert_eq!(stored, value);
            assert!(az.calls()[1].starts_with("keyvault secret set --vault-name kv --name new-one --value="));
        }

        #[test]
        fn logs_in_and_retries_once() {
            let az = FakeAz::new();
            az.put("kv", "a", "1");
            std::fs::write(az.state().join("require-login"), "").unwrap();

            let mut expander = az.expander();
            let err = expander
                .expand(&parse_args("secret akv://kv/a -C"))
                .unwrap_err();
            assert!(err.message.contains("az login"));
            assert_eq!(az.calls().len(), 1, "no login without auto_login");

            expander.auto_login = true;
            expander.use_device_code = true;
            let value = expander.expand(&parse_args("secret akv://kv/a -C")).unwrap();
            assert_eq!(value, "1");
            let calls = az.calls();
            assert_eq!(calls[2], "login --use-device-code -o none");
            assert_eq!(calls.len(), 4);
        }

        #[test]
        fn login_that_does_not_help_is_not_retried_again() {
            let az = FakeAz::new();
            std::fs::write(az.state().join("require-login"), "").unwrap();
            std::fs::write(az.state().join("login-broken"), "").unwrap();

            let mut expander = az.expander();
            expander.auto_login = true;
            let err = expander
                .expand(&parse_args("secret akv://kv/a --create"))
                .unwrap_err();
            assert!(err.message.starts_with("Failed to expand secret 'a'"), "{}", err.message);
            assert_eq!(az.calls().len(), 3);
        }

        #[tokio::test]
        async fn async_default_vault() {
            let az = FakeAz::new();
            az.put("main", "token", "t0k3n");
            let mut expander = az.expander();
            expander.vault_name = Some("main".into());
            expander.is_default = true;

            let args = parse_args("secret default --name token");
            assert!(expander.can_handle(&args));
            let abort = AbortHandle::new();
            assert_eq!(expander.expand_async(&args, &abort).await.unwrap(), "t0k3n");

            abort.abort();
            let err = expander.expand_async(&args, &abort).await.unwrap_err();
            assert_eq!(err.kind, crate::expansion::ExpansionErrorKind::Cancelled);
        }
    }
}
