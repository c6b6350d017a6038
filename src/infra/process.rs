//! External process invocation shared by subshell expansion and the vault
//! backends.
//!
//! Every command runs with stdin closed and stdout/stderr captured. The
//! blocking variant serves the synchronous expander; the tokio variant serves
//! the asynchronous one and is the only place a child can be killed (on
//! timeout).

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Default time limit for a subshell command in the asynchronous expander.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;

/// A program invocation: executable, arguments, extra environment and
/// working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Program plus its first argument, for log lines. Arguments can carry
    /// secret values so the rest are never printed.
    pub fn summary(&self) -> String {
        match self.args.first() {
            Some(first) => format!("{} {} (+{} args)", self.program, first, self.args.len() - 1),
            None => self.program.clone(),
        }
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    fn from_output(output: std::process::Output) -> Self {
        Self {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }

    /// Human readable exit status, `"signal"` when the process was killed.
    pub fn status_text(&self) -> String {
        match self.code {
            Some(code) => code.to_string(),
            None => "signal".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program}' timed out after {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },
}

/// Run a command on the calling thread and wait for it to exit.
pub fn run_blocking(spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
    debug!("running {}", spec.summary());

    let mut cmd = std::process::Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(ref cwd) = spec.cwd {
        cmd.current_dir(cwd);
    }

    cmd.output()
        .map(CommandOutput::from_output)
        .map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })
}

/// Run a command on the tokio runtime.
///
/// With a timeout, a child that outlives it is killed and
/// [`ProcessError::Timeout`] is returned.
pub async fn run(
    spec: &CommandSpec,
    timeout: Option<Duration>,
) -> Result<CommandOutput, ProcessError> {
    debug!("running {}", spec.summary());

    let mut cmd = tokio::process::Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(ref cwd) = spec.cwd {
        cmd.current_dir(cwd);
    }

    let spawn_error = |source| ProcessError::Spawn {
        program: spec.program.clone(),
        source,
    };

    match timeout {
        Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
            Ok(output) => output.map(CommandOutput::from_output).map_err(spawn_error),
            // Dropping the output future drops the child, which kills it.
            Err(_) => Err(ProcessError::Timeout {
                program: spec.program.clone(),
                timeout: limit,
            }),
        },
        None => cmd
            .output()
            .await
            .map(CommandOutput::from_output)
            .map_err(spawn_error),
    }
}

/// Whether `shell` names a PowerShell executable (`pwsh`, `powershell.exe`, ...).
pub fn is_powershell(shell: &str) -> bool {
    let stem = std::path::Path::new(shell)
        .file_stem()
        .map(|s| s.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    stem == "pwsh" || stem == "powershell"
}

/// Build the invocation that runs `script` through `shell`.
pub fn shell_command(shell: &str, script: &str) -> CommandSpec {
    let stem = std::path::Path::new(shell)
        .file_stem()
        .map(|s| s.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let spec = CommandSpec::new(shell);
    if is_powershell(shell) {
        spec.args([
            "-NoLogo",
            "-NoProfile",
            "-NonInteractive",
            "-ExecutionPolicy",
            "Bypass",
            "-Command",
            script,
        ])
    } else if stem == "bash" {
        spec.args(["-noprofile", "--norc", "-e", "-o", "pipefail", "-c", script])
    } else {
        spec.args(["-c", script])
    }
}
