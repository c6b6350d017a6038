use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub mod output;

pub use output::render;

#[derive(Parser)]
#[command(
    name = "dotvault",
    version,
    about = "Expand dotenv files with variables, commands and vault secrets"
)]
pub struct Cli {
    /// Log level when RUST_LOG is not set (overrides the config file).
    #[arg(long, global = true, env = "DOTVAULT_LOG")]
    pub log_level: Option<String>,
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse, expand and print dotenv files.
    Expand(ExpandOpts),
    /// Parse dotenv files without expanding them.
    Check(CheckOpts),
    /// Show how a secret expression is split into arguments.
    Args(ArgsOpts),
    /// Print a generated secret.
    Generate(GenerateOpts),
    Config(ConfigOpts),
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Dotenv,
    Json,
    Export,
}

#[derive(clap::Args)]
pub struct ExpandOpts {
    /// Dotenv files, concatenated in order. Defaults to `.env`.
    pub files: Vec<PathBuf>,
    #[arg(short, long)]
    pub config: Option<String>,
    /// Enable `$( ... )` command substitution.
    #[arg(long)]
    pub commands: bool,
    /// Enable `$(secret ...)` substitution.
    #[arg(long)]
    pub secrets: bool,
    /// Run commands through a shell.
    #[arg(long)]
    pub shell: bool,
    #[arg(long, value_name = "NAME")]
    pub shell_name: Option<String>,
    /// Enable `%NAME%` substitution.
    #[arg(long)]
    pub windows_vars: bool,
    /// Enable `$1`, `$2`, ... from the trailing arguments.
    #[arg(long)]
    pub unix_args: bool,
    /// Accept `{ ... }` JSON values.
    #[arg(long)]
    pub json_values: bool,
    /// Accept `---` delimited YAML values.
    #[arg(long)]
    pub yaml_values: bool,
    /// Extra variable, consulted after the document.
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub vars: Vec<(String, String)>,
    /// Per-command timeout in seconds; 0 disables it.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Dotenv)]
    pub format: OutputFormat,
    /// Positional arguments for `$1`, `$2`, ...
    #[arg(last = true)]
    pub args: Vec<String>,
}

#[derive(clap::Args)]
pub struct CheckOpts {
    pub files: Vec<PathBuf>,
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(clap::Args)]
pub struct ArgsOpts {
    pub text: String,
}

#[derive(clap::Args)]
pub struct GenerateOpts {
    #[arg(long, default_value_t = crate::secrets::expression::DEFAULT_SIZE)]
    pub size: usize,
    #[arg(long)]
    pub no_upper: bool,
    #[arg(long)]
    pub no_lower: bool,
    #[arg(long)]
    pub no_digits: bool,
    /// Special characters to draw from.
    #[arg(long, conflicts_with = "no_special")]
    pub special: Option<String>,
    #[arg(long)]
    pub no_special: bool,
    /// Explicit character pool; replaces every class.
    #[arg(long)]
    pub chars: Option<String>,
}

#[derive(clap::Args)]
pub struct ConfigOpts {
    #[arg(short, long)]
    pub config: Option<String>,
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    Show,
    Validate,
    /// Write the default configuration file.
    Init,
}

fn parse_key_val(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.trim().is_empty() => Ok((key.trim().to_string(), val.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{value}'")),
    }
}
