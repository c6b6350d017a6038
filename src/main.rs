use anyhow::Context;
use clap::Parser;
use dotvault::cli::{Cli, Commands, ConfigAction, ExpandOpts, GenerateOpts};
use dotvault::config::{validate_config, validate_config_object, Config, DEFAULT_ENV_FILE};
use dotvault::dotenv::{Document, ReaderOptions};
use dotvault::infra::abort_signal::{abort_on_ctrl_c, AbortHandle};
use dotvault::logging;
use dotvault::secrets::{parse_args, SecretPolicy, DEFAULT_SPECIAL};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = match &cli.command {
        Commands::Expand(opts) => opts.config.clone(),
        Commands::Check(opts) => opts.config.clone(),
        Commands::Config(opts) => opts.config.clone(),
        _ => None,
    };
    let config = Config::load(config_path.as_deref())?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.as_filter().to_string());
    logging::init(&level, cli.log_json || config.logging.json);

    match cli.command {
        Commands::Expand(opts) => return expand(config, opts).await,
        Commands::Check(opts) => {
            for file in env_files(&opts.files) {
                let document = read_document(&file, config.reader)?;
                println!(
                    "{}: {} entries",
                    file.display(),
                    document.entries().count()
                );
            }
        }
        Commands::Args(opts) => {
            println!("{}", serde_json::to_string(&parse_args(&opts.text))?);
        }
        Commands::Generate(opts) => {
            println!("{}", generate(&opts));
        }
        Commands::Config(opts) => match opts.action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Validate => {
                for problem in validate_config(&config) {
                    error!("{problem}");
                }
                validate_config_object(&config)?;
                info!("Configuration is valid");
            }
            ConfigAction::Init => {
                let path = opts.config.as_deref().unwrap_or("dotvault.json");
                Config::write_default(path)?;
                info!("Configuration file created at {path}");
            }
        },
        Commands::Version => {
            println!("dotvault {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn expand(mut config: Config, opts: ExpandOpts) -> anyhow::Result<ExitCode> {
    let expansion = &mut config.expansion;
    expansion.enable_command_substitution |= opts.commands;
    expansion.enable_secret_substitution |= opts.secrets;
    expansion.enable_shell_execution |= opts.shell;
    expansion.enable_windows_variables |= opts.windows_vars;
    expansion.enable_unix_args |= opts.unix_args;
    if let Some(shell) = opts.shell_name {
        expansion.use_shell = shell;
    }
    if let Some(timeout) = opts.timeout {
        expansion.command_timeout_secs = timeout;
    }
    expansion.variables.extend(opts.vars);
    config.reader.allow_json |= opts.json_values;
    config.reader.allow_yaml |= opts.yaml_values;

    let mut document = Document::new();
    for file in env_files(&opts.files) {
        document.append(read_document(&file, config.reader)?);
    }

    let expander = config.expander(opts.args);
    let abort = AbortHandle::new();
    let watcher = abort_on_ctrl_c(abort.clone());
    let summary = expander.expand_async(document, &abort).await;
    watcher.abort();

    for failure in &summary.errors {
        error!("{failure}");
    }

    print!("{}", dotvault::cli::render(&summary.document, opts.format)?);

    if summary.is_error() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn env_files(files: &[PathBuf]) -> Vec<PathBuf> {
    if files.is_empty() {
        vec![PathBuf::from(DEFAULT_ENV_FILE)]
    } else {
        files.to_vec()
    }
}

fn read_document(path: &Path, options: ReaderOptions) -> anyhow::Result<Document> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Document::parse_with(&text, options).with_context(|| format!("Failed to parse {}", path.display()))
}

fn generate(opts: &GenerateOpts) -> String {
    let special = if opts.no_special {
        String::new()
    } else {
        opts.special.clone().unwrap_or_else(|| DEFAULT_SPECIAL.to_string())
    };
    SecretPolicy {
        size: opts.size,
        upper: !opts.no_upper,
        lower: !opts.no_lower,
        digits: !opts.no_digits,
        special,
        chars: opts.chars.clone(),
    }
    .generate()
}
