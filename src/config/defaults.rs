/// Default configuration constants used across the system.

/// Shell used for `$( ... )` when shell execution is enabled.
pub const DEFAULT_SHELL: &str = "bash";

/// Azure CLI executable.
pub const DEFAULT_AZ_PATH: &str = "az";

/// sops executable.
pub const DEFAULT_SOPS_PATH: &str = "sops";

/// Config file names searched in the working directory, in order.
pub const CONFIG_FILE_NAMES: [&str; 4] = [
    "dotvault.json",
    "dotvault.yaml",
    "dotvault.yml",
    "dotvault.toml",
];

/// Directory under the home directory holding `config.json`.
pub const HOME_CONFIG_DIR: &str = ".dotvault";

/// Dotenv file read when no file is given on the command line.
pub const DEFAULT_ENV_FILE: &str = ".env";
