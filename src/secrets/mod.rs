//! Secret expressions, the vault contract and the CLI-backed vaults.

pub mod az_keyvault;
pub mod expression;
pub mod generator;
pub mod sops_env;
pub mod vault;

pub use az_keyvault::AzKeyVaultExpander;
pub use expression::{
    parse_args, SecretExpression, SecretExpressionError, DEFAULT_SECRETS_EXPRESSION, DEFAULT_SIZE,
    DEFAULT_SPECIAL,
};
pub use generator::{SecretGenerator, SecretPolicy};
pub use sops_env::SopsEnvExpander;
pub use vault::{redact_secret, VaultExpander};
