//! `secret <uri> [flags]` expressions found inside `$( ... )`.
//!
//! [`parse_args`] splits the raw text into an argument vector and
//! [`SecretExpression::parse`] turns that vector into a request a vault
//! backend can act on.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;
use url::Url;

use super::generator::SecretPolicy;

/// Keyword that introduces a secret expression when none is configured.
pub const DEFAULT_SECRETS_EXPRESSION: &str = "secret";

/// Special characters used when `--special` is not given.
pub const DEFAULT_SPECIAL: &str = "@#~`_-[]|:^";

pub const DEFAULT_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretExpressionError {
    #[error("Expression cannot be empty.")]
    Empty,
    #[error("Default URI is not set.")]
    DefaultUriNotSet,
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid size parameter. Expected an integer value.")]
    InvalidSize,
    #[error("Invalid name parameter. Expected a string value.")]
    InvalidName,
    #[error("Invalid chars parameter. Expected a string value.")]
    InvalidChars,
    #[error("Invalid special parameter. Expected a string value.")]
    InvalidSpecial,
    #[error("Invalid expires-at parameter. Expected a valid date-time value.")]
    InvalidExpiresAt,
}

// ============================================================================
// Argument splitting
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Split `text` into arguments.
///
/// Whitespace separates arguments. A quote at the start of an argument runs
/// to the matching quote and the quote characters are dropped. A `\` or
/// `` ` `` directly before a line break joins lines without producing an
/// argument.
pub fn parse_args(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut token = String::new();
    let mut quote = Quote::None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if quote != Quote::None {
            let closing = if quote == Quote::Single { '\'' } else { '"' };
            if c == closing {
                quote = Quote::None;
                if !token.is_empty() {
                    tokens.push(std::mem::take(&mut token));
                }
            } else {
                token.push(c);
            }
            i += 1;
            continue;
        }

        if token.is_empty() && (c == '\\' || c == '`') {
            match (chars.get(i + 1), chars.get(i + 2)) {
                (Some('\n'), _) => {
                    i += 2;
                    continue;
                }
                (Some('\r'), Some('\n')) => {
                    i += 3;
                    continue;
                }
                _ => {}
            }
        }

        if c.is_whitespace() {
            if !token.is_empty() {
                tokens.push(std::mem::take(&mut token));
            }
        } else if token.is_empty() && c == '\'' {
            quote = Quote::Single;
        } else if token.is_empty() && c == '"' {
            quote = Quote::Double;
        } else {
            token.push(c);
        }
        i += 1;
    }

    if !token.is_empty() {
        tokens.push(token);
    }
    tokens
}

// ============================================================================
// Expression
// ============================================================================

/// A parsed secret request.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretExpression {
    pub uri: Url,
    pub name: Option<String>,
    pub create: bool,
    pub size: usize,
    pub upper: bool,
    pub lower: bool,
    pub digits: bool,
    /// Special characters; empty disables the class.
    pub special: String,
    /// Explicit pool that replaces every class.
    pub chars: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Arguments after the URI, flags included.
    pub tokens: Vec<String>,
}

impl SecretExpression {
    /// Parse an argument vector such as `["secret", "akv://vault/name", "--create"]`.
    ///
    /// A leading `keyword` (or `secret`) is dropped. The URI may be
    /// `default`, resolved through `default_uri`, and may contain `$CWD` or
    /// `$PWD` which expand to `working_dir` (the process working directory
    /// when `None`). Unknown flags are kept in `tokens` for the backend.
    pub fn parse(
        args: &[String],
        keyword: &str,
        working_dir: Option<&Path>,
        default_uri: Option<&str>,
    ) -> Result<Self, SecretExpressionError> {
        let mut parts = args;
        if let Some(first) = parts.first() {
            if first.eq_ignore_ascii_case(keyword)
                || first.eq_ignore_ascii_case(DEFAULT_SECRETS_EXPRESSION)
            {
                parts = &parts[1..];
            }
        }

        let original = match parts.first() {
            Some(first) if !first.trim().is_empty() => first.as_str(),
            _ => return Err(SecretExpressionError::Empty),
        };

        let mut location = original.to_string();
        if location.eq_ignore_ascii_case("default") {
            location = default_uri
                .ok_or(SecretExpressionError::DefaultUriNotSet)?
                .to_string();
        }

        if location.contains("$CWD") || location.contains("$PWD") {
            let cwd = match working_dir {
                Some(dir) => dir.to_path_buf(),
                None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            };
            let cwd = cwd.to_string_lossy().replace('\\', "/");
            let cwd = cwd.trim_end_matches('/');
            location = substitute_dir(&location, "$CWD", cwd);
            location = substitute_dir(&location, "$PWD", cwd);
        }

        let uri = Url::parse(&location)
            .map_err(|_| SecretExpressionError::InvalidUrl(original.to_string()))?;

        let rest = &parts[1..];
        let mut expr = SecretExpression {
            uri,
            name: None,
            create: false,
            size: DEFAULT_SIZE,
            upper: true,
            lower: true,
            digits: true,
            special: DEFAULT_SPECIAL.to_string(),
            chars: None,
            expires_at: None,
            tokens: rest.to_vec(),
        };

        let mut i = 0;
        while i < rest.len() {
            let part = rest[i].as_str();
            let next = rest.get(i + 1).map(String::as_str);
            // Optional flag arguments: a following token that is not a flag.
            let operand = next.filter(|v| !v.is_empty() && !v.starts_with('-'));

            match part {
                "-n" | "--name" => {
                    let value = next.ok_or(SecretExpressionError::InvalidName)?;
                    expr.name = Some(value.to_string());
                    i += 1;
                }
                "--size" => {
                    let size = next
                        .and_then(|v| v.parse::<i64>().ok())
                        .ok_or(SecretExpressionError::InvalidSize)?;
                    expr.size = usize::try_from(size).unwrap_or(0);
                    i += 1;
                }
                "--no-upper" => expr.upper = false,
                "--no-lower" => expr.lower = false,
                "--no-digits" => expr.digits = false,
                "--no-special" => expr.special.clear(),
                "--upper" | "--lower" | "--digits" | "--create" => {
                    let value = match operand {
                        Some(v) => {
                            i += 1;
                            v.eq_ignore_ascii_case("true")
                        }
                        None => true,
                    };
                    match part {
                        "--upper" => expr.upper = value,
                        "--lower" => expr.lower = value,
                        "--digits" => expr.digits = value,
                        _ => expr.create = value,
                    }
                }
                "--chars" => {
                    let value = next.ok_or(SecretExpressionError::InvalidChars)?;
                    expr.chars = Some(value.to_string());
                    i += 1;
                }
                "--special" => {
                    if let Some(v) = operand {
                        expr.special = if v.eq_ignore_ascii_case("false") {
                            String::new()
                        } else if v.eq_ignore_ascii_case("true") {
                            DEFAULT_SPECIAL.to_string()
                        } else {
                            v.to_string()
                        };
                        i += 1;
                    }
                }
                "--expires-at" => {
                    let at = next
                        .and_then(parse_expires_at)
                        .ok_or(SecretExpressionError::InvalidExpiresAt)?;
                    expr.expires_at = Some(at);
                    i += 1;
                }
                short if short.len() > 1 && short.starts_with('-') && !short.starts_with("--") => {
                    for flag in short.chars().skip(1) {
                        match flag {
                            'u' => expr.upper = true,
                            'l' => expr.lower = true,
                            'd' => expr.digits = true,
                            'C' => expr.create = true,
                            's' => {
                                i += 1;
                                let value =
                                    rest.get(i).ok_or(SecretExpressionError::InvalidSpecial)?;
                                expr.special = value.clone();
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
            i += 1;
        }

        Ok(expr)
    }

    /// Value following `flag` among the leftover tokens.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        let index = self.tokens.iter().position(|t| t == flag)?;
        self.tokens.get(index + 1).map(String::as_str)
    }

    /// Character policy described by the generation flags.
    pub fn policy(&self) -> SecretPolicy {
        SecretPolicy {
            size: self.size,
            upper: self.upper,
            lower: self.lower,
            digits: self.digits,
            special: self.special.clone(),
            chars: self.chars.clone(),
        }
    }

    /// Generate a secret according to the class flags.
    pub fn generate(&self) -> String {
        self.policy().generate()
    }
}

fn substitute_dir(text: &str, placeholder: &str, dir: &str) -> String {
    let mut out = String::with_capacity(text.len() + dir.len());
    let mut rest = text;
    while let Some(index) = rest.find(placeholder) {
        out.push_str(&rest[..index]);
        if out.ends_with('/') {
            out.push_str(dir.trim_start_matches('/'));
        } else {
            out.push_str(dir);
        }
        rest = &rest[index + placeholder.len()..];
    }
    out.push_str(rest);
    out
}

/// RFC 3339, `YYYY-MM-DDTHH:MM:SS` or `YYYY-MM-DD`; zone-less values are UTC.
fn parse_expires_at(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}
