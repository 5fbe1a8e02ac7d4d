//! Login credentials supplied on the command line.
//!
//! Each `--credential` argument has the form `SELECTOR=VALUE`. The first `=`
//! outside square brackets separates the two, so attribute selectors such as
//! `input[name=email]=me@example.com` work. A value of the form `env:NAME` is
//! read from the environment variable `NAME` so that passwords need not
//! appear in the process list.

use secrecy::SecretString;
use std::fmt;

const ENV_PREFIX: &str = "env:";

/// Errors raised while resolving credential arguments
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Credential '{0}' must have the form SELECTOR=VALUE")]
    Malformed(String),

    #[error("Credential for '{selector}' references unset environment variable {variable}")]
    MissingVariable { selector: String, variable: String },
}

/// A credential argument before its value is resolved.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialArg {
    pub selector: String,
    value: ValueSource,
}

#[derive(Clone, PartialEq, Eq)]
enum ValueSource {
    Literal(String),
    Env(String),
}

impl fmt::Debug for CredentialArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match &self.value {
            ValueSource::Literal(_) => "[REDACTED]".to_string(),
            ValueSource::Env(name) => format!("{ENV_PREFIX}{name}"),
        };
        f.debug_struct("CredentialArg")
            .field("selector", &self.selector)
            .field("value", &value)
            .finish()
    }
}

impl CredentialArg {
    /// Resolve the value using `lookup` for `env:` references.
    pub fn resolve<F>(&self, lookup: F) -> Result<SecretString, CredentialError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match &self.value {
            ValueSource::Literal(value) => Ok(SecretString::from(value.clone())),
            ValueSource::Env(name) => {
                lookup(name)
                    .map(SecretString::from)
                    .ok_or_else(|| CredentialError::MissingVariable {
                        selector: self.selector.clone(),
                        variable: name.clone(),
                    })
            }
        }
    }

    /// Resolve against the process environment.
    pub fn resolve_from_env(&self) -> Result<SecretString, CredentialError> {
        self.resolve(|name| std::env::var(name).ok())
    }
}

/// Parse one `SELECTOR=VALUE` argument. Used as a clap value parser.
pub fn parse_credential_arg(raw: &str) -> Result<CredentialArg, CredentialError> {
    let mut depth = 0usize;
    let split = raw.char_indices().find(|(_, c)| match c {
        '[' => {
            depth += 1;
            false
        }
        ']' => {
            depth = depth.saturating_sub(1);
            false
        }
        '=' => depth == 0,
        _ => false,
    });

    let Some((index, _)) = split else {
        return Err(CredentialError::Malformed(redact(raw)));
    };
    let selector = raw[..index].trim();
    let value = &raw[index + 1..];
    if selector.is_empty() {
        return Err(CredentialError::Malformed(redact(raw)));
    }

    let value = match value.strip_prefix(ENV_PREFIX) {
        Some(name) if !name.is_empty() => ValueSource::Env(name.to_string()),
        _ => ValueSource::Literal(value.to_string()),
    };

    Ok(CredentialArg {
        selector: selector.to_string(),
        value,
    })
}

/// Keep only the selector part of a bad argument for error messages.
fn redact(raw: &str) -> String {
    match raw.find('=') {
        Some(index) => format!("{}=…", &raw[..index]),
        None => raw.to_string(),
    }
}
