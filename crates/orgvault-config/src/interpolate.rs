//! Resolution of `${VAR}` references in configuration values.
//!
//! Only whole-value references are recognised: `${GITHUB_TOKEN}` resolves,
//! `prefix-${X}` is returned unchanged.

use crate::ConfigError;

/// Resolve a `${VAR}` reference through `lookup`.
///
/// Plain values are returned as-is. A reference to an unset or empty
/// variable is an error.
pub fn resolve_env_ref<F>(value: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(name) = env_ref_name(value) else {
        return Ok(value.to_string());
    };
    match lookup(name) {
        Some(resolved) if !resolved.is_empty() => Ok(resolved),
        _ => Err(ConfigError::MissingEnv(name.to_string())),
    }
}

/// The variable name of a whole-value `${VAR}` reference.
pub fn env_ref_name(value: &str) -> Option<&str> {
    let name = value.trim().strip_prefix("${")?.strip_suffix('}')?;
    (!name.is_empty()).then_some(name)
}
