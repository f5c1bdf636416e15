#![deny(unsafe_code)]

//! Environment and secret values for orgvault.
//!
//! Tokens (`GITHUB_TOKEN`, `SLACK_WEBHOOK_URL`, …) live in a `.env` file next
//! to the configuration. [`Environment`] loads that file into an in-memory
//! overlay which takes precedence over the process environment. The overlay
//! is handed to every spawned backup command and daemon; the global process
//! environment is never modified.
//!
//! ## Security Properties
//!
//! - All secret values implement `Zeroize` and are cleared on drop.
//! - Secret values are redacted in `Debug` output (shown as `[REDACTED]`).
//! - The environment never logs values, only variable names.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;
use zeroize::Zeroize;

use orgvault_config::{ConfigError, resolve_env_ref};

/// A single secret value with automatic zeroization.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue {
    inner: String,
}

impl SecretValue {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: value.into(),
        }
    }

    /// Get the secret value as a string slice.
    ///
    /// Prefer passing the [`SecretValue`] itself around.
    pub fn expose(&self) -> &str {
        &self.inner
    }

    /// Get the secret value length (without exposing the value).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the secret value is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("inner", &"[REDACTED]")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl Drop for SecretValue {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

/// Where a variable of the overlay came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarSource {
    /// Loaded from an env file.
    EnvFile(PathBuf),
    /// Set programmatically.
    Explicit,
}

impl fmt::Display for VarSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarSource::EnvFile(path) => write!(f, "file:{}", path.display()),
            VarSource::Explicit => write!(f, "explicit"),
        }
    }
}

/// Errors from environment loading and resolution.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("failed to read env file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: dotenvy::Error,
    },

    #[error(transparent)]
    Resolve(#[from] ConfigError),
}

/// Variables overlaid on the process environment.
#[derive(Clone, Default)]
pub struct Environment {
    vars: BTreeMap<String, SecretValue>,
    sources: BTreeMap<String, VarSource>,
    isolated: bool,
}

impl Environment {
    /// An empty overlay that falls back to the process environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty overlay that never consults the process environment.
    pub fn isolated() -> Self {
        Self {
            isolated: true,
            ..Self::default()
        }
    }

    /// Load `KEY=value` lines from an env file into the overlay.
    ///
    /// Comment lines and blank lines are skipped. A missing file leaves the
    /// overlay untouched. Returns the number of variables loaded.
    pub fn load_env_file(&mut self, path: &Path) -> Result<usize, EnvError> {
        let iter = match dotenvy::from_path_iter(path) {
            Ok(iter) => iter,
            Err(e) if e.not_found() => {
                debug!(path = %path.display(), "No env file, using process environment only");
                return Ok(0);
            }
            Err(source) => {
                return Err(EnvError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let loaded = self.load_entries(iter, path)?;
        debug!(path = %path.display(), count = loaded, "Env file loaded");
        Ok(loaded)
    }

    /// Load env-file formatted content from `reader`, attributing the
    /// variables to `origin`.
    pub fn load_env_reader<R: std::io::Read>(
        &mut self,
        reader: R,
        origin: &Path,
    ) -> Result<usize, EnvError> {
        self.load_entries(dotenvy::from_read_iter(reader), origin)
    }

    fn load_entries<I>(&mut self, entries: I, origin: &Path) -> Result<usize, EnvError>
    where
        I: Iterator<Item = dotenvy::Result<(String, String)>>,
    {
        let mut loaded = 0;
        for item in entries {
            let (key, value) = item.map_err(|source| EnvError::Read {
                path: origin.to_path_buf(),
                source,
            })?;
            self.sources
                .insert(key.clone(), VarSource::EnvFile(origin.to_path_buf()));
            self.vars.insert(key, SecretValue::new(value));
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Set a variable in the overlay.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.sources.insert(key.clone(), VarSource::Explicit);
        self.vars.insert(key, SecretValue::new(value));
    }

    /// Builder-style [`set`](Self::set).
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Look a variable up: overlay first, then the process environment.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.vars.get(key) {
            return Some(value.expose().to_string());
        }
        if self.isolated {
            return None;
        }
        std::env::var(key).ok()
    }

    /// Whether the overlay itself holds `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Source of an overlay variable.
    pub fn source(&self, key: &str) -> Option<&VarSource> {
        self.sources.get(key)
    }

    /// Names held by the overlay (never the values).
    pub fn names(&self) -> Vec<&str> {
        self.vars.keys().map(|k| k.as_str()).collect()
    }

    /// Number of variables in the overlay.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the overlay is empty.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Resolve a configuration value that may be a `${VAR}` reference.
    pub fn resolve(&self, value: &str) -> Result<SecretValue, EnvError> {
        let resolved = resolve_env_ref(value, |name| self.get(name))?;
        Ok(SecretValue::new(resolved))
    }

    /// Like [`resolve`](Self::resolve), but an empty value stays empty
    /// instead of failing.
    pub fn resolve_optional(&self, value: &str) -> Result<Option<SecretValue>, EnvError> {
        if value.trim().is_empty() {
            return Ok(None);
        }
        self.resolve(value).map(Some)
    }

    /// Export the overlay into a child command's environment.
    pub fn apply_to(&self, command: &mut tokio::process::Command) {
        for (key, value) in &self.vars {
            command.env(key, value.expose());
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("count", &self.vars.len())
            .field("names", &self.names())
            .field("isolated", &self.isolated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_secret_value_redacted_debug() {
        let secret = SecretValue::new("super-secret-api-key");
        let debug = format!("{secret:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret-api-key"));
    }

    #[test]
    fn test_secret_value_expose() {
        let secret = SecretValue::new("my-key-123");
        assert_eq!(secret.expose(), "my-key-123");
        assert_eq!(secret.len(), 10);
        assert!(!secret.is_empty());
    }

    #[test]
    fn test_load_env_file_skips_comments() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(
            &path,
            "# tokens for the backup run\n\
             GITHUB_TOKEN=ghp_abc\n\
             \n\
             # SLACK_WEBHOOK_URL=https://ignored\n\
             GITLAB_TOKEN=\"glpat quoted\"\n\
             EMPTY=\n",
        )
        .unwrap();

        let mut env = Environment::isolated();
        let loaded = env.load_env_file(&path).unwrap();

        assert_eq!(loaded, 3);
        assert_eq!(env.names(), vec!["EMPTY", "GITHUB_TOKEN", "GITLAB_TOKEN"]);
        assert_eq!(env.get("GITHUB_TOKEN").as_deref(), Some("ghp_abc"));
        assert_eq!(env.get("GITLAB_TOKEN").as_deref(), Some("glpat quoted"));
        assert_eq!(env.get("SLACK_WEBHOOK_URL"), None);
        assert_eq!(
            env.source("GITHUB_TOKEN"),
            Some(&VarSource::EnvFile(path.clone()))
        );
    }

    #[test]
    fn test_missing_env_file_is_not_an_error() {
        let mut env = Environment::isolated();
        let loaded = env
            .load_env_file(Path::new("/nonexistent/orgvault/.env"))
            .unwrap();
        assert_eq!(loaded, 0);
        assert!(env.is_empty());
    }

    #[test]
    fn test_malformed_env_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(&path, "GOOD=1\nthis line has no equals sign\n").unwrap();

        let mut env = Environment::isolated();
        assert!(matches!(
            env.load_env_file(&path),
            Err(EnvError::Read { .. })
        ));
    }

    #[test]
    fn test_load_env_reader() {
        let mut env = Environment::isolated();
        let loaded = env
            .load_env_reader("WEBHOOK_SECRET='s3cret'\n".as_bytes(), Path::new("inline"))
            .unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(env.get("WEBHOOK_SECRET").as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_overlay_takes_precedence_over_process() {
        let env = Environment::new().with_var("PATH", "/overlay/bin");
        assert_eq!(env.get("PATH").as_deref(), Some("/overlay/bin"));
    }

    #[test]
    fn test_falls_back_to_process_environment() {
        let env = Environment::new();
        assert_eq!(env.get("PATH"), std::env::var("PATH").ok());

        let isolated = Environment::isolated();
        assert_eq!(isolated.get("PATH"), None);
    }

    #[test]
    fn test_resolve_reference() {
        let env = Environment::isolated().with_var("GITHUB_TOKEN", "ghp_xyz");
        assert_eq!(env.resolve("${GITHUB_TOKEN}").unwrap().expose(), "ghp_xyz");
        assert_eq!(env.resolve("literal").unwrap().expose(), "literal");
        assert!(matches!(
            env.resolve("${MISSING}"),
            Err(EnvError::Resolve(ConfigError::MissingEnv(_)))
        ));
        assert!(env.resolve_optional("  ").unwrap().is_none());
    }

    #[test]
    fn test_environment_debug_redacted() {
        let env = Environment::isolated().with_var("API_KEY", "super-secret");
        let debug = format!("{env:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("API_KEY"));
    }

    #[tokio::test]
    async fn test_apply_to_child_process() {
        let env = Environment::isolated().with_var("ORGVAULT_TEST_VAR", "from-overlay");
        let mut cmd = tokio::process::Command::new("sh");
        cmd.args(["-c", "printf %s \"$ORGVAULT_TEST_VAR\""]);
        env.apply_to(&mut cmd);

        let output = cmd.output().await.unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), "from-overlay");
    }

    #[test]
    fn test_var_source_display() {
        assert_eq!(VarSource::Explicit.to_string(), "explicit");
        assert_eq!(
            VarSource::EnvFile(PathBuf::from("/srv/.env")).to_string(),
            "file:/srv/.env"
        );
    }
}
