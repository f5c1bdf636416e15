#![deny(unsafe_code)]

//! Configuration loading and validation for orgvault.
//!
//! Loads YAML configuration files and validates them against expected schemas.
//! Provides the [`AppConfig`] type as the central configuration structure,
//! the [`targets`] module for per-host backup target sections, and
//! [`resolve_env_ref`] for `${VAR}` references to secrets held in the
//! environment.

/// `${VAR}` environment references in configuration values.
pub mod interpolate;
/// Backup target sections (`backup_targets.*`).
pub mod targets;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use interpolate::resolve_env_ref;
pub use targets::BackupTargetsConfig;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("environment variable {0} is not set")]
    MissingEnv(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Source organization on GitHub.
    #[serde(default)]
    pub github: GitHubConfig,

    /// Repository selection filters.
    #[serde(default)]
    pub repositories: RepositoryFilterConfig,

    /// Destinations that receive the backups.
    #[serde(default)]
    pub backup_targets: BackupTargetsConfig,

    /// Run-summary and error notifications.
    #[serde(default)]
    pub notifications: NotificationsConfig,

    /// Concurrency limits for a backup run.
    #[serde(default)]
    pub performance: PerformanceConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Backup-cycle supervisor configuration.
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// GitHub organization and API access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// Organization login (e.g. `my-org`).
    #[serde(default)]
    pub organization: String,

    /// API token, usually a `${GITHUB_TOKEN}` reference.
    #[serde(default)]
    pub token: String,

    /// REST API base URL. Override for GitHub Enterprise.
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            organization: String::new(),
            token: String::new(),
            api_url: default_github_api_url(),
        }
    }
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

/// Which repositories of the organization are backed up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryFilterConfig {
    #[serde(default = "default_true")]
    pub include_private: bool,

    #[serde(default)]
    pub include_archived: bool,

    #[serde(default)]
    pub include_forks: bool,

    /// Regular expressions matched at the start of the repository name.
    /// A match excludes the repository.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Regular expressions matched at the start of the repository name.
    /// When non-empty, only matching repositories are kept.
    #[serde(default)]
    pub include_patterns: Vec<String>,
}

impl Default for RepositoryFilterConfig {
    fn default() -> Self {
        Self {
            include_private: true,
            include_archived: false,
            include_forks: false,
            exclude_patterns: Vec::new(),
            include_patterns: Vec::new(),
        }
    }
}

impl RepositoryFilterConfig {
    /// The form a pattern is compiled in: anchored at the start of the name.
    pub fn anchored(pattern: &str) -> String {
        format!("^(?:{pattern})")
    }
}

pub(crate) fn default_true() -> bool {
    true
}

/// Notification channels.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub slack: SlackConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,
}

/// Slack incoming-webhook channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Incoming webhook URL, usually `${SLACK_WEBHOOK_URL}`.
    #[serde(default)]
    pub webhook_url: String,

    #[serde(default = "default_slack_channel")]
    pub channel: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: String::new(),
            channel: default_slack_channel(),
        }
    }
}

fn default_slack_channel() -> String {
    "#backup-alerts".to_string()
}

/// Generic JSON webhook channel.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub url: String,

    /// Optional HMAC-SHA256 signing secret.
    #[serde(default)]
    pub secret: Option<String>,
}

/// Concurrency limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Maximum number of repository/target backups in flight.
    #[serde(default = "default_max_concurrent_backups")]
    pub max_concurrent_backups: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_backups: default_max_concurrent_backups(),
        }
    }
}

fn default_max_concurrent_backups() -> usize {
    5
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration of the backup-cycle supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Fixed delay between the end of one cycle and the start of the next.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Singleton lock holding the supervisor's PID.
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Append-only log of the supervisor.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// External command run as the backup cycle. When absent the built-in
    /// orchestrator runs in-process.
    #[serde(default)]
    pub backup_command: Option<Vec<String>>,

    /// Upper bound on waiting for a dependent daemon to become reachable.
    #[serde(default = "default_readiness_timeout_secs")]
    pub readiness_timeout_secs: u64,

    /// Delay between readiness probes.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// How long `stop` waits for the supervisor to exit after SIGTERM.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// Extra daemons to keep reachable, in addition to those implied by the
    /// enabled targets.
    #[serde(default)]
    pub daemons: Vec<DaemonConfig>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            pid_file: default_pid_file(),
            log_file: default_log_file(),
            backup_command: None,
            readiness_timeout_secs: default_readiness_timeout_secs(),
            probe_interval_ms: default_probe_interval_ms(),
            stop_timeout_secs: default_stop_timeout_secs(),
            daemons: Vec::new(),
        }
    }
}

fn default_interval_secs() -> u64 {
    21600 // 6 hours
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("orgvault.pid")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("logs/orgvault.log")
}

fn default_readiness_timeout_secs() -> u64 {
    30
}

fn default_probe_interval_ms() -> u64 {
    500
}

fn default_stop_timeout_secs() -> u64 {
    10
}

/// A daemon the supervisor starts when its probe fails.
///
/// ## YAML Example
///
/// ```yaml
/// supervisor:
///   daemons:
///     - name: ipfs
///       probe_url: http://127.0.0.1:5001/api/v0/version
///       probe_method: POST
///       start_command: [ipfs, daemon]
///     - name: radicle
///       probe_command: [rad, node, status]
///       start_command: [rad, node, start]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub name: String,

    /// HTTP endpoint that answers with a success status once the daemon is up.
    #[serde(default)]
    pub probe_url: Option<String>,

    #[serde(default = "default_probe_method")]
    pub probe_method: String,

    /// Command that exits 0 once the daemon is up.
    #[serde(default)]
    pub probe_command: Option<Vec<String>>,

    pub start_command: Vec<String>,
}

fn default_probe_method() -> String {
    "GET".to_string()
}

impl AppConfig {
    /// Load configuration from a YAML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// An empty document yields the defaults.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = if s.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(s)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges, enumerations and pattern syntax.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.github.api_url.is_empty() {
            return Err(ConfigError::Validation(
                "github.api_url must not be empty".to_string(),
            ));
        }
        let patterns = self
            .repositories
            .exclude_patterns
            .iter()
            .map(|p| ("exclude_patterns", p))
            .chain(
                self.repositories
                    .include_patterns
                    .iter()
                    .map(|p| ("include_patterns", p)),
            );
        for (field, pattern) in patterns {
            if let Err(e) = regex::Regex::new(&RepositoryFilterConfig::anchored(pattern)) {
                return Err(ConfigError::Validation(format!(
                    "repositories.{field} contains invalid pattern {pattern:?}: {e}"
                )));
            }
        }

        if self.performance.max_concurrent_backups == 0 {
            return Err(ConfigError::Validation(
                "performance.max_concurrent_backups must be at least 1".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        self.validate_supervisor()?;
        self.backup_targets.validate()?;
        Ok(())
    }

    fn validate_supervisor(&self) -> Result<(), ConfigError> {
        let sup = &self.supervisor;
        if sup.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "supervisor.interval_secs must be non-zero".to_string(),
            ));
        }
        if sup.probe_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "supervisor.probe_interval_ms must be non-zero".to_string(),
            ));
        }
        if sup.pid_file.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "supervisor.pid_file must not be empty".to_string(),
            ));
        }
        if sup.log_file.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "supervisor.log_file must not be empty".to_string(),
            ));
        }
        if let Some(cmd) = &sup.backup_command
            && cmd.is_empty()
        {
            return Err(ConfigError::Validation(
                "supervisor.backup_command must not be an empty list".to_string(),
            ));
        }

        for (i, daemon) in sup.daemons.iter().enumerate() {
            if daemon.name.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "supervisor.daemons[{i}].name must not be empty"
                )));
            }
            if daemon.start_command.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "supervisor.daemons[{i}].start_command must not be empty"
                )));
            }
            match (&daemon.probe_url, &daemon.probe_command) {
                (Some(_), None) => {
                    let valid_methods = ["GET", "POST", "HEAD"];
                    if !valid_methods.contains(&daemon.probe_method.as_str()) {
                        return Err(ConfigError::Validation(format!(
                            "supervisor.daemons[{i}].probe_method must be one of {:?}, got {:?}",
                            valid_methods, daemon.probe_method
                        )));
                    }
                }
                (None, Some(cmd)) if !cmd.is_empty() => {}
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "supervisor.daemons[{i}] needs exactly one of probe_url or probe_command"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validate the requirements of a backup run: source organization,
    /// token, and at least one fully configured enabled target.
    pub fn validate_for_backup(&self) -> Result<(), ConfigError> {
        if self.github.organization.is_empty() {
            return Err(ConfigError::Validation(
                "github.organization is required".to_string(),
            ));
        }
        if self.github.token.is_empty() {
            return Err(ConfigError::Validation(
                "github.token is required".to_string(),
            ));
        }
        if self.backup_targets.enabled_names().is_empty() {
            return Err(ConfigError::Validation(
                "at least one backup target must be enabled".to_string(),
            ));
        }
        self.backup_targets.validate_enabled()
    }

    /// Whether the in-process orchestrator is the backup cycle.
    pub fn uses_builtin_orchestrator(&self) -> bool {
        self.supervisor.backup_command.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.supervisor.interval_secs, 21600);
        assert_eq!(config.performance.max_concurrent_backups, 5);
        assert!(config.repositories.include_private);
        assert!(!config.repositories.include_forks);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_empty_yaml() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.supervisor.pid_file, PathBuf::from("orgvault.pid"));
        assert!(config.uses_builtin_orchestrator());
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
github:
  organization: acme
  token: ${GITHUB_TOKEN}
  api_url: https://github.example.com/api/v3
repositories:
  include_archived: true
  exclude_patterns: ["^tmp-", "sandbox"]
backup_targets:
  local_backup:
    enabled: true
    path: /var/backups/acme
    keep_versions: 3
  ipfs:
    enabled: true
    api_url: http://127.0.0.1:5001
notifications:
  slack:
    enabled: true
    webhook_url: ${SLACK_WEBHOOK_URL}
performance:
  max_concurrent_backups: 2
logging:
  level: debug
supervisor:
  interval_secs: 3600
  backup_command: [python3, backup_organization.py]
"#;
        let config = AppConfig::parse(yaml).unwrap();
        assert_eq!(config.github.organization, "acme");
        assert_eq!(config.github.token, "${GITHUB_TOKEN}");
        assert!(config.repositories.include_archived);
        assert_eq!(config.repositories.exclude_patterns.len(), 2);
        assert_eq!(config.backup_targets.local_backup.keep_versions, 3);
        assert!(config.backup_targets.ipfs.enabled);
        assert!(config.notifications.slack.enabled);
        assert_eq!(config.notifications.slack.channel, "#backup-alerts");
        assert_eq!(config.performance.max_concurrent_backups, 2);
        assert_eq!(config.supervisor.interval_secs, 3600);
        assert_eq!(
            config.supervisor.backup_command,
            Some(vec![
                "python3".to_string(),
                "backup_organization.py".to_string()
            ])
        );
        assert!(!config.uses_builtin_orchestrator());
        config.validate_for_backup().unwrap();
    }

    #[test]
    fn test_validation_rejects_bad_pattern() {
        let yaml = r#"
repositories:
  include_patterns: ["(unclosed"]
"#;
        let err = AppConfig::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("include_patterns"));
    }

    #[test]
    fn test_validation_compiles_anchored_pattern() {
        // A trailing verbose-mode comment swallows the anchoring group.
        let yaml = r#"
repositories:
  exclude_patterns: ["(?x)foo #c"]
"#;
        let err = AppConfig::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("exclude_patterns"));
        assert_eq!(RepositoryFilterConfig::anchored("api-"), "^(?:api-)");
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let yaml = "performance:\n  max_concurrent_backups: 0\n";
        assert!(AppConfig::parse(yaml).is_err());
    }

    #[test]
    fn test_validation_rejects_zero_interval() {
        let yaml = "supervisor:\n  interval_secs: 0\n";
        assert!(AppConfig::parse(yaml).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_log_level() {
        let yaml = "logging:\n  level: loud\n";
        assert!(AppConfig::parse(yaml).is_err());
    }

    #[test]
    fn test_validation_rejects_empty_backup_command() {
        let yaml = "supervisor:\n  backup_command: []\n";
        assert!(AppConfig::parse(yaml).is_err());
    }

    #[test]
    fn test_daemon_config_from_yaml() {
        let yaml = r#"
supervisor:
  daemons:
    - name: ipfs
      probe_url: http://127.0.0.1:5001/api/v0/version
      probe_method: POST
      start_command: [ipfs, daemon]
    - name: radicle
      probe_command: [rad, node, status]
      start_command: [rad, node, start]
"#;
        let config = AppConfig::parse(yaml).unwrap();
        assert_eq!(config.supervisor.daemons.len(), 2);
        assert_eq!(config.supervisor.daemons[0].probe_method, "POST");
        assert_eq!(config.supervisor.daemons[1].probe_method, "GET");
    }

    #[test]
    fn test_daemon_requires_exactly_one_probe() {
        let both = r#"
supervisor:
  daemons:
    - name: x
      probe_url: http://localhost:1
      probe_command: ["true"]
      start_command: ["true"]
"#;
        assert!(AppConfig::parse(both).is_err());

        let neither = r#"
supervisor:
  daemons:
    - name: x
      start_command: ["true"]
"#;
        assert!(AppConfig::parse(neither).is_err());
    }

    #[test]
    fn test_daemon_rejects_bad_method() {
        let yaml = r#"
supervisor:
  daemons:
    - name: x
      probe_url: http://localhost:1
      probe_method: DELETE
      start_command: ["true"]
"#;
        assert!(AppConfig::parse(yaml).is_err());
    }

    #[test]
    fn test_backup_validation_requires_organization() {
        let config = AppConfig::default();
        let err = config.validate_for_backup().unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation error: github.organization is required"
        );
    }

    #[test]
    fn test_backup_validation_requires_enabled_target() {
        let yaml = r#"
github:
  organization: acme
  token: abc
"#;
        let config = AppConfig::parse(yaml).unwrap();
        let err = config.validate_for_backup().unwrap_err();
        assert!(err.to_string().contains("at least one backup target"));
    }

    // ── Async file-based loading ──────────────────────────────────────

    #[tokio::test]
    async fn test_load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        tokio::fs::write(&path, b"github:\n  organization: acme\n")
            .await
            .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.github.organization, "acme");
    }

    #[tokio::test]
    async fn test_load_nonexistent_file() {
        let result = AppConfig::load(Path::new("/nonexistent/config.yaml")).await;
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[tokio::test]
    async fn test_load_invalid_yaml_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.yaml");
        tokio::fs::write(&path, b"github: [unclosed").await.unwrap();

        let result = AppConfig::load(&path).await;
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("bad value".to_string());
        assert_eq!(err.to_string(), "validation error: bad value");
        let err = ConfigError::MissingEnv("GITHUB_TOKEN".to_string());
        assert_eq!(
            err.to_string(),
            "environment variable GITHUB_TOKEN is not set"
        );
    }
}
