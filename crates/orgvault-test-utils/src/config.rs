//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries, and [`TestWorkspace`] when a
//! test needs real files (config, `.env`, PID and log files) on disk.

use std::path::{Path, PathBuf};

use orgvault_config::AppConfig;
use tempfile::TempDir;

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .organization("acme")
///     .github_api_url(&server.url())
///     .local_backup(tmp.path())
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.github.token = "test-token".to_string();
        Self { config }
    }

    pub fn organization(mut self, org: &str) -> Self {
        self.config.github.organization = org.to_string();
        self
    }

    pub fn github_token(mut self, token: &str) -> Self {
        self.config.github.token = token.to_string();
        self
    }

    pub fn github_api_url(mut self, url: &str) -> Self {
        self.config.github.api_url = url.to_string();
        self
    }

    pub fn include_archived(mut self, yes: bool) -> Self {
        self.config.repositories.include_archived = yes;
        self
    }

    pub fn include_forks(mut self, yes: bool) -> Self {
        self.config.repositories.include_forks = yes;
        self
    }

    pub fn exclude_pattern(mut self, pattern: &str) -> Self {
        self.config
            .repositories
            .exclude_patterns
            .push(pattern.to_string());
        self
    }

    pub fn include_pattern(mut self, pattern: &str) -> Self {
        self.config
            .repositories
            .include_patterns
            .push(pattern.to_string());
        self
    }

    /// Enable the local target writing below `path`.
    pub fn local_backup(mut self, path: &Path) -> Self {
        let local = &mut self.config.backup_targets.local_backup;
        local.enabled = true;
        local.path = path.to_path_buf();
        self
    }

    pub fn keep_versions(mut self, n: usize) -> Self {
        self.config.backup_targets.local_backup.keep_versions = n;
        self
    }

    pub fn compress(mut self, yes: bool) -> Self {
        self.config.backup_targets.local_backup.compress = yes;
        self
    }

    /// Enable the IPFS target against `api_url`.
    pub fn ipfs(mut self, api_url: &str) -> Self {
        let ipfs = &mut self.config.backup_targets.ipfs;
        ipfs.enabled = true;
        ipfs.api_url = api_url.to_string();
        self
    }

    /// Enable the Gitea target against `url`.
    pub fn gitea(mut self, url: &str, organization: &str) -> Self {
        let gitea = &mut self.config.backup_targets.gitea;
        gitea.enabled = true;
        gitea.url = url.to_string();
        gitea.token = "gitea-token".to_string();
        gitea.organization = organization.to_string();
        self
    }

    pub fn slack_webhook(mut self, url: &str) -> Self {
        let slack = &mut self.config.notifications.slack;
        slack.enabled = true;
        slack.webhook_url = url.to_string();
        self
    }

    pub fn webhook(mut self, url: &str, secret: Option<&str>) -> Self {
        let webhook = &mut self.config.notifications.webhook;
        webhook.enabled = true;
        webhook.url = url.to_string();
        webhook.secret = secret.map(str::to_string);
        self
    }

    pub fn max_concurrent_backups(mut self, n: usize) -> Self {
        self.config.performance.max_concurrent_backups = n;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn interval_secs(mut self, secs: u64) -> Self {
        self.config.supervisor.interval_secs = secs;
        self
    }

    pub fn backup_command(mut self, argv: &[&str]) -> Self {
        self.config.supervisor.backup_command =
            Some(argv.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn pid_file(mut self, path: &Path) -> Self {
        self.config.supervisor.pid_file = path.to_path_buf();
        self
    }

    pub fn log_file(mut self, path: &Path) -> Self {
        self.config.supervisor.log_file = path.to_path_buf();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A temp directory holding the files a supervisor works with.
///
/// The directory is deleted when this value is dropped, even on panic.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.join("run/orgvault.pid")
    }

    pub fn log_file(&self) -> PathBuf {
        self.join("logs/orgvault.log")
    }

    /// A builder whose PID and log files point into this workspace.
    pub fn config_builder(&self) -> TestConfigBuilder {
        TestConfigBuilder::new()
            .pid_file(&self.pid_file())
            .log_file(&self.log_file())
    }

    /// Write `content` to `rel` inside the workspace and return its path.
    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create parent dir");
        }
        std::fs::write(&path, content).expect("failed to write workspace file");
        path
    }

    /// Write a YAML config file and load it back through [`AppConfig::load`].
    pub async fn load_config(&self, yaml: &str) -> (PathBuf, AppConfig) {
        let path = self.write("config.yaml", yaml);
        let config = AppConfig::load(&path)
            .await
            .expect("failed to parse test config");
        (path, config)
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_fields() {
        let config = TestConfigBuilder::new()
            .organization("acme")
            .exclude_pattern("tmp-.*")
            .max_concurrent_backups(2)
            .build();
        assert_eq!(config.github.organization, "acme");
        assert_eq!(config.repositories.exclude_patterns, vec!["tmp-.*"]);
        assert_eq!(config.performance.max_concurrent_backups, 2);
        config.validate().unwrap();
    }

    #[tokio::test]
    async fn test_workspace_loads_config() {
        let ws = TestWorkspace::new();
        let (path, config) = ws
            .load_config("github:\n  organization: acme\n")
            .await;
        assert!(path.exists());
        assert_eq!(config.github.organization, "acme");
    }
}
