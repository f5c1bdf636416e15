//! Backup target sections.
//!
//! Each target is optional and disabled unless `enabled: true`. Credentials
//! are usually `${VAR}` references resolved at runtime.
//!
//! ## YAML Example
//!
//! ```yaml
//! backup_targets:
//!   gitea:
//!     enabled: true
//!     url: https://git.example.com
//!     token: ${GITEA_TOKEN}
//!     organization: acme-mirror
//!   local_backup:
//!     enabled: true
//!     path: /srv/backups
//!     keep_versions: 5
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, default_true};

/// All supported backup targets.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BackupTargetsConfig {
    #[serde(default)]
    pub gitlab: GitLabTargetConfig,

    #[serde(default)]
    pub gitea: GiteaTargetConfig,

    #[serde(default)]
    pub bitbucket: BitbucketTargetConfig,

    #[serde(default)]
    pub local_backup: LocalTargetConfig,

    #[serde(default)]
    pub radicle: RadicleTargetConfig,

    #[serde(default)]
    pub ipfs: IpfsTargetConfig,

    #[serde(default)]
    pub dat: DatTargetConfig,
}

/// GitLab project mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabTargetConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_gitlab_url")]
    pub url: String,

    #[serde(default)]
    pub token: String,

    /// Numeric id or full path of the destination group.
    #[serde(default)]
    pub group_id: String,

    /// Create pull mirrors instead of pushing clones.
    #[serde(default = "default_true")]
    pub create_mirrors: bool,

    #[serde(default = "default_sync_interval_hours")]
    pub sync_interval_hours: u64,
}

impl Default for GitLabTargetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_gitlab_url(),
            token: String::new(),
            group_id: String::new(),
            create_mirrors: true,
            sync_interval_hours: default_sync_interval_hours(),
        }
    }
}

fn default_gitlab_url() -> String {
    "https://gitlab.com".to_string()
}

/// Gitea organization mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiteaTargetConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub token: String,

    #[serde(default)]
    pub organization: String,

    #[serde(default = "default_true")]
    pub create_mirrors: bool,

    /// Pull interval of created mirrors, in Gitea duration syntax.
    #[serde(default = "default_gitea_mirror_interval")]
    pub mirror_interval: String,

    #[serde(default = "default_sync_interval_hours")]
    pub sync_interval_hours: u64,
}

impl Default for GiteaTargetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            token: String::new(),
            organization: String::new(),
            create_mirrors: true,
            mirror_interval: default_gitea_mirror_interval(),
            sync_interval_hours: default_sync_interval_hours(),
        }
    }
}

fn default_gitea_mirror_interval() -> String {
    "8h".to_string()
}

/// Bitbucket workspace copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitbucketTargetConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_bitbucket_url")]
    pub url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub app_password: String,

    #[serde(default)]
    pub workspace: String,

    #[serde(default = "default_sync_interval_hours")]
    pub sync_interval_hours: u64,
}

impl Default for BitbucketTargetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_bitbucket_url(),
            username: String::new(),
            app_password: String::new(),
            workspace: String::new(),
            sync_interval_hours: default_sync_interval_hours(),
        }
    }
}

fn default_bitbucket_url() -> String {
    "https://api.bitbucket.org".to_string()
}

/// Timestamped mirror clones on the local filesystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalTargetConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_local_path")]
    pub path: PathBuf,

    /// Number of backups retained per repository.
    #[serde(default = "default_keep_versions")]
    pub keep_versions: usize,

    /// Store `.tar.gz` archives instead of mirror directories.
    #[serde(default = "default_true")]
    pub compress: bool,

    #[serde(default = "default_sync_interval_hours")]
    pub sync_interval_hours: u64,
}

impl Default for LocalTargetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_local_path(),
            keep_versions: default_keep_versions(),
            compress: true,
            sync_interval_hours: default_sync_interval_hours(),
        }
    }
}

fn default_local_path() -> PathBuf {
    PathBuf::from("./backups")
}

fn default_keep_versions() -> usize {
    5
}

/// Radicle network publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadicleTargetConfig {
    #[serde(default)]
    pub enabled: bool,

    /// `RAD_HOME` handed to the `rad` CLI. Defaults to the CLI's own choice.
    #[serde(default)]
    pub rad_home: Option<PathBuf>,

    /// Seeds to announce new projects to.
    #[serde(default)]
    pub seed_nodes: Vec<String>,

    /// Initialize a new project per repository, or push to an existing one.
    #[serde(default = "default_true")]
    pub create_project: bool,

    #[serde(default = "default_sync_interval_hours")]
    pub sync_interval_hours: u64,
}

impl Default for RadicleTargetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rad_home: None,
            seed_nodes: Vec::new(),
            create_project: true,
            sync_interval_hours: default_sync_interval_hours(),
        }
    }
}

/// Archives added to an IPFS node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfsTargetConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_ipfs_api_url")]
    pub api_url: String,

    #[serde(default = "default_ipfs_gateway_url")]
    pub gateway_url: String,

    #[serde(default = "default_true")]
    pub pin_on_upload: bool,

    #[serde(default = "default_true")]
    pub compress: bool,

    #[serde(default = "default_sync_interval_hours")]
    pub sync_interval_hours: u64,
}

impl Default for IpfsTargetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: default_ipfs_api_url(),
            gateway_url: default_ipfs_gateway_url(),
            pin_on_upload: true,
            compress: true,
            sync_interval_hours: default_sync_interval_hours(),
        }
    }
}

fn default_ipfs_api_url() -> String {
    "http://localhost:5001".to_string()
}

fn default_ipfs_gateway_url() -> String {
    "https://ipfs.io".to_string()
}

/// Dat archives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatTargetConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_sync_interval_hours")]
    pub sync_interval_hours: u64,
}

impl Default for DatTargetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sync_interval_hours: default_sync_interval_hours(),
        }
    }
}

fn default_sync_interval_hours() -> u64 {
    24
}

impl BackupTargetsConfig {
    /// Names of the enabled targets, in backup order.
    pub fn enabled_names(&self) -> Vec<&'static str> {
        let flags = [
            ("gitlab", self.gitlab.enabled),
            ("gitea", self.gitea.enabled),
            ("bitbucket", self.bitbucket.enabled),
            ("local", self.local_backup.enabled),
            ("radicle", self.radicle.enabled),
            ("ipfs", self.ipfs.enabled),
            ("dat", self.dat.enabled),
        ];
        flags
            .into_iter()
            .filter_map(|(name, enabled)| enabled.then_some(name))
            .collect()
    }

    /// Shortest `sync_interval_hours` among enabled targets.
    pub fn shortest_sync_interval_hours(&self) -> Option<u64> {
        [
            (self.gitlab.enabled, self.gitlab.sync_interval_hours),
            (self.gitea.enabled, self.gitea.sync_interval_hours),
            (self.bitbucket.enabled, self.bitbucket.sync_interval_hours),
            (
                self.local_backup.enabled,
                self.local_backup.sync_interval_hours,
            ),
            (self.radicle.enabled, self.radicle.sync_interval_hours),
            (self.ipfs.enabled, self.ipfs.sync_interval_hours),
            (self.dat.enabled, self.dat.sync_interval_hours),
        ]
        .into_iter()
        .filter_map(|(enabled, hours)| enabled.then_some(hours))
        .min()
    }

    /// Structural checks that apply whether or not a target is enabled.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.local_backup.keep_versions == 0 {
            return Err(ConfigError::Validation(
                "backup_targets.local_backup.keep_versions must be at least 1".to_string(),
            ));
        }
        let intervals = [
            ("gitlab", self.gitlab.sync_interval_hours),
            ("gitea", self.gitea.sync_interval_hours),
            ("bitbucket", self.bitbucket.sync_interval_hours),
            ("local_backup", self.local_backup.sync_interval_hours),
            ("radicle", self.radicle.sync_interval_hours),
            ("ipfs", self.ipfs.sync_interval_hours),
            ("dat", self.dat.sync_interval_hours),
        ];
        for (name, hours) in intervals {
            if hours == 0 {
                return Err(ConfigError::Validation(format!(
                    "backup_targets.{name}.sync_interval_hours must be non-zero"
                )));
            }
        }
        Ok(())
    }

    /// Required fields of every enabled target.
    pub(crate) fn validate_enabled(&self) -> Result<(), ConfigError> {
        if self.gitlab.enabled {
            require("gitlab", "token", &self.gitlab.token)?;
            require("gitlab", "group_id", &self.gitlab.group_id)?;
        }
        if self.gitea.enabled {
            require("gitea", "url", &self.gitea.url)?;
            require("gitea", "token", &self.gitea.token)?;
            require("gitea", "organization", &self.gitea.organization)?;
        }
        if self.bitbucket.enabled {
            require("bitbucket", "username", &self.bitbucket.username)?;
            require("bitbucket", "app_password", &self.bitbucket.app_password)?;
            require("bitbucket", "workspace", &self.bitbucket.workspace)?;
        }
        if self.ipfs.enabled {
            require("ipfs", "api_url", &self.ipfs.api_url)?;
        }
        Ok(())
    }
}

fn require(target: &str, field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "backup_targets.{target}.{field} is required when {target} is enabled"
        )));
    }
    Ok(())
}
