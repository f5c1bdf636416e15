//! Backup targets: where repositories are copied to.
//!
//! Centralized hosts are driven through their HTTP APIs (GitLab, Gitea,
//! Bitbucket); decentralized ones through their CLIs or daemon APIs
//! (Radicle, IPFS, Dat). The local target keeps timestamped mirrors on disk.
//!
//! ```text
//!            ┌──────────────┐
//!  repo ───▶ │ BackupTarget │  (trait)
//!            └──────┬───────┘
//!     ┌──────┬──────┼──────┬────────┬──────┬─────┐
//!     ▼      ▼      ▼      ▼        ▼      ▼     ▼
//!  gitlab  gitea  bitbucket local radicle ipfs  dat
//! ```

pub mod bitbucket;
pub mod dat;
pub mod gitea;
pub mod gitlab;
pub mod ipfs;
pub mod local;
pub mod radicle;

use std::fmt;
use std::sync::Arc;

use reqwest::Client;

use orgvault_config::BackupTargetsConfig;

use crate::BoxFuture;
use crate::git::{CloneSource, GitError};
use crate::github::Repository;
use crate::secrets::{EnvError, Environment};

pub use bitbucket::BitbucketTarget;
pub use dat::DatTarget;
pub use gitea::GiteaTarget;
pub use gitlab::GitLabTarget;
pub use ipfs::IpfsTarget;
pub use local::LocalTarget;
pub use radicle::RadicleTarget;

/// How a backup was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupMethod {
    /// A pull mirror was created on the host.
    Mirror,
    /// An existing pull mirror was asked to sync.
    MirrorSync,
    /// Cloned from GitHub and pushed to the host.
    ClonePush,
    /// Mirror clone on the local filesystem.
    LocalClone,
    RadiclePush,
    IpfsArchive,
    DatArchive,
}

impl fmt::Display for BackupMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupMethod::Mirror => "mirror",
            BackupMethod::MirrorSync => "mirror_sync",
            BackupMethod::ClonePush => "clone_push",
            BackupMethod::LocalClone => "local_clone",
            BackupMethod::RadiclePush => "radicle_push",
            BackupMethod::IpfsArchive => "ipfs_archive",
            BackupMethod::DatArchive => "dat_archive",
        };
        f.write_str(s)
    }
}

/// What a successful backup produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub method: BackupMethod,
    /// URL, path, CID link or Dat key of the copy.
    pub location: String,
}

impl TargetReport {
    pub fn new(method: BackupMethod, location: impl Into<String>) -> Self {
        Self {
            method,
            location: location.into(),
        }
    }
}

/// Errors from a backup target.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unexpected response: {0}")]
    Parse(String),
}

/// A destination for repository backups.
///
/// Uses [`BoxFuture`] so targets can be held as `Arc<dyn BackupTarget>`.
pub trait BackupTarget: Send + Sync {
    /// Stable lowercase name used in logs and summaries.
    fn name(&self) -> &'static str;

    /// Check credentials / reachability; returns a short human summary.
    fn test_connection(&self) -> BoxFuture<'_, Result<String, TargetError>>;

    /// Back up one repository.
    fn backup<'a>(
        &'a self,
        repo: &'a Repository,
        source: &'a CloneSource,
    ) -> BoxFuture<'a, Result<TargetReport, TargetError>>;
}

/// Instantiate every enabled target, in backup order.
///
/// Credentials given as `${VAR}` are resolved against `env`.
pub fn build_targets(
    config: &BackupTargetsConfig,
    env: &Environment,
    client: &Client,
) -> Result<Vec<Arc<dyn BackupTarget>>, TargetError> {
    let mut targets: Vec<Arc<dyn BackupTarget>> = Vec::new();
    if config.gitlab.enabled {
        targets.push(Arc::new(GitLabTarget::from_config(
            &config.gitlab,
            env,
            client.clone(),
        )?));
    }
    if config.gitea.enabled {
        targets.push(Arc::new(GiteaTarget::from_config(
            &config.gitea,
            env,
            client.clone(),
        )?));
    }
    if config.bitbucket.enabled {
        targets.push(Arc::new(BitbucketTarget::from_config(
            &config.bitbucket,
            env,
            client.clone(),
        )?));
    }
    if config.local_backup.enabled {
        targets.push(Arc::new(LocalTarget::from_config(&config.local_backup)));
    }
    if config.radicle.enabled {
        targets.push(Arc::new(RadicleTarget::from_config(&config.radicle)));
    }
    if config.ipfs.enabled {
        targets.push(Arc::new(IpfsTarget::from_config(&config.ipfs, client.clone())));
    }
    if config.dat.enabled {
        targets.push(Arc::new(DatTarget::new()));
    }
    Ok(targets)
}

/// Turn a non-success response into [`TargetError::Api`].
pub(crate) async fn ensure_success(
    resp: reqwest::Response,
) -> Result<reqwest::Response, TargetError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    Err(TargetError::Api {
        status,
        message: truncate(&message, 300),
    })
}

/// A scratch directory removed on drop.
pub(crate) fn work_dir() -> Result<tempfile::TempDir, TargetError> {
    Ok(tempfile::Builder::new().prefix("orgvault-").tempdir()?)
}

/// Local time as `YYYYmmdd_HHMMSS`.
pub(crate) fn timestamp() -> String {
    chrono::Local::now().format(local::TIMESTAMP_FORMAT).to_string()
}

/// Percent-encode a single URL path segment (GitLab group paths).
pub(crate) fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
