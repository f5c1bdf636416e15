//! Timestamped mirror clones on the local filesystem.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{info, warn};

use orgvault_config::targets::LocalTargetConfig;

use super::{BackupMethod, BackupTarget, TargetError, TargetReport, timestamp};
use crate::BoxFuture;
use crate::archive::{self, ArchiveFormat};
use crate::git::{self, CloneSource};
use crate::github::Repository;

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const ARCHIVE_SUFFIX: &str = ".tar.gz";

pub struct LocalTarget {
    path: PathBuf,
    keep_versions: usize,
    compress: bool,
}

impl LocalTarget {
    pub fn new(path: impl Into<PathBuf>, keep_versions: usize, compress: bool) -> Self {
        Self {
            path: path.into(),
            keep_versions,
            compress,
        }
    }

    pub fn from_config(config: &LocalTargetConfig) -> Self {
        Self::new(config.path.clone(), config.keep_versions, config.compress)
    }

    async fn run_backup(
        &self,
        repo: &Repository,
        source: &CloneSource,
    ) -> Result<TargetReport, TargetError> {
        tokio::fs::create_dir_all(&self.path).await?;
        let dir_name = format!("{}_{}", repo.name, timestamp());
        let backup_dir = self.path.join(&dir_name);

        git::clone_mirror(source, &backup_dir).await?;

        let location = if self.compress {
            let archive_path = self.path.join(format!("{dir_name}{ARCHIVE_SUFFIX}"));
            archive::create_archive_async(
                &backup_dir,
                &archive_path,
                &dir_name,
                ArchiveFormat::TarGz,
            )
            .await?;
            tokio::fs::remove_dir_all(&backup_dir).await?;
            archive_path
        } else {
            backup_dir
        };
        info!(repo = %repo.name, path = %location.display(), "Local backup written");

        let (root, name, keep) = (self.path.clone(), repo.name.clone(), self.keep_versions);
        match tokio::task::spawn_blocking(move || prune_versions(&root, &name, keep)).await {
            Ok(Ok(removed)) => {
                for path in removed {
                    info!(repo = %repo.name, path = %path.display(), "Removed old backup");
                }
            }
            Ok(Err(e)) => warn!(repo = %repo.name, error = %e, "Failed to prune old backups"),
            Err(e) => warn!(repo = %repo.name, error = %e, "Prune task failed"),
        }

        Ok(TargetReport::new(
            BackupMethod::LocalClone,
            location.display().to_string(),
        ))
    }
}

impl BackupTarget for LocalTarget {
    fn name(&self) -> &'static str {
        "local"
    }

    fn test_connection(&self) -> BoxFuture<'_, Result<String, TargetError>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.path).await?;
            let probe = self.path.join(".orgvault-write-test");
            tokio::fs::write(&probe, b"test").await?;
            tokio::fs::remove_file(&probe).await?;
            Ok(format!("{} is writable", self.path.display()))
        })
    }

    fn backup<'a>(
        &'a self,
        repo: &'a Repository,
        source: &'a CloneSource,
    ) -> BoxFuture<'a, Result<TargetReport, TargetError>> {
        Box::pin(self.run_backup(repo, source))
    }
}

/// The timestamp of a backup entry named `<repo>_<YYYYmmdd_HHMMSS>` or
/// `<repo>_<YYYYmmdd_HHMMSS>.tar.gz`; `None` for other entries.
pub fn backup_timestamp(repo: &str, entry: &str) -> Option<NaiveDateTime> {
    let rest = entry.strip_prefix(repo)?.strip_prefix('_')?;
    let stamp = rest.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(rest);
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}

/// Delete all but the newest `keep` backups of `repo` under `root`.
/// Returns the removed paths.
pub fn prune_versions(root: &Path, repo: &str, keep: usize) -> std::io::Result<Vec<PathBuf>> {
    let mut entries: Vec<(NaiveDateTime, String)> = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(ts) = backup_timestamp(repo, &name) {
            entries.push((ts, name));
        }
    }
    // Newest first; on equal timestamps the archive sorts before its directory.
    entries.sort_by(|a, b| b.cmp(a));

    let mut removed = Vec::new();
    for (_, name) in entries.into_iter().skip(keep) {
        let path = root.join(&name);
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        removed.push(path);
    }
    Ok(removed)
}
