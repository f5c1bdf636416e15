//! Dat: share a working copy of the repository as a Dat archive.

use std::path::Path;

use tracing::info;

use super::{BackupMethod, BackupTarget, TargetError, TargetReport, work_dir};
use crate::BoxFuture;
use crate::git::{self, CloneSource, run_tool};
use crate::github::Repository;

#[derive(Debug, Default)]
pub struct DatTarget;

impl DatTarget {
    pub fn new() -> Self {
        Self
    }

    async fn dat(&self, args: &[&str], cwd: &Path) -> Result<String, TargetError> {
        Ok(run_tool("dat", args, Some(cwd), &[]).await?)
    }

    async fn run_backup(
        &self,
        repo: &Repository,
        source: &CloneSource,
    ) -> Result<TargetReport, TargetError> {
        let tmp = work_dir()?;
        let dir = tmp.path().join(&repo.name);
        git::clone_working(source, &dir).await?;

        self.dat(&["init"], &dir).await?;
        self.dat(&["add", "."], &dir).await?;
        let message = format!("Backup of {}", repo.name);
        self.dat(&["commit", "-m", message.as_str()], &dir).await?;

        let keys = self.dat(&["keys"], &dir).await?;
        let key = parse_dat_key(&keys)
            .ok_or_else(|| TargetError::Parse(format!("no dat:// key in `dat keys` output: {keys}")))?;
        info!(repo = %repo.name, %key, "Created Dat archive");
        Ok(TargetReport::new(
            BackupMethod::DatArchive,
            format!("dat://{key}"),
        ))
    }
}

impl BackupTarget for DatTarget {
    fn name(&self) -> &'static str {
        "dat"
    }

    fn test_connection(&self) -> BoxFuture<'_, Result<String, TargetError>> {
        Box::pin(async move {
            let version = run_tool("dat", &["--version"], None, &[]).await?;
            Ok(format!("dat CLI {}", version.trim()))
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

/// The archive key following the first `dat://` in `output`.
pub fn parse_dat_key(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (_, rest) = line.split_once("dat://")?;
        let key = rest.split_whitespace().next()?;
        Some(key.to_string())
    })
}
