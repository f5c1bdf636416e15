//! Radicle: publish repositories to the peer-to-peer network via `rad`.

use std::path::{Path, PathBuf};

use tracing::info;

use orgvault_config::targets::RadicleTargetConfig;

use super::{BackupMethod, BackupTarget, TargetError, TargetReport, work_dir};
use crate::BoxFuture;
use crate::git::{self, CloneSource, run_tool};
use crate::github::Repository;

pub struct RadicleTarget {
    rad_home: Option<PathBuf>,
    seed_nodes: Vec<String>,
    create_project: bool,
}

impl RadicleTarget {
    pub fn from_config(config: &RadicleTargetConfig) -> Self {
        Self {
            rad_home: config.rad_home.clone(),
            seed_nodes: config.seed_nodes.clone(),
            create_project: config.create_project,
        }
    }

    fn envs(&self) -> Vec<(String, String)> {
        self.rad_home
            .iter()
            .map(|home| ("RAD_HOME".to_string(), home.display().to_string()))
            .collect()
    }

    async fn rad(&self, args: &[&str], cwd: Option<&Path>) -> Result<String, TargetError> {
        Ok(run_tool("rad", args, cwd, &self.envs()).await?)
    }

    async fn init_project(&self, repo: &Repository, dir: &Path) -> Result<String, TargetError> {
        let visibility = if repo.private { "--private" } else { "--public" };
        self.rad(
            &[
                "init",
                "--name",
                repo.name.as_str(),
                "--description",
                repo.description(),
                "--default-branch",
                repo.default_branch.as_str(),
                visibility,
                "--no-confirm",
            ],
            Some(dir),
        )
        .await?;

        let mut sync: Vec<&str> = vec!["sync", "--announce"];
        for seed in &self.seed_nodes {
            sync.push("--seed");
            sync.push(seed);
        }
        self.rad(&sync, Some(dir)).await?;

        let rid = self.rad(&["inspect"], Some(dir)).await?;
        parse_rid(&rid)
            .ok_or_else(|| TargetError::Parse(format!("no RID in `rad inspect` output: {rid}")))
    }

    async fn push_existing(&self, repo: &Repository, dir: &Path) -> Result<String, TargetError> {
        let listing = self.rad(&["ls"], None).await?;
        let rid = find_rid(&listing, &repo.name)
            .ok_or_else(|| TargetError::NotFound(format!("Radicle project {}", repo.name)))?;
        let remote = format!("rad://{}", rid.trim_start_matches("rad:"));
        git::git(&["remote", "add", "rad", remote.as_str()], Some(dir)).await?;
        git::git(&["push", "--quiet", "rad", "--all"], Some(dir)).await?;
        Ok(rid)
    }

    async fn run_backup(
        &self,
        repo: &Repository,
        source: &CloneSource,
    ) -> Result<TargetReport, TargetError> {
        let tmp = work_dir()?;
        let dir = tmp.path().join(&repo.name);
        git::clone_working(source, &dir).await?;

        let rid = if self.create_project {
            self.init_project(repo, &dir).await?
        } else {
            self.push_existing(repo, &dir).await?
        };
        info!(repo = %repo.name, %rid, "Published to Radicle");
        Ok(TargetReport::new(BackupMethod::RadiclePush, rid))
    }
}

impl BackupTarget for RadicleTarget {
    fn name(&self) -> &'static str {
        "radicle"
    }

    fn test_connection(&self) -> BoxFuture<'_, Result<String, TargetError>> {
        Box::pin(async move {
            let version = self.rad(&["--version"], None).await?;
            self.rad(&["node", "status"], None).await?;
            Ok(format!("{}; node running", version.trim()))
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

/// The first `rad:…` token in `output`.
pub fn parse_rid(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find(|t| t.starts_with("rad:") && t.len() > 4)
        .map(str::to_string)
}

/// The RID on the `rad ls` line whose columns include exactly `name`.
pub fn find_rid(listing: &str, name: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let cols: Vec<&str> = line
            .split(|c: char| c.is_whitespace() || c == '│' || c == '|')
            .filter(|c| !c.is_empty())
            .collect();
        if cols.contains(&name) {
            cols.iter()
                .find(|c| c.starts_with("rad:"))
                .map(|c| c.to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_rid() {
        assert_eq!(
            parse_rid("rad:z3gqcJUoA1n9HaHKufZs5FCSGazv5\n").as_deref(),
            Some("rad:z3gqcJUoA1n9HaHKufZs5FCSGazv5")
        );
        assert_eq!(parse_rid("nothing here"), None);
        assert_eq!(parse_rid("rad: "), None);
    }

    #[test]
    fn test_find_rid_in_table() {
        let listing = "\
╭──────────────────────────────────────────────────────────╮
│ Name      RID                                 Visibility │
├──────────────────────────────────────────────────────────┤
│ api       rad:z3gqcJUoA1n9HaHKufZs5FCSGazv5   public     │
│ api-docs  rad:z4V1sjrXqjvFdnCUbxPFqd5p4DtH5   public     │
╰──────────────────────────────────────────────────────────╯";
        assert_eq!(
            find_rid(listing, "api-docs").as_deref(),
            Some("rad:z4V1sjrXqjvFdnCUbxPFqd5p4DtH5")
        );
        assert_eq!(
            find_rid(listing, "api").as_deref(),
            Some("rad:z3gqcJUoA1n9HaHKufZs5FCSGazv5")
        );
        assert_eq!(find_rid(listing, "ap"), None);
    }

    #[test]
    fn test_rad_home_is_exported() {
        let target = RadicleTarget::from_config(&RadicleTargetConfig {
            rad_home: Some(PathBuf::from("/srv/rad")),
            ..Default::default()
        });
        assert_eq!(
            target.envs(),
            vec![("RAD_HOME".to_string(), "/srv/rad".to_string())]
        );
    }
}
