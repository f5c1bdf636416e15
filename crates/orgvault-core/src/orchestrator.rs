//! One backup run: discover the organization's repositories and copy each
//! of them to every enabled target.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use orgvault_config::{AppConfig, ConfigError};

use crate::build_info;
use crate::github::{GitHubClient, GitHubError, RepoFilter, Repository};
use crate::notify::Notifier;
use crate::secrets::{EnvError, Environment};
use crate::summary::{BackupResult, BackupStatus, RunSummary};
use crate::targets::{self, BackupTarget, TargetError};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error("backup target: {0}")]
    Target(#[from] TargetError),
}

pub struct Orchestrator {
    organization: String,
    github: GitHubClient,
    filter: RepoFilter,
    targets: Vec<Arc<dyn BackupTarget>>,
    notifier: Notifier,
    max_concurrent: usize,
}

impl Orchestrator {
    pub fn new(
        organization: impl Into<String>,
        github: GitHubClient,
        filter: RepoFilter,
        targets: Vec<Arc<dyn BackupTarget>>,
        notifier: Notifier,
        max_concurrent: usize,
    ) -> Self {
        Self {
            organization: organization.into(),
            github,
            filter,
            targets,
            notifier,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Validate the backup requirements of `config` and build every
    /// component. `${VAR}` credentials are resolved against `env`.
    pub fn from_config(config: &AppConfig, env: &Environment) -> Result<Self, OrchestratorError> {
        config.validate_for_backup()?;

        let client = Client::builder()
            .user_agent(build_info::user_agent())
            .build()?;
        let token = env.resolve(&config.github.token)?;
        let github =
            GitHubClient::new(config.github.api_url.clone(), token).with_client(client.clone());
        let filter = RepoFilter::from_config(&config.repositories)?;
        let targets = targets::build_targets(&config.backup_targets, env, &client)?;
        let notifier = Notifier::from_config(&config.notifications, env, client);

        Ok(Self::new(
            config.github.organization.clone(),
            github,
            filter,
            targets,
            notifier,
            config.performance.max_concurrent_backups,
        ))
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    pub fn github(&self) -> &GitHubClient {
        &self.github
    }

    pub fn targets(&self) -> &[Arc<dyn BackupTarget>] {
        &self.targets
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Repositories of the organization selected for backup.
    pub async fn discover(&self) -> Result<Vec<Repository>, GitHubError> {
        let all = self.github.list_org_repositories(&self.organization).await?;
        Ok(self.filter.apply(all))
    }

    /// Discover and back up. A discovery failure is reported through the
    /// error channels and returned; per-backup failures land in the summary.
    pub async fn run(&self, dry_run: bool) -> Result<RunSummary, GitHubError> {
        info!(org = %self.organization, dry_run, "Starting organization backup");
        let repos = match self.discover().await {
            Ok(repos) => repos,
            Err(e) => {
                error!(org = %self.organization, error = %e, "Repository discovery failed");
                self.notifier
                    .send_error(&format!("Repository discovery failed: {e}"))
                    .await;
                return Err(e);
            }
        };
        let summary = self.backup_all(repos, dry_run).await;
        if !dry_run {
            self.notifier.send_summary(&summary).await;
        }
        Ok(summary)
    }

    /// Back up every repository to every target, at most
    /// `max_concurrent` at a time. Yields exactly one result per pair,
    /// ordered by repository, then target.
    pub async fn backup_all(&self, repos: Vec<Repository>, dry_run: bool) -> RunSummary {
        let started_at = Local::now();
        let clock = Instant::now();
        let repo_count = repos.len();

        if repos.is_empty() {
            warn!(org = %self.organization, "No repositories found to back up");
            return RunSummary::new(started_at, clock.elapsed(), 0, Vec::new());
        }

        let mut results = Vec::with_capacity(repo_count * self.targets.len());
        if dry_run {
            for repo in &repos {
                for target in &self.targets {
                    info!(repo = %repo.name, target = target.name(), "Would back up");
                    results.push(BackupResult {
                        repository: repo.name.clone(),
                        target: target.name().to_string(),
                        status: BackupStatus::DryRun,
                        duration: Duration::ZERO,
                    });
                }
            }
            return RunSummary::new(started_at, clock.elapsed(), repo_count, results);
        }

        let repos: Vec<Arc<Repository>> = repos.into_iter().map(Arc::new).collect();
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for (ri, repo) in repos.iter().enumerate() {
            for (ti, target) in self.targets.iter().enumerate() {
                let repo = Arc::clone(repo);
                let target = Arc::clone(target);
                let permits = Arc::clone(&permits);
                let source = repo.clone_source(self.github.token());
                tasks.spawn(async move {
                    let _permit = permits.acquire_owned().await;
                    let clock = Instant::now();
                    info!(repo = %repo.name, target = target.name(), "Backing up");
                    let status = match target.backup(&repo, &source).await {
                        Ok(report) => {
                            info!(
                                repo = %repo.name,
                                target = target.name(),
                                method = %report.method,
                                location = %report.location,
                                "Backup succeeded"
                            );
                            BackupStatus::Succeeded(report)
                        }
                        Err(e) => {
                            error!(repo = %repo.name, target = target.name(), error = %e, "Backup failed");
                            BackupStatus::Failed(e.to_string())
                        }
                    };
                    (ri, ti, status, clock.elapsed())
                });
            }
        }

        let mut done: Vec<(usize, usize, BackupStatus, Duration)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => done.push(outcome),
                Err(e) => error!(error = %e, "Backup task aborted"),
            }
        }

        let finished: BTreeSet<(usize, usize)> =
            done.iter().map(|(r, t, _, _)| (*r, *t)).collect();
        for ri in 0..repos.len() {
            for ti in 0..self.targets.len() {
                if !finished.contains(&(ri, ti)) {
                    let status = BackupStatus::Failed("backup task aborted".to_string());
                    done.push((ri, ti, status, Duration::ZERO));
                }
            }
        }
        done.sort_by_key(|(r, t, _, _)| (*r, *t));

        results.extend(done.into_iter().map(|(ri, ti, status, duration)| BackupResult {
            repository: repos[ri].name.clone(),
            target: self.targets[ti].name().to_string(),
            status,
            duration,
        }));

        let summary = RunSummary::new(started_at, clock.elapsed(), repo_count, results);
        info!(
            total = summary.total(),
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            elapsed_ms = summary.duration.as_millis() as u64,
            "Organization backup finished"
        );
        summary
    }

    /// Probe every target; one entry per target, in backup order.
    pub async fn test_connections(&self) -> Vec<(&'static str, Result<String, TargetError>)> {
        let mut out = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            out.push((target.name(), target.test_connection().await));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoxFuture;
    use crate::git::CloneSource;
    use crate::secrets::SecretValue;
    use crate::targets::{BackupMethod, TargetReport};
    use orgvault_config::RepositoryFilterConfig;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records concurrency and fails repositories named `broken*`.
    #[derive(Default)]
    struct FakeTarget {
        name: &'static str,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeTarget {
        fn named(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                ..Default::default()
            })
        }
    }

    impl BackupTarget for FakeTarget {
        fn name(&self) -> &'static str {
            self.name
        }

        fn test_connection(&self) -> BoxFuture<'_, Result<String, TargetError>> {
            Box::pin(async { Ok("fake".to_string()) })
        }

        fn backup<'a>(
            &'a self,
            repo: &'a Repository,
            _source: &'a CloneSource,
        ) -> BoxFuture<'a, Result<TargetReport, TargetError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                if repo.name.starts_with("broken") {
                    Err(TargetError::NotFound(repo.name.clone()))
                } else {
                    Ok(TargetReport::new(BackupMethod::LocalClone, format!("/b/{}", repo.name)))
                }
            })
        }
    }

    fn orchestrator(targets: Vec<Arc<dyn BackupTarget>>, max: usize) -> Orchestrator {
        Orchestrator::new(
            "acme",
            GitHubClient::new("http://127.0.0.1:9", SecretValue::new("t")),
            RepoFilter::from_config(&RepositoryFilterConfig::default()).unwrap(),
            targets,
            Notifier::disabled(Client::new()),
            max,
        )
    }

    fn repos(names: &[&str]) -> Vec<Repository> {
        names
            .iter()
            .map(|n| Repository::new(*n, format!("https://github.com/acme/{n}.git")))
            .collect()
    }

    #[tokio::test]
    async fn test_one_result_per_pair_in_order() {
        let a = FakeTarget::named("alpha");
        let b = FakeTarget::named("beta");
        let orch = orchestrator(vec![a.clone() as Arc<dyn BackupTarget>, b.clone()], 3);

        let summary = orch
            .backup_all(repos(&["api", "broken-web", "docs"]), false)
            .await;

        assert_eq!(summary.total(), 6);
        assert_eq!(summary.succeeded(), 4);
        assert_eq!(summary.failed(), 2);
        let pairs: Vec<(&str, &str)> = summary
            .results
            .iter()
            .map(|r| (r.repository.as_str(), r.target.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("api", "alpha"),
                ("api", "beta"),
                ("broken-web", "alpha"),
                ("broken-web", "beta"),
                ("docs", "alpha"),
                ("docs", "beta"),
            ]
        );
        assert_eq!(summary.per_target["beta"].failed, 1);
        assert_eq!(a.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let target = FakeTarget::named("alpha");
        let orch = orchestrator(vec![target.clone() as Arc<dyn BackupTarget>], 2);
        let names: Vec<String> = (0..8).map(|i| format!("repo-{i}")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();

        let summary = orch.backup_all(repos(&names), false).await;

        assert_eq!(summary.succeeded(), 8);
        assert!(target.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_dry_run_touches_no_target() {
        let target = FakeTarget::named("alpha");
        let orch = orchestrator(vec![target.clone() as Arc<dyn BackupTarget>], 5);

        let summary = orch.backup_all(repos(&["api", "web"]), true).await;

        assert_eq!(summary.dry_run(), 2);
        assert_eq!(summary.total(), 2);
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_repositories() {
        let orch = orchestrator(vec![FakeTarget::named("alpha") as Arc<dyn BackupTarget>], 5);
        let summary = orch.backup_all(Vec::new(), false).await;
        assert_eq!(summary.total(), 0);
        assert_eq!(summary.repositories, 0);
        assert!(summary.is_success());
    }

    #[test]
    fn test_from_config_requires_organization() {
        let config = AppConfig::default();
        let err = Orchestrator::from_config(&config, &Environment::isolated())
            .err()
            .unwrap();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn test_from_config_resolves_token() {
        let yaml = r#"
github:
  organization: acme
  token: ${GITHUB_TOKEN}
backup_targets:
  dat:
    enabled: true
"#;
        let config = AppConfig::parse(yaml).unwrap();
        let err = Orchestrator::from_config(&config, &Environment::isolated())
            .err()
            .unwrap();
        assert!(matches!(err, OrchestratorError::Env(_)));

        let env = Environment::isolated().with_var("GITHUB_TOKEN", "ghp_x");
        let orch = Orchestrator::from_config(&config, &env).unwrap();
        assert_eq!(orch.github().token().expose(), "ghp_x");
        let names: Vec<&str> = orch.targets().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["dat"]);
    }
}
