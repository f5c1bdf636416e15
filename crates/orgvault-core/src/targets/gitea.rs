//! Gitea repositories: migrations as pull mirrors, or clone-and-push.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use orgvault_config::targets::GiteaTargetConfig;

use super::{BackupMethod, BackupTarget, TargetError, TargetReport, ensure_success, work_dir};
use crate::BoxFuture;
use crate::git::{self, CloneSource, with_credentials};
use crate::github::Repository;
use crate::secrets::{Environment, SecretValue};

#[derive(Debug, Deserialize)]
struct GiteaRepo {
    #[serde(default)]
    mirror: bool,
    html_url: String,
    clone_url: String,
}

#[derive(Debug, Deserialize)]
struct GiteaUser {
    login: String,
}

pub struct GiteaTarget {
    client: Client,
    url: String,
    token: SecretValue,
    organization: String,
    create_mirrors: bool,
    mirror_interval: String,
}

impl GiteaTarget {
    pub fn new(
        client: Client,
        url: impl Into<String>,
        token: SecretValue,
        organization: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
            token,
            organization: organization.into(),
            create_mirrors: true,
            mirror_interval: "8h".to_string(),
        }
    }

    pub fn with_mirrors(mut self, create_mirrors: bool, interval: impl Into<String>) -> Self {
        self.create_mirrors = create_mirrors;
        self.mirror_interval = interval.into();
        self
    }

    pub fn from_config(
        config: &GiteaTargetConfig,
        env: &Environment,
        client: Client,
    ) -> Result<Self, TargetError> {
        Ok(Self::new(
            client,
            config.url.clone(),
            env.resolve(&config.token)?,
            config.organization.clone(),
        )
        .with_mirrors(config.create_mirrors, config.mirror_interval.clone()))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/api/v1{path}", self.url))
            .header("Authorization", format!("token {}", self.token.expose()))
    }

    async fn get_repo(&self, name: &str) -> Result<Option<GiteaRepo>, TargetError> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{}/{name}", self.organization),
            )
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(ensure_success(resp).await?.json().await?))
    }

    async fn migrate(&self, repo: &Repository, source: &CloneSource) -> Result<GiteaRepo, TargetError> {
        let mut body = json!({
            "clone_addr": source.public_url(),
            "repo_name": repo.name,
            "repo_owner": self.organization,
            "description": repo.description(),
            "private": repo.private,
            "mirror": true,
            "mirror_interval": self.mirror_interval,
            "service": "github",
        });
        if let Some(token) = source.token() {
            body["auth_token"] = json!(token.expose());
        }
        let resp = self
            .request(reqwest::Method::POST, "/repos/migrate")
            .json(&body)
            .send()
            .await?;
        Ok(ensure_success(resp).await?.json().await?)
    }

    async fn create(&self, repo: &Repository) -> Result<GiteaRepo, TargetError> {
        let body = json!({
            "name": repo.name,
            "description": repo.description(),
            "private": repo.private,
            "auto_init": false,
        });
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/orgs/{}/repos", self.organization),
            )
            .json(&body)
            .send()
            .await?;
        Ok(ensure_success(resp).await?.json().await?)
    }

    async fn push(
        &self,
        repo: &Repository,
        source: &CloneSource,
        target: &GiteaRepo,
    ) -> Result<(), TargetError> {
        let tmp = work_dir()?;
        let mirror = tmp.path().join(format!("{}.git", repo.name));
        git::clone_mirror(source, &mirror).await?;
        let remote = with_credentials(&target.clone_url, self.token.expose(), None);
        git::push_mirror(&mirror, &remote).await?;
        Ok(())
    }

    async fn run_backup(
        &self,
        repo: &Repository,
        source: &CloneSource,
    ) -> Result<TargetReport, TargetError> {
        match self.get_repo(&repo.name).await? {
            Some(existing) if existing.mirror => {
                let resp = self
                    .request(
                        reqwest::Method::POST,
                        &format!("/repos/{}/{}/mirror-sync", self.organization, repo.name),
                    )
                    .send()
                    .await?;
                ensure_success(resp).await?;
                info!(repo = %repo.name, "Gitea mirror sync triggered");
                Ok(TargetReport::new(BackupMethod::MirrorSync, existing.html_url))
            }
            Some(existing) => {
                self.push(repo, source, &existing).await?;
                info!(repo = %repo.name, "Pushed to existing Gitea repository");
                Ok(TargetReport::new(BackupMethod::ClonePush, existing.html_url))
            }
            None if self.create_mirrors => {
                let created = self.migrate(repo, source).await?;
                info!(repo = %repo.name, "Created Gitea pull mirror");
                Ok(TargetReport::new(BackupMethod::Mirror, created.html_url))
            }
            None => {
                let created = self.create(repo).await?;
                self.push(repo, source, &created).await?;
                info!(repo = %repo.name, "Created Gitea repository and pushed");
                Ok(TargetReport::new(BackupMethod::ClonePush, created.html_url))
            }
        }
    }
}

impl BackupTarget for GiteaTarget {
    fn name(&self) -> &'static str {
        "gitea"
    }

    fn test_connection(&self) -> BoxFuture<'_, Result<String, TargetError>> {
        Box::pin(async move {
            let resp = self.request(reqwest::Method::GET, "/user").send().await?;
            let user: GiteaUser = ensure_success(resp).await?.json().await?;
            Ok(format!("connected to {} as {}", self.url, user.login))
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
