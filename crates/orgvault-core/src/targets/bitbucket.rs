//! Bitbucket Cloud repositories. Bitbucket has no pull mirrors, so every
//! backup is a clone-and-push.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use orgvault_config::targets::BitbucketTargetConfig;

use super::{BackupMethod, BackupTarget, TargetError, TargetReport, ensure_success, work_dir};
use crate::BoxFuture;
use crate::git::{self, CloneSource, with_credentials};
use crate::github::Repository;
use crate::secrets::{Environment, SecretValue};

#[derive(Debug, Default, Deserialize)]
struct Link {
    #[serde(default)]
    href: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    html: Link,
    #[serde(default)]
    clone: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct BitbucketRepo {
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Deserialize)]
struct BitbucketUser {
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    nickname: String,
}

pub struct BitbucketTarget {
    client: Client,
    url: String,
    username: SecretValue,
    app_password: SecretValue,
    workspace: String,
}

impl BitbucketTarget {
    pub fn new(
        client: Client,
        url: impl Into<String>,
        username: SecretValue,
        app_password: SecretValue,
        workspace: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
            username,
            app_password,
            workspace: workspace.into(),
        }
    }

    pub fn from_config(
        config: &BitbucketTargetConfig,
        env: &Environment,
        client: Client,
    ) -> Result<Self, TargetError> {
        Ok(Self::new(
            client,
            config.url.clone(),
            env.resolve(&config.username)?,
            env.resolve(&config.app_password)?,
            config.workspace.clone(),
        ))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/2.0{path}", self.url))
            .basic_auth(self.username.expose(), Some(self.app_password.expose()))
    }

    /// Repository slugs are lowercase.
    fn slug(name: &str) -> String {
        name.to_lowercase()
    }

    async fn ensure_repo(&self, repo: &Repository) -> Result<BitbucketRepo, TargetError> {
        let path = format!("/repositories/{}/{}", self.workspace, Self::slug(&repo.name));
        let resp = self.request(reqwest::Method::GET, &path).send().await?;
        if resp.status() != StatusCode::NOT_FOUND {
            return Ok(ensure_success(resp).await?.json().await?);
        }

        let body = json!({
            "scm": "git",
            "name": repo.name,
            "description": repo.description(),
            "is_private": repo.private,
        });
        let resp = self
            .request(reqwest::Method::POST, &path)
            .json(&body)
            .send()
            .await?;
        let created = ensure_success(resp).await?.json().await?;
        info!(repo = %repo.name, workspace = %self.workspace, "Created Bitbucket repository");
        Ok(created)
    }

    async fn run_backup(
        &self,
        repo: &Repository,
        source: &CloneSource,
    ) -> Result<TargetReport, TargetError> {
        let remote_repo = self.ensure_repo(repo).await?;
        let slug = Self::slug(&repo.name);

        let https_clone = remote_repo
            .links
            .clone
            .iter()
            .find(|l| l.name == "https")
            .map(|l| l.href.clone())
            .unwrap_or_else(|| format!("https://bitbucket.org/{}/{slug}.git", self.workspace));
        let remote = with_credentials(
            &https_clone,
            self.username.expose(),
            Some(self.app_password.expose()),
        );

        let tmp = work_dir()?;
        let mirror = tmp.path().join(format!("{}.git", repo.name));
        git::clone_mirror(source, &mirror).await?;
        git::push_mirror(&mirror, &remote).await?;
        info!(repo = %repo.name, "Pushed to Bitbucket");

        let location = if remote_repo.links.html.href.is_empty() {
            format!("https://bitbucket.org/{}/{slug}", self.workspace)
        } else {
            remote_repo.links.html.href
        };
        Ok(TargetReport::new(BackupMethod::ClonePush, location))
    }
}

impl BackupTarget for BitbucketTarget {
    fn name(&self) -> &'static str {
        "bitbucket"
    }

    fn test_connection(&self) -> BoxFuture<'_, Result<String, TargetError>> {
        Box::pin(async move {
            let resp = self.request(reqwest::Method::GET, "/user").send().await?;
            let user: BitbucketUser = ensure_success(resp).await?.json().await?;
            let who = if user.display_name.is_empty() {
                user.nickname
            } else {
                user.display_name
            };
            Ok(format!("connected to Bitbucket as {who}"))
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

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::{Json, Router};
    use orgvault_test_utils::StubServer;

    fn target(server: &StubServer) -> BitbucketTarget {
        BitbucketTarget::new(
            Client::new(),
            server.url(),
            SecretValue::new("bob"),
            SecretValue::new("app-pass"),
            "acme",
        )
    }

    #[test]
    fn test_slug_is_lowercase() {
        assert_eq!(BitbucketTarget::slug("My-Repo"), "my-repo");
    }

    #[tokio::test]
    async fn test_connection_uses_basic_auth() {
        let router = Router::new().route(
            "/2.0/user",
            get(|| async { Json(json!({"display_name": "Bob Backup", "nickname": "bob"})) }),
        );
        let server = StubServer::start(router).await;

        let summary = target(&server).test_connection().await.unwrap();
        assert_eq!(summary, "connected to Bitbucket as Bob Backup");

        let req = &server.requests_to("/2.0/user")[0];
        // base64("bob:app-pass")
        assert_eq!(req.header("authorization"), Some("Basic Ym9iOmFwcC1wYXNz"));
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let router = Router::new().route(
            "/2.0/user",
            get(|| async { (axum::http::StatusCode::UNAUTHORIZED, "nope") }),
        );
        let server = StubServer::start(router).await;
        let err = target(&server).test_connection().await.unwrap_err();
        assert!(matches!(err, TargetError::Api { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_push_failure_after_repository_exists() {
        let router = Router::new().route(
            "/2.0/repositories/acme/api",
            get(|| async {
                Json(json!({
                    "links": {
                        "html": {"href": "https://bitbucket.org/acme/api"},
                        "clone": [{"name": "https", "href": "http://127.0.0.1:9/acme/api.git"}]
                    }
                }))
            }),
        );
        let server = StubServer::start(router).await;
        let repo = Repository::new("api", "/nonexistent/source/api.git");

        let err = target(&server)
            .backup(&repo, &CloneSource::public(repo.clone_url.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, TargetError::Git(_)));
        assert!(server.requests_to("/2.0/repositories/acme/api").len() == 1);
    }
}
