//! GitHub organization discovery and repository selection.

use regex::Regex;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, LINK, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, info};

use orgvault_config::RepositoryFilterConfig;

use crate::build_info;
use crate::git::CloneSource;
use crate::secrets::SecretValue;

const PER_PAGE: u32 = 100;

/// Errors from the GitHub API.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("GitHub API returned {status} for {url}: {message}")]
    Api {
        status: u16,
        url: String,
        message: String,
    },

    #[error("invalid repository pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A repository as returned by `GET /orgs/{org}/repos`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub fork: bool,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    pub clone_url: String,
    #[serde(default)]
    pub ssh_url: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub pushed_at: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

impl Repository {
    /// A minimal public repository, mostly for tests and dry runs.
    pub fn new(name: impl Into<String>, clone_url: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            full_name: name.clone(),
            name,
            description: None,
            private: false,
            archived: false,
            fork: false,
            default_branch: default_branch(),
            clone_url: clone_url.into(),
            ssh_url: String::new(),
            html_url: String::new(),
            language: None,
            size: 0,
            topics: Vec::new(),
            pushed_at: None,
        }
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }

    /// Where to clone from. Private repositories embed the token.
    pub fn clone_source(&self, token: &SecretValue) -> CloneSource {
        if self.private {
            CloneSource::authenticated(self.clone_url.clone(), token.clone())
        } else {
            CloneSource::public(self.clone_url.clone())
        }
    }
}

/// Summary of an organization (`GET /orgs/{org}`).
#[derive(Debug, Clone, Deserialize)]
pub struct Organization {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub public_repos: u64,
    #[serde(default)]
    pub total_private_repos: Option<u64>,
}

/// GitHub REST client.
pub struct GitHubClient {
    client: Client,
    api_url: String,
    token: SecretValue,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: SecretValue) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Share an existing HTTP client.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn token(&self) -> &SecretValue {
        &self.token
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(v) = format!("Bearer {}", self.token.expose()).parse() {
            headers.insert(AUTHORIZATION, v);
        }
        if let Ok(v) = build_info::user_agent().parse() {
            headers.insert(USER_AGENT, v);
        }
        if let Ok(v) = "application/vnd.github+json".parse() {
            headers.insert(ACCEPT, v);
        }
        headers
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, GitHubError> {
        let resp = self.client.get(url).headers(self.headers()).send().await?;
        let status = resp.status().as_u16();
        if status == 401 {
            return Err(GitHubError::Auth("invalid or expired token".to_string()));
        }
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(GitHubError::Api {
                status,
                url: url.to_string(),
                message,
            });
        }
        Ok(resp)
    }

    /// Organization details.
    pub async fn organization(&self, org: &str) -> Result<Organization, GitHubError> {
        let url = format!("{}/orgs/{org}", self.api_url);
        Ok(self.get(&url).await?.json().await?)
    }

    /// Every repository of `org`, following pagination.
    pub async fn list_org_repositories(&self, org: &str) -> Result<Vec<Repository>, GitHubError> {
        let mut url = Some(format!(
            "{}/orgs/{org}/repos?type=all&per_page={PER_PAGE}",
            self.api_url
        ));
        let mut repos = Vec::new();
        let mut pages = 0;

        while let Some(current) = url.take() {
            let resp = self.get(&current).await?;
            url = resp
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_link);
            let page: Vec<Repository> = resp.json().await?;
            pages += 1;
            debug!(page = pages, count = page.len(), "Fetched repository page");
            repos.extend(page);
        }

        info!(org, count = repos.len(), pages, "Discovered organization repositories");
        Ok(repos)
    }
}

/// The `rel="next"` target of a `Link` header.
pub fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim();
            p == "rel=\"next\"" || p == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

/// Repository selection rules.
#[derive(Debug, Clone)]
pub struct RepoFilter {
    include_private: bool,
    include_archived: bool,
    include_forks: bool,
    exclude: Vec<Regex>,
    include: Vec<Regex>,
}

impl RepoFilter {
    /// Compile the patterns of a `repositories` section. Patterns match at
    /// the start of the repository name.
    pub fn from_config(config: &RepositoryFilterConfig) -> Result<Self, GitHubError> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>, regex::Error> {
            patterns
                .iter()
                .map(|p| Regex::new(&RepositoryFilterConfig::anchored(p)))
                .collect()
        };
        Ok(Self {
            include_private: config.include_private,
            include_archived: config.include_archived,
            include_forks: config.include_forks,
            exclude: compile(&config.exclude_patterns)?,
            include: compile(&config.include_patterns)?,
        })
    }

    /// Whether `repo` is selected for backup.
    pub fn matches(&self, repo: &Repository) -> bool {
        if repo.private && !self.include_private {
            return false;
        }
        if repo.archived && !self.include_archived {
            return false;
        }
        if repo.fork && !self.include_forks {
            return false;
        }
        if self.exclude.iter().any(|re| re.is_match(&repo.name)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|re| re.is_match(&repo.name))
    }

    /// Keep the selected repositories, preserving order.
    pub fn apply(&self, repos: Vec<Repository>) -> Vec<Repository> {
        let total = repos.len();
        let kept: Vec<Repository> = repos.into_iter().filter(|r| self.matches(r)).collect();
        debug!(total, kept = kept.len(), "Applied repository filters");
        kept
    }
}
