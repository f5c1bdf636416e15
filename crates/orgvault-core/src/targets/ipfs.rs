//! IPFS: archive a mirror clone and add it through the daemon's HTTP API.

use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{info, warn};

use orgvault_config::targets::IpfsTargetConfig;

use super::{
    BackupMethod, BackupTarget, TargetError, TargetReport, ensure_success, timestamp, work_dir,
};
use crate::BoxFuture;
use crate::archive::{self, ArchiveFormat};
use crate::git::{self, CloneSource};
use crate::github::Repository;

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(rename = "Version", default)]
    version: String,
}

pub struct IpfsTarget {
    client: Client,
    api_url: String,
    gateway_url: String,
    pin_on_upload: bool,
    format: ArchiveFormat,
}

impl IpfsTarget {
    pub fn new(client: Client, api_url: impl Into<String>, gateway_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            gateway_url: gateway_url.into().trim_end_matches('/').to_string(),
            pin_on_upload: true,
            format: ArchiveFormat::TarGz,
        }
    }

    pub fn with_options(mut self, pin_on_upload: bool, compress: bool) -> Self {
        self.pin_on_upload = pin_on_upload;
        self.format = ArchiveFormat::from_compress(compress);
        self
    }

    pub fn from_config(config: &IpfsTargetConfig, client: Client) -> Self {
        Self::new(client, config.api_url.clone(), config.gateway_url.clone())
            .with_options(config.pin_on_upload, config.compress)
    }

    fn endpoint(&self, command: &str) -> String {
        format!("{}/api/v0/{command}", self.api_url)
    }

    /// Add a file, returning its CID.
    pub async fn add(&self, file_name: String, bytes: Vec<u8>) -> Result<String, TargetError> {
        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));
        let resp = self
            .client
            .post(self.endpoint("add"))
            .multipart(form)
            .send()
            .await?;
        let added: AddResponse = ensure_success(resp).await?.json().await?;
        Ok(added.hash)
    }

    /// Pin `cid`; failures are only logged.
    async fn pin(&self, cid: &str) {
        let result: Result<(), TargetError> = async {
            let resp = self
                .client
                .post(self.endpoint("pin/add"))
                .query(&[("arg", cid)])
                .send()
                .await?;
            ensure_success(resp).await.map(drop)
        }
        .await;
        match result {
            Ok(()) => info!(%cid, "Pinned IPFS content"),
            Err(e) => warn!(%cid, error = %e, "Failed to pin IPFS content"),
        }
    }

    async fn run_backup(
        &self,
        repo: &Repository,
        source: &CloneSource,
    ) -> Result<TargetReport, TargetError> {
        let tmp = work_dir()?;
        let mirror = tmp.path().join(format!("{}.git", repo.name));
        git::clone_mirror(source, &mirror).await?;

        let stem = format!("{}_{}", repo.name, timestamp());
        let file_name = format!("{stem}.{}", self.format.extension());
        let archive_path = tmp.path().join(&file_name);
        archive::create_archive_async(&mirror, &archive_path, &stem, self.format).await?;

        let bytes = tokio::fs::read(&archive_path).await?;
        let size = bytes.len();
        let cid = self.add(file_name, bytes).await?;
        info!(repo = %repo.name, %cid, size, "Uploaded archive to IPFS");

        if self.pin_on_upload {
            self.pin(&cid).await;
        }
        Ok(TargetReport::new(
            BackupMethod::IpfsArchive,
            format!("{}/ipfs/{cid}", self.gateway_url),
        ))
    }
}

impl BackupTarget for IpfsTarget {
    fn name(&self) -> &'static str {
        "ipfs"
    }

    fn test_connection(&self) -> BoxFuture<'_, Result<String, TargetError>> {
        Box::pin(async move {
            let resp = self.client.post(self.endpoint("version")).send().await?;
            let version: VersionResponse = ensure_success(resp).await?.json().await?;
            Ok(format!("IPFS daemon {} at {}", version.version, self.api_url))
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
