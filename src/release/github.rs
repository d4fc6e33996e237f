use std::path::{Path, PathBuf};

use async_trait::async_trait;
use octocrab::Octocrab;
use tokio::io::AsyncWriteExt;

use crate::config::ReleaseConfig;
use crate::error::{AppError, Result};
use crate::release::{ReleaseRef, RemoteReleaseSource};

/// Releases of one GitHub repository.
pub struct GitHubReleaseSource {
    owner: String,
    repo: String,
    token: Option<String>,
    user_agent: String,
    client: Octocrab,
    http: reqwest::Client,
}

impl GitHubReleaseSource {
    pub fn new(config: &ReleaseConfig) -> Result<Self> {
        let mut builder = Octocrab::builder();
        if let Some(token) = &config.token {
            builder = builder.personal_token(token.clone());
        }
        let client = builder
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build octocrab client: {e}")))?;

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            token: config.token.clone(),
            user_agent: config.user_agent.clone(),
            client,
            http,
        })
    }

    fn fallback_tarball_url(&self, tag: &str) -> String {
        format!(
            "https://api.github.com/repos/{}/{}/tarball/{tag}",
            self.owner, self.repo
        )
    }

    fn map_release(&self, release: octocrab::models::repos::Release) -> ReleaseRef {
        let download_url = release
            .tarball_url
            .map(|u| u.to_string())
            .unwrap_or_else(|| self.fallback_tarball_url(&release.tag_name));
        ReleaseRef::new(release.tag_name, download_url)
    }
}

fn is_not_found(e: &octocrab::Error) -> bool {
    matches!(e, octocrab::Error::GitHub { source, .. } if source.status_code.as_u16() == 404)
}

/// Archive file name for a tag; tags may contain `/`.
fn archive_file_name(tag: &str) -> String {
    let safe: String = tag
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{safe}.tar.gz")
}

#[async_trait]
impl RemoteReleaseSource for GitHubReleaseSource {
    async fn latest_release(&self) -> Result<ReleaseRef> {
        tracing::debug!(owner = %self.owner, repo = %self.repo, "Fetching latest release");
        let release = self
            .client
            .repos(&self.owner, &self.repo)
            .releases()
            .get_latest()
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    AppError::ReleaseNotFound("latest".to_string())
                } else {
                    AppError::RemoteUnreachable(e.to_string())
                }
            })?;
        Ok(self.map_release(release))
    }

    async fn release_by_tag(&self, tag: &str) -> Result<ReleaseRef> {
        tracing::debug!(owner = %self.owner, repo = %self.repo, tag = %tag, "Fetching release by tag");
        let release = self
            .client
            .repos(&self.owner, &self.repo)
            .releases()
            .get_by_tag(tag)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    AppError::ReleaseNotFound(tag.to_string())
                } else {
                    AppError::RemoteUnreachable(e.to_string())
                }
            })?;
        Ok(self.map_release(release))
    }

    async fn download_asset(&self, release: &ReleaseRef, dest_dir: &Path) -> Result<PathBuf> {
        tracing::info!(tag = %release.tag, url = %release.download_url, "Downloading release archive");

        let mut request = self
            .http
            .get(&release.download_url)
            .header(reqwest::header::USER_AGENT, &self.user_agent);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| AppError::RemoteUnreachable(format!("download {}: {e}", release.tag)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::RemoteUnreachable(format!(
                "download {} returned HTTP {status}",
                release.tag
            )));
        }
        let path = dest_dir.join(archive_file_name(&release.tag));
        let mut file = tokio::fs::File::create(&path).await?;
        let mut size = 0usize;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            size += chunk.len();
        }
        file.flush().await?;

        tracing::debug!(path = %path.display(), size, "Release archive saved");
        Ok(path)
    }
}
